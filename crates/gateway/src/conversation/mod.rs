//! Chat questionnaire conversations
//!
//! Drives each sender through the registration questionnaire one message at a
//! time and hands finished answer sets to ticket issuance.

pub mod engine;
pub mod input;
pub mod questions;
pub mod sessions;

pub use engine::{Completion, ConversationEngine, Outcome};
pub use input::{InputClassifier, Utterance, UtteranceKind};
pub use questions::{QuestionSpec, Questionnaire, QuestionnaireError, Transform, Validator};
pub use sessions::{ConversationState, SenderGuard, SessionMap};
