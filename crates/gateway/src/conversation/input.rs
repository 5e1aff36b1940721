//! Inbound text classification

/// What an inbound message means to the conversation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    /// Abandon any progress and start over
    Restart,
    /// Explicit "no value" for an optional question
    Skip,
    /// A regular answer
    Text,
}

/// A classified, trimmed inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub kind: UtteranceKind,
    pub text: String,
}

/// Classifies raw inbound text using configured keywords.
///
/// Keywords match the whole trimmed message, case-insensitive.
#[derive(Debug, Clone)]
pub struct InputClassifier {
    restart_keywords: Vec<String>,
    skip_tokens: Vec<String>,
}

impl InputClassifier {
    pub fn new<R, S>(restart_keywords: R, skip_tokens: S) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        let normalize = |word: &str| word.trim().to_uppercase();
        Self {
            restart_keywords: restart_keywords
                .into_iter()
                .map(|w| normalize(w.as_ref()))
                .filter(|w| !w.is_empty())
                .collect(),
            skip_tokens: skip_tokens
                .into_iter()
                .map(|w| normalize(w.as_ref()))
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, raw: &str) -> Utterance {
        let text = raw.trim();
        let upper = text.to_uppercase();

        let kind = if self.restart_keywords.iter().any(|k| *k == upper) {
            UtteranceKind::Restart
        } else if self.skip_tokens.iter().any(|k| *k == upper) {
            UtteranceKind::Skip
        } else {
            UtteranceKind::Text
        };

        Utterance {
            kind,
            text: text.to_string(),
        }
    }
}

impl Default for InputClassifier {
    fn default() -> Self {
        Self::new(["MULAI", "DAFTAR"], ["TIDAK"])
    }
}
