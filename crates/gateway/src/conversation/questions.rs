//! Questionnaire definition
//!
//! A [`Questionnaire`] is an ordered table of [`QuestionSpec`]s. Validation and
//! canonical-value mapping are data on each question so the engine never needs
//! per-question code.

use std::collections::HashMap;

use antrian_shared::Answers;
use regex::Regex;

/// Prompt sent when a question has no dedicated error prompt
const GENERIC_ERROR_PROMPT: &str = "❌ Input tidak valid. Mohon jawab kembali pertanyaan untuk";

#[derive(Debug, thiserror::Error)]
pub enum QuestionnaireError {
    #[error("Questionnaire has no questions")]
    Empty,
    #[error("Duplicate question key: {0}")]
    DuplicateKey(String),
    #[error("Invalid answer pattern for {key}: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },
}

/// Rule an answer must satisfy. Text is already trimmed.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Any input, including empty
    Any,
    /// At least one character
    NonEmpty,
    /// At least `n` characters
    MinChars(usize),
    /// Whole input matches the pattern
    Pattern(Regex),
    /// One of the listed codes, case-insensitive
    OneOf(Vec<String>),
}

impl Validator {
    /// Build a pattern validator anchored to the whole input
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{})$", pattern)).map(Self::Pattern)
    }

    pub fn one_of(codes: &[&str]) -> Self {
        Self::OneOf(codes.iter().map(|c| c.to_string()).collect())
    }

    pub fn accepts(&self, text: &str) -> bool {
        match self {
            Self::Any => true,
            Self::NonEmpty => !text.is_empty(),
            Self::MinChars(n) => text.chars().count() >= *n,
            Self::Pattern(re) => re.is_match(text),
            Self::OneOf(codes) => codes.iter().any(|c| c.eq_ignore_ascii_case(text)),
        }
    }
}

/// Mapping from an accepted answer to the stored value
#[derive(Debug, Clone, Default)]
pub enum Transform {
    #[default]
    Verbatim,
    /// Code → label, case-insensitive on the code
    Choice(Vec<(String, String)>),
}

impl Transform {
    pub fn choice(pairs: &[(&str, &str)]) -> Self {
        Self::Choice(
            pairs
                .iter()
                .map(|(code, label)| (code.to_string(), label.to_string()))
                .collect(),
        )
    }

    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Verbatim => text.to_string(),
            Self::Choice(pairs) => pairs
                .iter()
                .find(|(code, _)| code.eq_ignore_ascii_case(text))
                .map(|(_, label)| label.clone())
                .unwrap_or_else(|| text.to_string()),
        }
    }
}

/// One questionnaire step
#[derive(Debug, Clone)]
pub struct QuestionSpec {
    pub key: String,
    pub prompt: String,
    pub error_prompt: Option<String>,
    pub validator: Validator,
    pub optional: bool,
    pub transform: Transform,
}

impl QuestionSpec {
    pub fn new(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prompt: prompt.into(),
            error_prompt: None,
            validator: Validator::Any,
            optional: false,
            transform: Transform::Verbatim,
        }
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn error(mut self, prompt: impl Into<String>) -> Self {
        self.error_prompt = Some(prompt.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Reply sent when an answer is rejected
    pub fn rejection(&self) -> String {
        self.error_prompt
            .clone()
            .unwrap_or_else(|| format!("{} {}.", GENERIC_ERROR_PROMPT, self.key))
    }
}

/// Ordered, immutable question table
#[derive(Debug, Clone)]
pub struct Questionnaire {
    questions: Vec<QuestionSpec>,
    positions: HashMap<String, usize>,
}

impl Questionnaire {
    pub fn new(questions: Vec<QuestionSpec>) -> Result<Self, QuestionnaireError> {
        if questions.is_empty() {
            return Err(QuestionnaireError::Empty);
        }
        let mut positions = HashMap::with_capacity(questions.len());
        for (index, question) in questions.iter().enumerate() {
            if positions.insert(question.key.clone(), index).is_some() {
                return Err(QuestionnaireError::DuplicateKey(question.key.clone()));
            }
        }
        Ok(Self {
            questions,
            positions,
        })
    }

    /// The patient registration questionnaire used by the clinic
    pub fn patient_registration() -> Result<Self, QuestionnaireError> {
        let pattern = |key: &str, pattern: &str| {
            Validator::pattern(pattern).map_err(|source| QuestionnaireError::InvalidPattern {
                key: key.to_string(),
                source,
            })
        };

        Self::new(vec![
            QuestionSpec::new(
                "nama_pasien",
                "🏥 *Selamat datang di Sistem Antrian Puskesmas!*\n\nSilakan masukkan *Nama Lengkap* Anda:",
            )
            .validate(Validator::MinChars(3))
            .error("❌ Nama terlalu pendek. Mohon masukkan nama lengkap Anda:"),
            QuestionSpec::new(
                "nik",
                "📝 Masukkan *NIK (Nomor Induk Kependudukan)* 16 digit:",
            )
            .validate(pattern("nik", r"\d{16}")?)
            .error("❌ NIK harus 16 digit angka. Silakan coba lagi:"),
            QuestionSpec::new(
                "tanggal_lahir",
                "📅 Masukkan *Tanggal Lahir* Anda (format: DD-MM-YYYY)\nContoh: 15-08-1990",
            )
            .validate(pattern("tanggal_lahir", r"\d{2}-\d{2}-\d{4}")?)
            .error("❌ Format tanggal salah. Gunakan format DD-MM-YYYY\nContoh: 15-08-1990"),
            QuestionSpec::new(
                "jenis_kelamin",
                "👤 Pilih *Jenis Kelamin*:\nBalas dengan:\n*L* untuk Laki-laki\n*P* untuk Perempuan",
            )
            .validate(Validator::one_of(&["L", "P"]))
            .error("❌ Pilihan tidak valid. Balas *L* atau *P*:")
            .transform(Transform::choice(&[("L", "Laki-laki"), ("P", "Perempuan")])),
            QuestionSpec::new(
                "pekerjaan",
                "💼 Apa *Pekerjaan* Anda? (Contoh: Pelajar, Swasta, PNS)",
            )
            .validate(Validator::NonEmpty)
            .error("❌ Pekerjaan tidak boleh kosong."),
            QuestionSpec::new("agama", "🙏 Apa *Agama* Anda? (Contoh: Islam, Kristen)")
                .validate(Validator::NonEmpty)
                .error("❌ Agama tidak boleh kosong."),
            QuestionSpec::new("alamat_desa", "🏠 Masukkan *Nama Desa/Kelurahan* Anda:")
                .validate(Validator::NonEmpty)
                .error("❌ Desa/Kelurahan tidak boleh kosong."),
            QuestionSpec::new("alamat_dusun", "🏘️ Masukkan *Nama Dusun/Jalan* Anda:")
                .validate(Validator::NonEmpty)
                .error("❌ Dusun/Jalan tidak boleh kosong."),
            QuestionSpec::new(
                "alamat_rtrw",
                "📍 Masukkan *RT/RW* Anda (Contoh: 001/002):",
            )
            .validate(pattern("alamat_rtrw", r"\d{3}/\d{3}")?)
            .error("❌ Format RT/RW salah. Gunakan format XXX/YYY\nContoh: 001/002"),
            QuestionSpec::new(
                "kepesertaan",
                "💳 Pilih *Kepesertaan* Anda:\n1. BPJS PBI\n2. BPJS Non PBI\n3. Umum\n4. Lainnya\n\nBalas dengan nomor (1/2/3/4):",
            )
            .validate(Validator::one_of(&["1", "2", "3", "4"]))
            .error("❌ Pilihan kepesertaan tidak valid. Balas dengan angka 1-4.")
            .transform(Transform::choice(&[
                ("1", "BPJS PBI"),
                ("2", "BPJS Non PBI"),
                ("3", "Umum"),
                ("4", "Lainnya"),
            ])),
            QuestionSpec::new(
                "nomor_asuransi",
                "Masukkan *Nomor Asuransi/BPJS* Anda (Ketik *TIDAK* jika tidak ada):",
            )
            .optional(),
            QuestionSpec::new(
                "nama_keluarga",
                "Masukkan *Nama Kontak Keluarga* (Ketik *TIDAK* jika tidak ada):",
            )
            .optional(),
            QuestionSpec::new(
                "keluhan",
                "🩺 Ceritakan *Keluhan atau Gejala* yang Anda alami:\n(Jelaskan dengan detail, minimal 5 karakter)",
            )
            .validate(Validator::MinChars(5))
            .error("❌ Keluhan terlalu singkat. Mohon jelaskan lebih detail:"),
        ])
    }

    pub fn first(&self) -> &QuestionSpec {
        // `new` rejects empty tables
        &self.questions[0]
    }

    pub fn get(&self, key: &str) -> Option<&QuestionSpec> {
        self.positions.get(key).map(|&index| &self.questions[index])
    }

    /// Question that follows `key`, `None` after the last one
    pub fn next_after(&self, key: &str) -> Option<&QuestionSpec> {
        self.positions
            .get(key)
            .and_then(|&index| self.questions.get(index + 1))
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuestionSpec> {
        self.questions.iter()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Fill every key missing from `answers` with an empty string
    pub fn complete_answers(&self, mut answers: Answers) -> Answers {
        for question in &self.questions {
            answers.entry(question.key.clone()).or_default();
        }
        answers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_registration_order() {
        let q = Questionnaire::patient_registration().unwrap();
        assert_eq!(q.len(), 13);
        assert_eq!(q.first().key, "nama_pasien");
        assert_eq!(q.next_after("nama_pasien").unwrap().key, "nik");
        assert_eq!(q.next_after("nama_keluarga").unwrap().key, "keluhan");
        assert!(q.next_after("keluhan").is_none());
        assert!(q.next_after("unknown").is_none());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let result = Questionnaire::new(vec![
            QuestionSpec::new("a", "first"),
            QuestionSpec::new("a", "again"),
        ]);
        assert!(matches!(result, Err(QuestionnaireError::DuplicateKey(k)) if k == "a"));
        assert!(matches!(
            Questionnaire::new(Vec::new()),
            Err(QuestionnaireError::Empty)
        ));
    }

    #[test]
    fn test_validators() {
        let q = Questionnaire::patient_registration().unwrap();
        let accepts = |key: &str, text: &str| q.get(key).unwrap().validator.accepts(text);

        assert!(!accepts("nama_pasien", "Al"));
        assert!(accepts("nama_pasien", "Ali"));
        assert!(accepts("nik", "3201234567890123"));
        assert!(!accepts("nik", "320123456789012"));
        assert!(!accepts("nik", "32012345678901234"));
        assert!(accepts("tanggal_lahir", "15-08-1990"));
        assert!(!accepts("tanggal_lahir", "1990-08-15"));
        assert!(accepts("jenis_kelamin", "p"));
        assert!(!accepts("jenis_kelamin", "X"));
        assert!(accepts("alamat_rtrw", "001/002"));
        assert!(!accepts("alamat_rtrw", "1/2"));
        assert!(accepts("kepesertaan", "4"));
        assert!(!accepts("kepesertaan", "5"));
        assert!(!accepts("pekerjaan", ""));
        assert!(accepts("nomor_asuransi", ""));
        assert!(!accepts("keluhan", "flu"));
        assert!(accepts("keluhan", "demam"));
    }

    #[test]
    fn test_min_chars_counts_characters_not_bytes() {
        // "Éé" is two characters but four bytes
        assert!(!Validator::MinChars(3).accepts("Éé"));
        assert!(Validator::MinChars(2).accepts("Éé"));
    }

    #[test]
    fn test_choice_transform() {
        let q = Questionnaire::patient_registration().unwrap();
        let gender = &q.get("jenis_kelamin").unwrap().transform;
        assert_eq!(gender.apply("l"), "Laki-laki");
        assert_eq!(gender.apply("P"), "Perempuan");

        let membership = &q.get("kepesertaan").unwrap().transform;
        assert_eq!(membership.apply("2"), "BPJS Non PBI");
        assert_eq!(Transform::Verbatim.apply("Budi"), "Budi");
    }

    #[test]
    fn test_rejection_falls_back_to_generic_prompt() {
        let spec = QuestionSpec::new("hobi", "Apa hobi Anda?").validate(Validator::NonEmpty);
        assert!(spec.rejection().ends_with("hobi."));
    }

    #[test]
    fn test_complete_answers_fills_missing_keys() {
        let q = Questionnaire::patient_registration().unwrap();
        let mut answers = Answers::new();
        answers.insert("nama_pasien".to_string(), "Budi".to_string());
        let full = q.complete_answers(answers);
        assert_eq!(full.len(), 13);
        assert_eq!(full["nama_pasien"], "Budi");
        assert_eq!(full["nomor_asuransi"], "");
    }
}
