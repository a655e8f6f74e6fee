//! The dictionary entry exchanged across the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{codec::ensure_plain, error::CodecError};

/// Number of fields a word occupies on the wire.
pub const WORD_FIELD_COUNT: usize = 7;

/// An English↔Vietnamese dictionary record.
///
/// Field order matches the flattened wire payload: english, part of speech,
/// phonetic, Vietnamese meaning, definition, example, image path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Word {
    pub english: String,
    pub part_of_speech: String,
    pub phonetic: String,
    pub vietnamese_meaning: String,
    pub definition: String,
    pub example: String,
    pub image_path: String,
}

/// The `(english, part_of_speech)` pair identifying a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NaturalKey {
    pub english: String,
    pub part_of_speech: String,
}

impl NaturalKey {
    pub fn new(english: &str, part_of_speech: &str) -> Self {
        Self {
            english: fold_english(english),
            part_of_speech: part_of_speech.trim().to_string(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.english, self.part_of_speech)
    }
}

/// Case-folds an English headword for matching.
pub fn fold_english(english: &str) -> String {
    english.trim().to_lowercase()
}

impl Word {
    pub fn new(
        english: impl Into<String>,
        part_of_speech: impl Into<String>,
        vietnamese_meaning: impl Into<String>,
    ) -> Self {
        Self {
            english: english.into(),
            part_of_speech: part_of_speech.into(),
            vietnamese_meaning: vietnamese_meaning.into(),
            ..Self::default()
        }
    }

    pub fn with_phonetic(mut self, phonetic: impl Into<String>) -> Self {
        self.phonetic = phonetic.into();
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into();
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    pub fn with_image_path(mut self, image_path: impl Into<String>) -> Self {
        self.image_path = image_path.into();
        self
    }

    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(&self.english, &self.part_of_speech)
    }

    /// Returns a copy with the natural key folded the way the store keys it.
    pub fn normalized(&self) -> Self {
        let key = self.key();
        Self {
            english: key.english,
            part_of_speech: key.part_of_speech,
            ..self.clone()
        }
    }

    /// Checks that the record may be carried by `ADD` or `UPDATE`.
    ///
    /// The codec does no in-band escaping, so separators and line breaks are
    /// refused here instead of corrupting the frame.
    pub fn validate_for_mutation(&self) -> Result<(), CodecError> {
        if self.english.trim().is_empty() {
            return Err(CodecError::BlankField { field: "english" });
        }
        if self.vietnamese_meaning.trim().is_empty() {
            return Err(CodecError::BlankField {
                field: "vietnameseMeaning",
            });
        }

        for (field, value) in self.named_fields() {
            ensure_plain(field, value)?;
        }
        Ok(())
    }

    /// Fields in wire order.
    pub fn fields(&self) -> [&str; WORD_FIELD_COUNT] {
        [
            self.english.as_str(),
            self.part_of_speech.as_str(),
            self.phonetic.as_str(),
            self.vietnamese_meaning.as_str(),
            self.definition.as_str(),
            self.example.as_str(),
            self.image_path.as_str(),
        ]
    }

    /// Rebuilds a word from wire-ordered fields; missing trailing fields are empty.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Self {
        let field = |index: usize| {
            fields
                .get(index)
                .map(|value| value.as_ref().to_string())
                .unwrap_or_default()
        };
        Self {
            english: field(0),
            part_of_speech: field(1),
            phonetic: field(2),
            vietnamese_meaning: field(3),
            definition: field(4),
            example: field(5),
            image_path: field(6),
        }
    }

    fn named_fields(&self) -> [(&'static str, &str); WORD_FIELD_COUNT] {
        [
            ("english", self.english.as_str()),
            ("partOfSpeech", self.part_of_speech.as_str()),
            ("phonetic", self.phonetic.as_str()),
            ("vietnameseMeaning", self.vietnamese_meaning.as_str()),
            ("definition", self.definition.as_str()),
            ("example", self.example.as_str()),
            ("imagePath", self.image_path.as_str()),
        ]
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.english)?;
        if !self.phonetic.is_empty() {
            write!(f, " {}", self.phonetic)?;
        }
        if !self.part_of_speech.is_empty() {
            write!(f, " ({})", self.part_of_speech)?;
        }
        write!(f, ": {}", self.vietnamese_meaning)?;
        if !self.definition.is_empty() {
            write!(f, "\n  definition: {}", self.definition)?;
        }
        if !self.example.is_empty() {
            write!(f, "\n  example: {}", self.example)?;
        }
        Ok(())
    }
}
