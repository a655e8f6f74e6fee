//! The lookup store the server routes every command to.
//!
//! The protocol layer treats the store as a black box: it shapes calls to
//! [`LookupStore`] and serializes whatever comes back, in the order it comes
//! back. [`MemoryStore`] is the in-process implementation the binary and the
//! tests use.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::StoreError,
    word::{NaturalKey, Word, fold_english},
};

/// Search and mutation contract of the dictionary backend.
///
/// Implementations must be safe to call from many sessions at once; each
/// call is expected to be atomic on its own.
#[async_trait]
pub trait LookupStore: Send + Sync {
    /// Case-insensitive exact match on the English word, ordered by part of speech.
    async fn find_exact(&self, english: &str) -> Result<Vec<Word>, StoreError>;

    /// Substring match on the English word, ordered by word then part of speech.
    async fn find_containing(&self, fragment: &str) -> Result<Vec<Word>, StoreError>;

    async fn find_vietnamese_exact(&self, meaning: &str) -> Result<Vec<Word>, StoreError>;

    async fn find_vietnamese_containing(&self, fragment: &str)
    -> Result<Vec<Word>, StoreError>;

    /// Returns `false` when the natural key is already taken.
    async fn insert(&self, word: Word) -> Result<bool, StoreError>;

    /// Replaces the non-key fields; `false` when the key does not exist.
    async fn update(&self, word: Word) -> Result<bool, StoreError>;

    async fn delete_one(&self, english: &str, part_of_speech: &str) -> Result<bool, StoreError>;

    /// Removes every part of speech recorded for `english`.
    async fn delete_all(&self, english: &str) -> Result<bool, StoreError>;

    /// Every record, ordered by word then part of speech.
    async fn list_all(&self) -> Result<Vec<Word>, StoreError>;
}

/// Thread-safe in-memory dictionary.
///
/// Keyed by [`NaturalKey`] in a `BTreeMap`, so iteration already yields the
/// English-then-part-of-speech order most queries need.
#[derive(Default)]
pub struct MemoryStore {
    words: Mutex<BTreeMap<NaturalKey, Word>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from seed records; later duplicates replace earlier ones.
    pub fn from_words(words: impl IntoIterator<Item = Word>) -> Self {
        let words = words
            .into_iter()
            .map(|word| {
                let word = word.normalized();
                (word.key(), word)
            })
            .collect();
        Self {
            words: Mutex::new(words),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|words| words.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<NaturalKey, Word>>, StoreError> {
        self.words
            .lock()
            .map_err(|_| StoreError::Unavailable("dictionary lock poisoned".to_string()))
    }

    fn collect_where<F>(&self, predicate: F) -> Result<Vec<Word>, StoreError>
    where
        F: Fn(&Word) -> bool,
    {
        Ok(self
            .lock()?
            .values()
            .filter(|word| predicate(word))
            .cloned()
            .collect())
    }
}

fn fold_meaning(meaning: &str) -> String {
    meaning.trim().to_lowercase()
}

#[async_trait]
impl LookupStore for MemoryStore {
    async fn find_exact(&self, english: &str) -> Result<Vec<Word>, StoreError> {
        let english = fold_english(english);
        // Within one English word the map is already ordered by part of speech.
        self.collect_where(|word| word.english == english)
    }

    async fn find_containing(&self, fragment: &str) -> Result<Vec<Word>, StoreError> {
        let fragment = fold_english(fragment);
        self.collect_where(|word| word.english.contains(&fragment))
    }

    async fn find_vietnamese_exact(&self, meaning: &str) -> Result<Vec<Word>, StoreError> {
        let meaning = fold_meaning(meaning);
        self.collect_where(|word| fold_meaning(&word.vietnamese_meaning) == meaning)
    }

    async fn find_vietnamese_containing(
        &self,
        fragment: &str,
    ) -> Result<Vec<Word>, StoreError> {
        let fragment = fold_meaning(fragment);
        let mut words =
            self.collect_where(|word| fold_meaning(&word.vietnamese_meaning).contains(&fragment))?;
        words.sort_by(|a, b| {
            a.vietnamese_meaning
                .cmp(&b.vietnamese_meaning)
                .then_with(|| a.english.cmp(&b.english))
        });
        Ok(words)
    }

    async fn insert(&self, word: Word) -> Result<bool, StoreError> {
        let word = word.normalized();
        let key = word.key();
        let mut words = self.lock()?;
        if words.contains_key(&key) {
            debug!(%key, "insert rejected: duplicate key");
            return Ok(false);
        }
        words.insert(key, word);
        Ok(true)
    }

    async fn update(&self, word: Word) -> Result<bool, StoreError> {
        let word = word.normalized();
        let key = word.key();
        let mut words = self.lock()?;
        match words.get_mut(&key) {
            Some(existing) => {
                existing.phonetic = word.phonetic;
                existing.vietnamese_meaning = word.vietnamese_meaning;
                existing.definition = word.definition;
                existing.example = word.example;
                existing.image_path = word.image_path;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_one(&self, english: &str, part_of_speech: &str) -> Result<bool, StoreError> {
        let key = NaturalKey::new(english, part_of_speech);
        Ok(self.lock()?.remove(&key).is_some())
    }

    async fn delete_all(&self, english: &str) -> Result<bool, StoreError> {
        let english = fold_english(english);
        let mut words = self.lock()?;
        let before = words.len();
        words.retain(|key, _| key.english != english);
        Ok(words.len() < before)
    }

    async fn list_all(&self) -> Result<Vec<Word>, StoreError> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

/// Reads a JSON array of words used to pre-populate a [`MemoryStore`].
pub fn load_seed(path: &Path) -> Result<Vec<Word>, StoreError> {
    let raw = std::fs::read_to_string(path)?;
    let words = serde_json::from_str(&raw)?;
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        MemoryStore::from_words([
            Word::new("run", "verb", "chạy").with_example("He runs daily."),
            Word::new("run", "noun", "cuộc chạy"),
            Word::new("Runner", "noun", "người chạy"),
            Word::new("cat", "noun", "con mèo"),
        ])
    }

    #[tokio::test]
    async fn exact_match_is_case_insensitive_and_ordered_by_pos() {
        let store = seeded();
        let words = store.find_exact("RUN").await.expect("find");
        let pos: Vec<_> = words.iter().map(|w| w.part_of_speech.as_str()).collect();
        assert_eq!(pos, ["noun", "verb"]);
    }

    #[tokio::test]
    async fn containing_orders_by_word_then_pos() {
        let store = seeded();
        let words = store.find_containing("un").await.expect("find");
        let keys: Vec<_> = words
            .iter()
            .map(|w| (w.english.as_str(), w.part_of_speech.as_str()))
            .collect();
        assert_eq!(keys, [("run", "noun"), ("run", "verb"), ("runner", "noun")]);
    }

    #[tokio::test]
    async fn vietnamese_queries_match_meaning() {
        let store = seeded();
        let exact = store.find_vietnamese_exact("Con mèo").await.expect("find");
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].english, "cat");

        let containing = store
            .find_vietnamese_containing("chạy")
            .await
            .expect("find");
        let meanings: Vec<_> = containing
            .iter()
            .map(|w| w.vietnamese_meaning.as_str())
            .collect();
        assert_eq!(meanings, ["chạy", "cuộc chạy", "người chạy"]);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_natural_key() {
        let store = seeded();
        let inserted = store
            .insert(Word::new("RUN", "verb", "chạy nhanh"))
            .await
            .expect("insert");
        assert!(!inserted);
        assert!(store
            .insert(Word::new("run", "adjective", "đang chạy"))
            .await
            .expect("insert"));
    }

    #[tokio::test]
    async fn update_keeps_key_and_replaces_other_fields() {
        let store = seeded();
        let updated = store
            .update(Word::new("Run", "verb", "chạy bộ").with_phonetic("rʌn"))
            .await
            .expect("update");
        assert!(updated);

        let words = store.find_exact("run").await.expect("find");
        let verb = words
            .iter()
            .find(|w| w.part_of_speech == "verb")
            .expect("verb entry");
        assert_eq!(verb.english, "run");
        assert_eq!(verb.vietnamese_meaning, "chạy bộ");
        assert_eq!(verb.phonetic, "rʌn");
        assert_eq!(verb.example, "");

        assert!(!store
            .update(Word::new("walk", "verb", "đi bộ"))
            .await
            .expect("update"));
    }

    #[tokio::test]
    async fn delete_all_cascades_over_parts_of_speech() {
        let store = seeded();
        assert!(store.delete_all("run").await.expect("delete"));
        assert!(store.find_exact("run").await.expect("find").is_empty());
        assert_eq!(store.len(), 2);
        assert!(!store.delete_all("run").await.expect("delete"));
    }

    #[tokio::test]
    async fn delete_one_removes_single_entry() {
        let store = seeded();
        assert!(store.delete_one("run", "noun").await.expect("delete"));
        assert!(!store.delete_one("run", "noun").await.expect("delete"));
        assert_eq!(store.find_exact("run").await.expect("find").len(), 1);
    }

    #[test]
    fn seed_file_loads_words() {
        let path = std::env::temp_dir().join(format!("dictionary-seed-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"english":"cat","partOfSpeech":"noun","vietnameseMeaning":"con mèo"}]"#,
        )
        .expect("write seed");

        let words = load_seed(&path).expect("load seed");
        let _ = std::fs::remove_file(&path);
        assert_eq!(words, vec![Word::new("cat", "noun", "con mèo")]);
    }
}
