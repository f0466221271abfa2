// Word vocabulary
// Dense class indices assigned in sorted word order, built from training words only

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VocabularyError {
    #[error("Unknown label '{0}': word was never observed in the training split")]
    UnknownLabel(String),

    #[error("Class index {0} is out of range")]
    IndexOutOfRange(usize),
}

/// Bijection between training words and `0..n_classes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    index_to_word: Vec<String>,
    word_to_index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Build from training words; duplicates collapse, indices follow sorted order
    pub fn build<I, S>(train_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = train_words
            .into_iter()
            .map(|w| w.as_ref().to_string())
            .collect();
        Self::from(distinct.into_iter().collect::<Vec<_>>())
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.index_to_word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_word.is_empty()
    }

    pub fn index_of(&self, word: &str) -> Result<usize, VocabularyError> {
        self.word_to_index
            .get(word)
            .copied()
            .ok_or_else(|| VocabularyError::UnknownLabel(word.to_string()))
    }

    pub fn word_at(&self, index: usize) -> Result<&str, VocabularyError> {
        self.index_to_word
            .get(index)
            .map(String::as_str)
            .ok_or(VocabularyError::IndexOutOfRange(index))
    }

    /// Words ordered by class index
    pub fn words(&self) -> &[String] {
        &self.index_to_word
    }

    /// Translate words into class indices, failing on the first unknown word
    pub fn encode<S: AsRef<str>>(&self, words: &[S]) -> Result<Vec<usize>, VocabularyError> {
        words.iter().map(|w| self.index_of(w.as_ref())).collect()
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(words: Vec<String>) -> Self {
        let word_to_index = words
            .iter()
            .enumerate()
            .map(|(idx, word)| (word.clone(), idx))
            .collect();
        Vocabulary {
            index_to_word: words,
            word_to_index,
        }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.index_to_word
    }
}

/// Occurrence count of each word
pub fn word_frequencies<S: AsRef<str>>(words: &[S]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for word in words {
        *counts.entry(word.as_ref().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Number of distinct class indices in a label list
pub fn distinct_count(labels: &[usize]) -> usize {
    labels.iter().collect::<BTreeSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_assigns_sorted_indices() {
        let vocab = Vocabulary::build(["the", "cat", "sat", "the", "apple"]);

        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.words(), &["apple", "cat", "sat", "the"]);
        for (idx, word) in vocab.words().iter().enumerate() {
            assert_eq!(vocab.index_of(word).unwrap(), idx);
            assert_eq!(vocab.word_at(idx).unwrap(), word);
        }
    }

    #[test]
    fn test_build_is_order_independent() {
        let a = Vocabulary::build(["b", "a", "c", "a"]);
        let b = Vocabulary::build(["c", "a", "b"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_word_fails() {
        let vocab = Vocabulary::build(["yes", "no"]);
        let err = vocab.encode(&["yes", "maybe"]).unwrap_err();

        assert!(matches!(err, VocabularyError::UnknownLabel(ref w) if w == "maybe"));
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_encode_known_words() {
        let vocab = Vocabulary::build(["yes", "no"]);
        assert_eq!(vocab.encode(&["yes", "no", "yes"]).unwrap(), vec![1, 0, 1]);
    }

    #[test]
    fn test_serializes_as_word_list() {
        let vocab = Vocabulary::build(["b", "a"]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["a","b"]"#);

        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index_of("b").unwrap(), 1);
    }

    #[test]
    fn test_word_frequencies_and_distinct_count() {
        let counts = word_frequencies(&["a", "b", "a"]);
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 1);
        assert_eq!(distinct_count(&[3, 1, 3, 0]), 3);
    }
}
