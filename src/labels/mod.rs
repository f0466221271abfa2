// Label module
// Word events, fold membership and the per-fold vocabulary

pub mod events;
pub mod vocabulary;

pub use events::{partition, FoldPartition, FoldTag, LabelEvent, NUM_FOLDS};
pub use vocabulary::{distinct_count, word_frequencies, Vocabulary, VocabularyError};
