// Labeled word events
// One record per spoken word with its onset and cross-validation membership

use serde::{Deserialize, Serialize};

/// Number of cross-validation folds tagged on every event
pub const NUM_FOLDS: usize = 5;

/// Membership of an event in one fold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoldTag {
    Train,
    Dev,
    Test,
    /// Excluded from the fold (also used for unrecognized tags)
    #[default]
    #[serde(other)]
    Other,
}

/// Raw on-disk shape of a label record; extra keys are ignored
#[derive(Debug, Deserialize)]
struct RawLabelEvent {
    onset: i64,
    word: String,
    #[serde(default)]
    fold0: FoldTag,
    #[serde(default)]
    fold1: FoldTag,
    #[serde(default)]
    fold2: FoldTag,
    #[serde(default)]
    fold3: FoldTag,
    #[serde(default)]
    fold4: FoldTag,
}

/// A word onset and its fold tags
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawLabelEvent")]
pub struct LabelEvent {
    /// Onset in raw samples
    pub onset: i64,

    /// Word token (already stemmed upstream)
    pub word: String,

    folds: [FoldTag; NUM_FOLDS],
}

impl From<RawLabelEvent> for LabelEvent {
    fn from(raw: RawLabelEvent) -> Self {
        LabelEvent {
            onset: raw.onset,
            word: raw.word,
            folds: [raw.fold0, raw.fold1, raw.fold2, raw.fold3, raw.fold4],
        }
    }
}

impl LabelEvent {
    pub fn new(onset: i64, word: impl Into<String>, folds: [FoldTag; NUM_FOLDS]) -> Self {
        LabelEvent {
            onset,
            word: word.into(),
            folds,
        }
    }

    /// Tag for a fold; folds past the last one count as `Other`
    pub fn tag(&self, fold: usize) -> FoldTag {
        self.folds.get(fold).copied().unwrap_or_default()
    }
}

/// Events of one fold split by membership
/// Borrows from the full event list, which stays untouched
#[derive(Debug, Clone, Default)]
pub struct FoldPartition<'a> {
    pub train: Vec<&'a LabelEvent>,
    pub dev: Vec<&'a LabelEvent>,
    pub test: Vec<&'a LabelEvent>,
}

/// Split events into train/dev/test for a fold
pub fn partition(events: &[LabelEvent], fold: usize) -> FoldPartition<'_> {
    let mut split = FoldPartition::default();

    for event in events {
        match event.tag(fold) {
            FoldTag::Train => split.train.push(event),
            FoldTag::Dev => split.dev.push(event),
            FoldTag::Test => split.test.push(event),
            FoldTag::Other => {}
        }
    }

    split
}
