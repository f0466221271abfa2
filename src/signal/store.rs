// Signal store
// Reads the binned signal archive and the word label archive, validates stitching

use ndarray::Array2;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::labels::LabelEvent;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse archive: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Incorrect stitching: signal has {rows} bins but stitch index ends at {stitch_end}")]
    StitchMismatch { rows: usize, stitch_end: usize },

    #[error("Incorrect number of electrodes: signal has {cols} columns, archive lists {electrodes}")]
    ElectrodeMismatch { cols: usize, electrodes: usize },

    #[error("Ragged signal: row {row} has {found} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Stitch index must be non-empty and strictly increasing")]
    InvalidStitchIndex,

    #[error("Label archive line {line}: {source}")]
    LabelLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub type SignalResult<T> = Result<T, SignalError>;

/// Signal archive as it is stored on disk
#[derive(Debug, Deserialize)]
struct SignalArchive {
    /// Time-binned signal, one row per bin, one column per electrode
    binned_signal: Vec<Vec<f32>>,

    /// Segment ends in bins, without the leading 0
    bin_stitch_index: Vec<usize>,

    /// Electrode metadata; only the count is used
    electrodes: Vec<serde_json::Value>,
}

/// Ordered segment boundaries over the concatenated signal
/// Always starts at 0 and ends at the signal's row count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchIndex {
    boundaries: Vec<usize>,
}

impl StitchIndex {
    /// Build from the raw boundary list, prepending the 0 sentinel
    pub fn from_raw(raw: &[usize]) -> SignalResult<Self> {
        let mut boundaries = Vec::with_capacity(raw.len() + 1);
        boundaries.push(0);
        boundaries.extend_from_slice(raw);
        Self::new(boundaries)
    }

    /// Build from a complete boundary list that already starts at 0
    pub fn new(boundaries: Vec<usize>) -> SignalResult<Self> {
        if boundaries.len() < 2 || boundaries[0] != 0 {
            return Err(SignalError::InvalidStitchIndex);
        }
        if boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(SignalError::InvalidStitchIndex);
        }
        Ok(StitchIndex { boundaries })
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    /// Total stitched length in bins
    pub fn total_bins(&self) -> usize {
        // new() guarantees at least two entries
        self.boundaries[self.boundaries.len() - 1]
    }

    pub fn segment_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Segment `[start, stop)` holding a bin index
    ///
    /// The segment is chosen by the last boundary strictly below `bin_index`,
    /// so a bin sitting exactly on a boundary belongs to the segment that ends
    /// there. Bin 0 and negative bins map to the first segment. Returns `None`
    /// for bins past the end of the signal.
    pub fn segment_for(&self, bin_index: i64) -> Option<(usize, usize)> {
        let below = self
            .boundaries
            .iter()
            .take_while(|&&boundary| (boundary as i64) < bin_index)
            .count();
        let rank = below.saturating_sub(1);
        let stop = *self.boundaries.get(rank + 1)?;
        Some((self.boundaries[rank], stop))
    }
}

/// Read-only signal shared by every fold
#[derive(Debug, Clone)]
pub struct SignalStore {
    signal: Array2<f32>,
    stitch_index: StitchIndex,
}

impl SignalStore {
    /// Validate a signal matrix against its stitch index and electrode count
    pub fn new(
        signal: Array2<f32>,
        stitch_index: StitchIndex,
        electrode_count: usize,
    ) -> SignalResult<Self> {
        let (rows, cols) = signal.dim();

        if rows != stitch_index.total_bins() {
            return Err(SignalError::StitchMismatch {
                rows,
                stitch_end: stitch_index.total_bins(),
            });
        }

        if cols != electrode_count {
            return Err(SignalError::ElectrodeMismatch {
                cols,
                electrodes: electrode_count,
            });
        }

        Ok(SignalStore {
            signal,
            stitch_index,
        })
    }

    pub fn signal(&self) -> &Array2<f32> {
        &self.signal
    }

    pub fn stitch_index(&self) -> &StitchIndex {
        &self.stitch_index
    }

    pub fn electrode_count(&self) -> usize {
        self.signal.ncols()
    }

    pub fn total_bins(&self) -> usize {
        self.signal.nrows()
    }
}

/// Load the signal archive from disk
pub fn load_signal(path: &Path) -> SignalResult<SignalStore> {
    let contents = fs::read(path)?;
    parse_signal_archive(&contents)
}

/// Parse and validate a signal archive from JSON bytes
pub fn parse_signal_archive(data: &[u8]) -> SignalResult<SignalStore> {
    let archive: SignalArchive = serde_json::from_slice(data)?;

    let rows = archive.binned_signal.len();
    let cols = archive.binned_signal.first().map_or(0, Vec::len);

    let mut flat = Vec::with_capacity(rows * cols);
    for (row, values) in archive.binned_signal.iter().enumerate() {
        if values.len() != cols {
            return Err(SignalError::RaggedRow {
                row,
                expected: cols,
                found: values.len(),
            });
        }
        flat.extend_from_slice(values);
    }

    let signal = Array2::from_shape_vec((rows, cols), flat)
        .map_err(|_| SignalError::RaggedRow {
            row: 0,
            expected: cols,
            found: 0,
        })?;

    // Stitch end is checked before the boundary order so a truncated signal
    // reports the more useful error.
    let stitch_end = archive.bin_stitch_index.last().copied().unwrap_or(0);
    if stitch_end != rows {
        return Err(SignalError::StitchMismatch { rows, stitch_end });
    }

    let stitch_index = StitchIndex::from_raw(&archive.bin_stitch_index)?;
    SignalStore::new(signal, stitch_index, archive.electrodes.len())
}

/// Load labeled word events
/// `.jsonl` files are read one event per line, anything else as a JSON array
pub fn load_labels(path: &Path) -> SignalResult<Vec<LabelEvent>> {
    let contents = fs::read_to_string(path)?;
    let is_lines = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("jsonl"));

    if is_lines {
        parse_label_lines(&contents)
    } else {
        Ok(serde_json::from_str(&contents)?)
    }
}

fn parse_label_lines(contents: &str) -> SignalResult<Vec<LabelEvent>> {
    let mut events = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let event = serde_json::from_str(line).map_err(|source| SignalError::LabelLine {
            line: idx + 1,
            source,
        })?;
        events.push(event);
    }

    Ok(events)
}

/// Load both archives for a run
pub fn load(signal_path: &Path, label_path: &Path) -> SignalResult<(SignalStore, Vec<LabelEvent>)> {
    let store = load_signal(signal_path)?;
    let labels = load_labels(label_path)?;

    log::info!(
        "Loaded signal: {} bins x {} electrodes in {} segments, {} label events",
        store.total_bins(),
        store.electrode_count(),
        store.stitch_index().segment_count(),
        labels.len()
    );

    Ok((store, labels))
}
