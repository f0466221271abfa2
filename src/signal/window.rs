// Window extraction
// Cuts lag-shifted signal windows around word onsets without crossing stitch boundaries

use ndarray::{s, Array3};

use crate::labels::LabelEvent;
use crate::signal::store::SignalStore;

/// Raw samples per signal bin
/// Onsets and lags are given in samples and converted with floor division
pub const BIN_SIZE: i64 = 32;

/// Lag and width of the windows cut around each onset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Shift relative to onset, in raw samples (may be negative)
    pub lag: i64,

    /// Half the window width, in bins
    pub half_window: usize,
}

impl WindowSpec {
    pub fn new(lag: i64, half_window: usize) -> Self {
        WindowSpec { lag, half_window }
    }

    /// Lag converted to bins
    pub fn lag_bins(&self) -> i64 {
        self.lag.div_euclid(BIN_SIZE)
    }

    /// Total window length in bins
    pub fn len(&self) -> usize {
        2 * self.half_window
    }

    /// Bin range `[left, right)` for an onset
    pub fn bin_range(&self, onset: i64) -> (i64, i64) {
        let center = onset.div_euclid(BIN_SIZE) + self.lag_bins();
        let half = self.half_window as i64;
        (center - half, center + half)
    }
}

/// Windows accepted from one split, with their words in the same order
#[derive(Debug, Clone)]
pub struct ExtractedWindows {
    /// Shape `[n_accepted, 2 * half_window, n_electrodes]`
    pub windows: Array3<f32>,

    /// Word of each accepted window
    pub words: Vec<String>,

    /// Events dropped because their window left the segment
    pub rejected: usize,
}

impl ExtractedWindows {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Check whether an onset's window fits inside its segment
/// Returns the left edge in bins when it does
pub fn accept_window(store: &SignalStore, spec: &WindowSpec, onset: i64) -> Option<usize> {
    let bin_index = onset.div_euclid(BIN_SIZE);
    let (start, stop) = store.stitch_index().segment_for(bin_index)?;
    let (left, right) = spec.bin_range(onset);

    if left < start as i64 || right > stop as i64 {
        return None;
    }

    Some(left as usize)
}

/// Extract the windows for a set of events
///
/// Events whose shifted window would start before their segment or end after
/// it are skipped. Windows are never clipped, so every emitted window has the
/// full `2 * half_window` length.
pub fn extract<'a, I>(events: I, store: &SignalStore, spec: &WindowSpec) -> ExtractedWindows
where
    I: IntoIterator<Item = &'a LabelEvent>,
{
    let mut accepted: Vec<(usize, &str)> = Vec::new();
    let mut rejected = 0;

    for event in events {
        match accept_window(store, spec, event.onset) {
            Some(left) => accepted.push((left, event.word.as_str())),
            None => {
                rejected += 1;
                log::debug!(
                    "Dropped '{}' at onset {}: window leaves its segment",
                    event.word,
                    event.onset
                );
            }
        }
    }

    let len = spec.len();
    let mut windows = Array3::zeros((accepted.len(), len, store.electrode_count()));
    let mut words = Vec::with_capacity(accepted.len());

    for (idx, (left, word)) in accepted.into_iter().enumerate() {
        windows
            .slice_mut(s![idx, .., ..])
            .assign(&store.signal().slice(s![left..left + len, ..]));
        words.push(word.to_string());
    }

    ExtractedWindows {
        windows,
        words,
        rejected,
    }
}
