// Signal module
// Loading the stitched signal archive and extracting onset windows

pub mod store;
pub mod window;

pub use store::{load, load_labels, load_signal, SignalError, SignalResult, SignalStore, StitchIndex};
pub use window::{accept_window, extract, ExtractedWindows, WindowSpec, BIN_SIZE};
