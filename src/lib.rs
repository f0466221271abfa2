// Lexdecode - lag-windowed neural signal to word decoder
// Module declarations

pub mod eval;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod signal;
pub mod state;

pub use pipeline::{run, run_with, PipelineError, PipelineResult, RunConfig, RunReport};
