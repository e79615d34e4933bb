// crates/beatcut-core/src/error.rs
//
// Error taxonomy for the edit pipeline. Variants are grouped by the
// half of the pipeline that failed rather than by underlying cause:
//   • Source:   opening/decoding/seeking input media
//   • Sink:     encoding/muxing/filesystem output
//   • Filter:   building or running a filter graph
//   • Schedule: invalid edit parameters (bad gaps, inverted intro)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EditError {
    #[error("source failure: {0}")]
    Source(String),

    #[error("sink failure: {0}")]
    Sink(String),

    #[error("filter failure: {0}")]
    Filter(String),

    #[error("invalid schedule: {0}")]
    Schedule(String),
}

pub type EditResult<T> = Result<T, EditError>;
