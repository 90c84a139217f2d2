use std::path::PathBuf;

use thiserror::Error;

/// Errors that invalidate an evaluation step outright.
///
/// Per-instance problems (malformed records, unrepairable polygons) are not
/// errors; they are reported as [`crate::Diagnostic`] values instead.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error(
        "image dimensions disagree: ground truth is {}x{}, predictions are {}x{}",
        ground_truth.0,
        ground_truth.1,
        predicted.0,
        predicted.1
    )]
    DimensionMismatch {
        ground_truth: (u32, u32),
        predicted: (u32, u32),
    },

    #[error("image dimensions must be positive, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("invalid evaluation parameters: {message}")]
    InvalidParams { message: String },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
