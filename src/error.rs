//! Error types for the segmentation library.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Mismatched dimensions, empty frames or malformed payloads
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Threshold, fusion or batch settings out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Requested acceleration device is not present or misconfigured
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Model output did not have the expected layout
    #[error("Model error: {0}")]
    Model(String),

    /// `ONNX` Runtime operation failed
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    /// Camera capture failed
    #[error("Camera error: {0}")]
    Camera(#[from] nokhwa::NokhwaError),

    /// Image decoding or encoding failed
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Response could not be encoded
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
