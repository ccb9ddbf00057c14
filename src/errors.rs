use std::path::PathBuf;
use thiserror::Error;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the coastal segmentation pipeline.
///
/// Each variant carries the context of its failure domain (filesystem, decoding,
/// model inference, ...) so that the directory runner can report a failed file
/// precisely and move on to the next one.
#[derive(Error, Debug)]
pub enum CoastSegError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedError,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Unsupported image format: {path:?}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Missing input: {role} not found at {path:?}")]
    MissingInput { path: PathBuf, role: String },

    #[error("Archive error: writing {path:?} failed")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

pub type Result<T> = std::result::Result<T, CoastSegError>;

impl CoastSegError {
    pub(crate) fn model<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Model {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Callers that know the path and operation construct `FileSystem` directly;
/// this conversion is the fallback for `?` on bare I/O calls.
impl From<std::io::Error> for CoastSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for CoastSegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for CoastSegError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor reshaping around the forward pass, so they
/// are reported as model errors.
impl From<ndarray::ShapeError> for CoastSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

impl From<zip::result::ZipError> for CoastSegError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive {
            path: PathBuf::from("unknown"),
            source: err,
        }
    }
}
