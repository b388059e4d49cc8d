//! Error taxonomy for the overlay pipeline.
//!
//! Per-frame errors (`ConversionError`, `InferenceError`) are absorbed at the
//! component boundary: the frame is dropped, a counter moves, and the pipeline
//! carries on with the next frame. Session-level errors (`ModelLoadError`,
//! `SessionError`) are the only ones surfaced to the user.

use std::fmt;

use thiserror::Error;

use crate::frame::PixelFormat;
use crate::session::SessionState;

/// A camera frame could not be converted into a detector tensor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("frame has zero dimensions ({width}x{height})")]
    ZeroDimensions { width: u32, height: u32 },

    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(PixelFormat),

    #[error("{format} frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("{0} frame dimensions overflow")]
    DimensionsOverflow(PixelFormat),

    #[error("detector input size must be non-zero, got {width}x{height}")]
    InvalidInputSize { width: u32, height: u32 },
}

/// The detector rejected a tensor.
#[derive(Debug, Error)]
#[error("{detector} inference failed: {cause:#}")]
pub struct InferenceError {
    pub detector: &'static str,
    pub cause: anyhow::Error,
}

impl InferenceError {
    pub fn new(detector: &'static str, cause: anyhow::Error) -> Self {
        Self { detector, cause }
    }
}

/// The detection model could not be brought up.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("detector backend '{0}' is not registered")]
    UnknownBackend(String),

    #[error("detector backend '{0}' requires a model path")]
    MissingModelPath(String),

    #[error("detector backend '{backend}' failed to load: {cause:#}")]
    Backend {
        backend: String,
        cause: anyhow::Error,
    },

    #[error("model loader thread exited without reporting a result")]
    LoaderLost,
}

/// Runtime permission gating the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Camera,
    Microphone,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Camera => f.write_str("camera"),
            Permission::Microphone => f.write_str("microphone"),
        }
    }
}

/// Errors surfaced by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} permission denied")]
    PermissionDenied(Permission),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error("cannot {event} while {from}")]
    InvalidTransition {
        from: SessionState,
        event: &'static str,
    },

    #[error("failed to start pipeline: {0:#}")]
    Pipeline(anyhow::Error),
}
