//! Error types for the sampling pipeline

use eeg_sensor::DeviceError;
use eeg_types::{DeviceId, LayoutError};
use thiserror::Error;

/// Pipeline-level error types.
///
/// Only `DeviceCommunication` and `WorkerPanicked` end a running measurement;
/// the rest are returned to the caller that misused the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Device {0} is already owned by another pipeline")]
    DeviceBusy(DeviceId),

    #[error("Device communication error: {0}")]
    DeviceCommunication(#[from] DeviceError),

    #[error("Invalid channel layout: {0}")]
    InvalidLayout(#[from] LayoutError),

    #[error("Invalid pipeline configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("{worker} worker panicked: {message}")]
    WorkerPanicked { worker: &'static str, message: String },

    #[error("Failed to spawn {worker} worker: {message}")]
    Spawn { worker: &'static str, message: String },
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors confined to a single raw block.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("block {sequence}: expected {expected} words ({sample_sets} sets x {channels} channels), got {actual}")]
    FormatMismatch {
        sequence: u64,
        sample_sets: u32,
        channels: usize,
        expected: usize,
        actual: usize,
    },
}

/// Errors confined to a single consumer's delivery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsumerError {
    #[error("consumer is backed up: {0}")]
    Backpressure(String),
    #[error("consumer is closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(String),
    #[error("consumer panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for ConsumerError {
    fn from(err: std::io::Error) -> Self {
        ConsumerError::Io(err.to_string())
    }
}

impl From<csv::Error> for ConsumerError {
    fn from(err: csv::Error) -> Self {
        ConsumerError::Io(err.to_string())
    }
}

/// Renders a panic payload caught by `catch_unwind` or `JoinHandle::join`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload".to_string()
    }
}
