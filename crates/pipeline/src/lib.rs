//! Device Sampling Pipeline
//!
//! This crate moves samples from an acquisition device to any number of
//! consumers on two dedicated threads per device:
//! - The fetcher polls the device and copies each chunk into an owned block
//! - A bounded transfer queue decouples it from the decoder, dropping the
//!   oldest block when the decoder falls behind
//! - The decoder converts raw words to physical values, watches the sample
//!   counter for gaps and publishes every batch through the distribution hub
//!
//! `SamplingPipeline` owns the lifecycle of one device, `SamplingContext` the
//! state shared by all devices of a process.

pub mod config;
pub mod consumers;
pub mod context;
pub mod control;
pub mod decoder;
pub mod drift;
pub mod error;
pub mod fetcher;
pub mod hub;
pub mod lifecycle;
pub mod queue;
pub mod stats;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::*;
pub use consumers::*;
pub use context::*;
pub use control::*;
pub use decoder::{ConversionMode, Decoded, Decoder};
pub use drift::*;
pub use error::*;
pub use fetcher::Fetcher;
pub use hub::*;
pub use lifecycle::{PipelineState, SamplingPipeline, StopReport};
pub use queue::*;
pub use stats::*;
