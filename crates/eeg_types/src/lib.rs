//! Shared types for the device sampling pipeline
//!
//! This crate contains the data model exchanged between the device handle, the
//! sampling pipeline and its consumers: channel descriptors, raw sample blocks
//! and decoded sample batches.

pub mod channel;
pub mod data;

// Re-export commonly used types
pub use channel::*;
pub use data::*;
