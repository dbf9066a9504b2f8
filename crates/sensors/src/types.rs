//! Common types and traits for sampling devices

use std::sync::{Arc, Mutex};
use std::time::Duration;

use eeg_types::{ChannelDescriptor, MeasurementType};
use thiserror::Error;

/// Status of a sampling device
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeviceStatus {
    /// Connected and idle
    Connected,
    /// Sampling data for the given measurement
    Sampling(MeasurementType),
    /// Device reported an unrecoverable fault
    Faulted,
}

/// Errors that can occur while talking to a device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Nonzero status returned by the device interface
    #[error("Device returned status {code}: {message}")]
    Status { code: i32, message: String },
    /// Device was unplugged or the link dropped
    #[error("Device disconnected")]
    Disconnected,
    /// A data request was issued while no measurement is running
    #[error("Device is not sampling")]
    NotSampling,
    /// A start request was issued while a measurement is running
    #[error("Device is already sampling")]
    AlreadySampling,
    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result of a single data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fetched {
    /// Number of complete sample sets the device reported.
    pub sample_sets: u32,
    /// Number of words written at the front of the buffer.
    pub words: usize,
}

impl Fetched {
    pub const NONE: Fetched = Fetched {
        sample_sets: 0,
        words: 0,
    };
}

/// Trait that all sampling devices must implement.
///
/// Discovery, connection and configuration upload happen before a handle is
/// handed to the pipeline; from then on only the calls below are used.
pub trait DeviceHandle: Send + 'static {
    /// The channel list used for the given measurement type. Must be stable
    /// until the measurement stops.
    fn channels(&self, measurement: MeasurementType) -> Result<Vec<ChannelDescriptor>, DeviceError>;

    /// Ask the device to start producing samples.
    fn start_sampling(&mut self, measurement: MeasurementType) -> Result<(), DeviceError>;

    /// Ask the device to stop producing samples.
    fn stop_sampling(&mut self) -> Result<(), DeviceError>;

    /// Copy the next chunk of buffered samples into `buffer`.
    ///
    /// # Arguments
    /// * `buffer` - Scratch buffer owned by the caller, reused between calls.
    /// * `timeout` - Upper bound for how long the call may wait for data.
    ///
    /// # Returns
    /// How many sample sets and words were written. Zero sample sets is a
    /// normal outcome, not an error.
    fn fetch_block(&mut self, buffer: &mut [u32], timeout: Duration) -> Result<Fetched, DeviceError>;
}

/// A device shared between the controlling thread and the fetcher thread.
pub type SharedDevice = Arc<Mutex<Box<dyn DeviceHandle>>>;

/// Wraps a device for use by a pipeline.
pub fn shared<D: DeviceHandle>(device: D) -> SharedDevice {
    Arc::new(Mutex::new(Box::new(device)))
}
