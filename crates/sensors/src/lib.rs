pub mod types;
pub mod mock_eeg;
pub mod scripted;

// Re-export the main types that users need
pub use types::{shared, DeviceError, DeviceHandle, Fetched, SharedDevice};
pub use mock_eeg::{MockDevice, MockDeviceConfig};
pub use scripted::{ScriptCalls, ScriptedDevice, ScriptedPoll};
