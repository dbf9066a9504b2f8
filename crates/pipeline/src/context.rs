//! Process-wide state shared by every sampling pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use eeg_types::DeviceId;
use flume::Receiver;
use tracing::debug;

use crate::control::{EventSink, PipelineEvent};
use crate::hub::SampleHub;

/// Default capacity of the diagnostic event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Owns the distribution hub, the set of devices currently sampling and the
/// diagnostic event channel. Create one per process and hand an `Arc` to every
/// pipeline.
pub struct SamplingContext {
    hub: Arc<SampleHub>,
    active: Mutex<HashSet<DeviceId>>,
    events: EventSink,
    events_rx: Receiver<PipelineEvent>,
}

impl SamplingContext {
    pub fn new() -> Arc<Self> {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Arc<Self> {
        let (events, events_rx) = EventSink::channel(capacity.max(1));
        Arc::new(Self {
            hub: Arc::new(SampleHub::new()),
            active: Mutex::new(HashSet::new()),
            events,
            events_rx,
        })
    }

    pub fn hub(&self) -> &Arc<SampleHub> {
        &self.hub
    }

    /// A receiver of pipeline events. All receivers share one stream, each
    /// event goes to exactly one of them.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    pub(crate) fn event_sink(&self) -> EventSink {
        self.events.clone()
    }

    /// Marks `device` as owned by a running pipeline. Returns false if it
    /// already was.
    pub(crate) fn claim(&self, device: DeviceId) -> bool {
        let claimed = self.active.lock().unwrap_or_else(|e| e.into_inner()).insert(device);
        if claimed {
            debug!(device = %device, "Device claimed");
        }
        claimed
    }

    pub(crate) fn release(&self, device: DeviceId) {
        if self.active.lock().unwrap_or_else(|e| e.into_inner()).remove(&device) {
            debug!(device = %device, "Device released");
        }
    }

    pub fn is_active(&self, device: DeviceId) -> bool {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).contains(&device)
    }

    pub fn active_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self.active.lock().unwrap_or_else(|e| e.into_inner()).iter().copied().collect();
        devices.sort();
        devices
    }
}
