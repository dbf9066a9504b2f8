//! Distribution hub fanning decoded batches out to consumers
//!
//! Consumers are registered per device. A publish delivers the same shared
//! batch to every consumer of that device in subscription order:
//! - The subscriber table is read-locked for the whole fan-out, so a
//!   subscribe or unsubscribe takes effect strictly between two publishes
//! - A consumer that returns an error or panics is logged, counted and marked
//!   degraded; delivery continues with the next consumer
//! - Consumers run on the decoder thread and should return quickly

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use eeg_types::{DecodedSampleBatch, DeviceId};
use tracing::{debug, warn};

use crate::error::{panic_message, ConsumerError};

/// Receiver of decoded batches.
///
/// `on_batch` is called from the decoder thread while the hub's subscriber
/// table is locked for reading; it must not call `subscribe` or `unsubscribe`
/// on the same hub.
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;

    fn on_batch(&self, device: DeviceId, batch: &Arc<DecodedSampleBatch>) -> Result<(), ConsumerError>;
}

struct Subscriber {
    consumer: Arc<dyn Consumer>,
    degraded: AtomicBool,
    failures: AtomicU64,
}

/// Outcome of delivering one batch.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub delivered: usize,
    /// Consumer name and error for every failed delivery.
    pub failures: Vec<(String, ConsumerError)>,
}

impl PublishReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Default)]
pub struct SampleHub {
    subscribers: RwLock<HashMap<DeviceId, Vec<Subscriber>>>,
}

fn same_consumer(a: &Arc<dyn Consumer>, b: &Arc<dyn Consumer>) -> bool {
    // Compare data pointers only, vtable pointers may differ between codegen units.
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl SampleHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceId, Vec<Subscriber>>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceId, Vec<Subscriber>>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `consumer` for the batches of `device`.
    pub fn subscribe(&self, device: DeviceId, consumer: Arc<dyn Consumer>) {
        let mut table = self.write();
        let list = table.entry(device).or_default();
        debug!(device = %device, consumer = consumer.name(), "New subscriber registered");
        list.push(Subscriber {
            consumer,
            degraded: AtomicBool::new(false),
            failures: AtomicU64::new(0),
        });
    }

    /// Removes `consumer` from `device`. Returns false if it was not registered.
    pub fn unsubscribe(&self, device: DeviceId, consumer: &Arc<dyn Consumer>) -> bool {
        let mut table = self.write();
        let Some(list) = table.get_mut(&device) else {
            return false;
        };
        let Some(position) = list.iter().position(|s| same_consumer(&s.consumer, consumer)) else {
            return false;
        };
        let removed = list.remove(position);
        if list.is_empty() {
            table.remove(&device);
        }
        debug!(device = %device, consumer = removed.consumer.name(), "Subscriber removed");
        true
    }

    /// Delivers `batch` to every consumer of `device`.
    pub fn publish(&self, device: DeviceId, batch: Arc<DecodedSampleBatch>) -> PublishReport {
        let table = self.read();
        let mut report = PublishReport::default();
        let Some(list) = table.get(&device) else {
            return report;
        };

        for subscriber in list {
            let consumer = &subscriber.consumer;
            let outcome = catch_unwind(AssertUnwindSafe(|| consumer.on_batch(device, &batch)))
                .unwrap_or_else(|payload| Err(ConsumerError::Panicked(panic_message(payload.as_ref()))));

            match outcome {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    let failures = subscriber.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if !subscriber.degraded.swap(true, Ordering::Relaxed) {
                        warn!(
                            device = %device,
                            consumer = consumer.name(),
                            sequence = batch.sequence,
                            "Consumer failed, marking degraded: {}",
                            err
                        );
                    } else {
                        debug!(
                            device = %device,
                            consumer = consumer.name(),
                            failures,
                            "Consumer failed again: {}",
                            err
                        );
                    }
                    report.failures.push((consumer.name().to_string(), err));
                }
            }
        }
        report
    }

    pub fn subscriber_count(&self, device: DeviceId) -> usize {
        self.read().get(&device).map_or(0, Vec::len)
    }

    /// Whether `consumer` has failed at least one delivery on `device`.
    pub fn is_degraded(&self, device: DeviceId, consumer: &Arc<dyn Consumer>) -> bool {
        self.read()
            .get(&device)
            .and_then(|list| list.iter().find(|s| same_consumer(&s.consumer, consumer)))
            .map_or(false, |s| s.degraded.load(Ordering::Relaxed))
    }

    pub fn failure_count(&self, device: DeviceId, consumer: &Arc<dyn Consumer>) -> u64 {
        self.read()
            .get(&device)
            .and_then(|list| list.iter().find(|s| same_consumer(&s.consumer, consumer)))
            .map_or(0, |s| s.failures.load(Ordering::Relaxed))
    }
}
