//! Integration tests for the pipeline.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eeg_sensor::{shared, MockDevice, MockDeviceConfig};
use eeg_types::{DeviceId, MeasurementType};

use crate::config::PipelineConfig;
use crate::consumers::{FileWriterConsumer, PlotterConsumer, StreamConsumer};
use crate::context::SamplingContext;
use crate::control::{PipelineEvent, StopReason};
use crate::hub::Consumer;
use crate::lifecycle::{PipelineState, SamplingPipeline};

#[test]
fn test_mock_device_end_to_end() {
    // 1. A simulated amplifier with 4 EEG channels, one AUX and a counter
    let device_config = MockDeviceConfig {
        sample_rate: 1000,
        eeg_channels: 4,
        ..Default::default()
    };
    let device = shared(MockDevice::new(device_config).unwrap());
    let channel_names: Vec<String> = device
        .lock()
        .unwrap()
        .channels(MeasurementType::Normal)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(channel_names.len(), 6);

    // 2. Register the three consumer kinds
    let context = SamplingContext::new();
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(FileWriterConsumer::create(dir.path(), "session", &channel_names).unwrap());
    let plotter = Arc::new(PlotterConsumer::new("plot", 64));
    let (stream, stream_rx) = StreamConsumer::channel("stream", 1024);
    let hub = context.hub();
    hub.subscribe(DeviceId(0), writer.clone());
    hub.subscribe(DeviceId(0), plotter.clone());
    hub.subscribe(DeviceId(0), Arc::new(stream));
    let events = context.events();

    // 3. Run a short measurement
    let config = PipelineConfig {
        poll_interval_ms: 10,
        ..Default::default()
    };
    let mut pipeline = SamplingPipeline::new(DeviceId(0), device, config, context.clone()).unwrap();
    let measurement = pipeline.start(MeasurementType::Normal).unwrap();
    thread::sleep(Duration::from_millis(250));
    let report = pipeline.stop().unwrap();

    // 4. Every decoded batch reached every consumer
    assert_eq!(report.measurement, measurement);
    assert_eq!(report.reason, StopReason::Requested);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    let stats = report.stats;
    assert!(stats.batches_published > 0);
    assert_eq!(stats.batches_published, stats.blocks_decoded);
    assert_eq!(stats.blocks_enqueued, stats.blocks_decoded + stats.blocks_dropped);
    assert_eq!(stats.delivery_failures, 0);
    assert_eq!(stats.drift_warnings, 0);

    writer.flush().unwrap();
    assert_eq!(writer.rows_written(), stats.sample_sets_decoded);

    let streamed: Vec<_> = stream_rx.try_iter().collect();
    assert_eq!(streamed.len() as u64, stats.batches_published);
    let counters: Vec<f64> = streamed.iter().flat_map(|b| b.channel(5).collect::<Vec<_>>()).collect();
    for (i, counter) in counters.iter().enumerate() {
        assert_eq!(*counter, (i + 1) as f64);
    }

    let window = plotter.snapshot();
    assert_eq!(window.len(), 6);
    assert!(window[5].len() <= 64);
    assert_eq!(window[5].last().copied(), counters.last().copied());

    // 5. Lifecycle events bracket the run
    let events: Vec<PipelineEvent> = events.try_iter().collect();
    assert!(matches!(events.first(), Some(PipelineEvent::Started { channels: 6, .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::Stopped { faulted: false, .. })));
    assert_eq!(plotter.name(), "plot");
}

#[test]
fn test_simulated_loss_is_reported() {
    let device = MockDevice::new(MockDeviceConfig {
        sample_rate: 1000,
        skip_counter_every: Some(50),
        ..Default::default()
    })
    .unwrap();
    let context = SamplingContext::new();
    let mut pipeline =
        SamplingPipeline::new(DeviceId(1), shared(device), PipelineConfig::default(), context.clone()).unwrap();

    pipeline.start(MeasurementType::Normal).unwrap();
    thread::sleep(Duration::from_millis(300));
    let report = pipeline.stop().unwrap();

    assert!(report.stats.counter_discontinuities >= 2);
    assert_eq!(report.stats.drift_warnings, 1);
    let drift_events = context
        .events()
        .try_iter()
        .filter(|e| matches!(e, PipelineEvent::CounterDrift { .. }))
        .count();
    assert_eq!(drift_events, 1);
}

#[test]
fn test_simulated_link_loss_faults_the_run() {
    let device = MockDevice::new(MockDeviceConfig {
        fail_after_polls: Some(3),
        ..Default::default()
    })
    .unwrap();
    let context = SamplingContext::new();
    let config = PipelineConfig {
        poll_interval_ms: 5,
        ..Default::default()
    };
    let mut pipeline = SamplingPipeline::new(DeviceId(2), shared(device), config, context).unwrap();

    pipeline.start(MeasurementType::Normal).unwrap();
    assert!(pipeline.wait_for_fault(Duration::from_secs(2)).is_some());
    let report = pipeline.stop().unwrap();
    assert!(report.reason.is_fault());
    assert_eq!(report.stats.polls, 4);
}
