//! One measurement session: device, pipeline and consumers wired together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use eeg_sensor::{shared, DeviceHandle, MockDevice};
use eeg_types::DeviceId;
use pipeline::{
    Consumer, FileWriterConsumer, PipelineEvent, PlotterConsumer, SamplingContext, SamplingPipeline, StopReport,
    StreamConsumer,
};
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;

/// How often the live view is summarized in the log.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a finished session.
#[derive(Debug)]
pub struct SessionSummary {
    pub report: StopReport,
    /// Batches that reached the streaming task
    pub streamed_batches: u64,
    pub csv_file: Option<PathBuf>,
}

/// Runs a measurement until Ctrl-C, until `duration` elapses or until the
/// pipeline faults, then stops it and reports.
pub async fn run(config: DaemonConfig, duration: Option<Duration>) -> anyhow::Result<SessionSummary> {
    let device_id = DeviceId(config.device_id);
    let device = MockDevice::new(config.device.clone()).context("Failed to create mock device")?;
    let channel_names: Vec<String> = device
        .channels(config.measurement)?
        .into_iter()
        .map(|c| c.name)
        .collect();

    let context = SamplingContext::with_event_capacity(config.event_capacity);
    let hub = context.hub().clone();

    // --- Consumers ---
    let writer = match &config.csv_path {
        Some(dir) => {
            let writer = Arc::new(FileWriterConsumer::create(dir, "recording", &channel_names)?);
            hub.subscribe(device_id, writer.clone());
            Some(writer)
        }
        None => None,
    };
    let plotter = Arc::new(PlotterConsumer::new("plotter", config.plot_window));
    hub.subscribe(device_id, plotter.clone());
    let (stream, stream_rx) = StreamConsumer::channel("stream", config.stream_capacity);
    let stream: Arc<dyn Consumer> = Arc::new(stream);
    hub.subscribe(device_id, stream.clone());

    // Stand-in for a network client: counts what it receives.
    let streamer = tokio::spawn(async move {
        let mut batches = 0u64;
        while let Ok(batch) = stream_rx.recv_async().await {
            batches += 1;
            debug!(sequence = batch.sequence, sets = batch.sample_set_count, "Streamed batch");
        }
        batches
    });

    // --- Pipeline ---
    let mut pipeline = SamplingPipeline::new(device_id, shared(device), config.pipeline.clone(), context.clone())?;
    let events = context.events();
    pipeline.start(config.measurement)?;

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut status = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping measurement");
                break;
            }
            _ = &mut deadline => {
                info!("Measurement duration elapsed");
                break;
            }
            _ = status.tick() => {
                let latest: Vec<f64> = plotter.snapshot().iter().filter_map(|c| c.last().copied()).collect();
                let stats = pipeline.stats();
                info!(
                    published = stats.batches_published,
                    dropped = stats.blocks_dropped,
                    "Latest values: {:?}",
                    latest
                );
            }
            event = events.recv_async() => match event {
                Ok(PipelineEvent::Fault { device, message }) => {
                    error!(device = %device, "Pipeline fault: {}", message);
                    break;
                }
                Ok(event) => log_event(&event),
                Err(_) => break,
            },
        }
    }

    // Joining the workers blocks, keep it off the async runtime.
    let report = tokio::task::spawn_blocking(move || pipeline.stop())
        .await
        .context("Stop task panicked")??;
    for event in events.try_iter() {
        log_event(&event);
    }

    // Closing the stream lets the streaming task finish.
    hub.unsubscribe(device_id, &stream);
    drop(stream);
    let streamed_batches = streamer.await.context("Streaming task panicked")?;

    let csv_file = match writer {
        Some(writer) => {
            writer.flush()?;
            info!(rows = writer.rows_written(), "Recording saved to {:?}", writer.path());
            Some(writer.path().to_path_buf())
        }
        None => None,
    };

    info!(
        measurement = %report.measurement,
        reason = ?report.reason,
        stats = ?report.stats,
        "Session finished"
    );
    Ok(SessionSummary {
        report,
        streamed_batches,
        csv_file,
    })
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::BlockDropped { .. }
        | PipelineEvent::FormatMismatch { .. }
        | PipelineEvent::CounterDrift { .. }
        | PipelineEvent::ConsumerFailed { .. } => warn!("{}", to_json(event)),
        _ => info!("{}", to_json(event)),
    }
}

fn to_json(event: &PipelineEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| format!("{:?} ({})", event, e))
}
