use std::time::Duration;

use eeg_sensor::MockDeviceConfig;
use eeg_types::MeasurementType;
use pipeline::{PipelineConfig, PipelineError, StopReason};
use sampling_daemon::config::DaemonConfig;
use sampling_daemon::session;

fn test_config() -> DaemonConfig {
    DaemonConfig {
        pipeline: PipelineConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
        device: MockDeviceConfig {
            sample_rate: 1000,
            eeg_channels: 4,
            ..Default::default()
        },
        stream_capacity: 1024,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_timed_session_records_and_streams() {
    let dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        csv_path: Some(dir.path().to_path_buf()),
        ..test_config()
    };

    let summary = session::run(config, Some(Duration::from_millis(300))).await.unwrap();
    let stats = summary.report.stats;
    assert_eq!(summary.report.reason, StopReason::Requested);
    assert!(stats.batches_published > 0);
    assert_eq!(summary.streamed_batches, stats.batches_published);
    assert_eq!(stats.drift_warnings, 0);

    let csv = std::fs::read_to_string(summary.csv_file.unwrap()).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("sequence,EEG1,EEG2,EEG3,EEG4,AUX1,COUNTER"));
    assert_eq!(lines.count() as u64, stats.sample_sets_decoded);
}

#[tokio::test]
async fn test_impedance_session() {
    let config = DaemonConfig {
        measurement: MeasurementType::Impedance,
        ..test_config()
    };
    let summary = session::run(config, Some(Duration::from_millis(150))).await.unwrap();
    assert_eq!(summary.report.measurement_type, MeasurementType::Impedance);
    assert!(summary.csv_file.is_none());
}

#[tokio::test]
async fn test_device_fault_ends_session_early() {
    let mut config = test_config();
    config.device.fail_after_polls = Some(5);

    let summary = session::run(config, Some(Duration::from_secs(30))).await.unwrap();
    assert!(matches!(
        summary.report.reason,
        StopReason::Fault(PipelineError::DeviceCommunication(_))
    ));
}
