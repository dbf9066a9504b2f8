//! CSV writer consumer for recording decoded samples to files.

use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Local;
use eeg_types::{DecodedSampleBatch, DeviceId};
use tracing::{info, warn};

use crate::error::ConsumerError;
use crate::hub::Consumer;

/// Writes one CSV row per sample set: the block sequence followed by the
/// decoded value of every channel.
pub struct FileWriterConsumer {
    name: String,
    path: PathBuf,
    columns: usize,
    writer: Mutex<csv::Writer<BufWriter<File>>>,
    rows: AtomicU64,
}

impl FileWriterConsumer {
    /// Creates `<dir>/<prefix>_<timestamp>.csv` and writes the header.
    pub fn create(dir: impl AsRef<Path>, prefix: &str, channel_names: &[String]) -> Result<Self, ConsumerError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            create_dir_all(dir)?;
        }
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = dir.join(format!("{}_{}.csv", prefix.trim_end_matches(".csv"), timestamp));
        Self::create_at(path, channel_names)
    }

    /// Creates the file at exactly `path`, truncating it.
    pub fn create_at(path: impl Into<PathBuf>, channel_names: &[String]) -> Result<Self, ConsumerError> {
        let path = path.into();
        let file = File::create(&path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(std::iter::once("sequence").chain(channel_names.iter().map(String::as_str)))?;
        info!("Recording to {:?}", path);

        Ok(Self {
            name: format!("csv:{}", path.display()),
            path,
            columns: channel_names.len(),
            writer: Mutex::new(writer),
            rows: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn flush(&self) -> Result<(), ConsumerError> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner()).flush()?;
        Ok(())
    }
}

impl Consumer for FileWriterConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_batch(&self, _device: DeviceId, batch: &Arc<DecodedSampleBatch>) -> Result<(), ConsumerError> {
        if batch.channels_per_set != self.columns {
            return Err(ConsumerError::Other(format!(
                "batch has {} channels, file has {} columns",
                batch.channels_per_set, self.columns
            )));
        }

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let sequence = batch.sequence.to_string();
        for set in batch.sample_sets() {
            writer.write_record(std::iter::once(sequence.clone()).chain(set.iter().map(|v| v.to_string())))?;
        }
        self.rows.fetch_add(batch.sample_set_count as u64, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for FileWriterConsumer {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["EEG1".to_string(), "COUNTER".to_string()];
        let consumer = FileWriterConsumer::create(dir.path(), "session", &names).unwrap();
        assert!(consumer
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("session_"));

        let batch = Arc::new(DecodedSampleBatch::new(4, 2, 2, vec![0.5, 1.0, -0.25, 2.0]));
        consumer.on_batch(DeviceId(0), &batch).unwrap();
        consumer.flush().unwrap();
        assert_eq!(consumer.rows_written(), 2);

        let contents = std::fs::read_to_string(consumer.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["sequence,EEG1,COUNTER", "4,0.5,1", "4,-0.25,2"]);
    }

    #[test]
    fn test_rejects_mismatched_width() {
        let dir = tempfile::tempdir().unwrap();
        let consumer = FileWriterConsumer::create_at(dir.path().join("out.csv"), &["A".to_string()]).unwrap();
        let batch = Arc::new(DecodedSampleBatch::new(0, 1, 2, vec![1.0, 2.0]));
        assert!(matches!(
            consumer.on_batch(DeviceId(0), &batch),
            Err(ConsumerError::Other(_))
        ));
    }
}
