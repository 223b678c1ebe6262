use super::records::MetricRecord;
use super::ResultsError;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Streams metric records into one long-format, tab-separated table.
///
/// Records are appended in call order and flushed after every call, so a
/// sweep that dies halfway leaves a loadable table behind. Appending to an
/// existing table never rewrites its header, and identical runs produce
/// identical, repeated rows.
pub struct ResultAggregator {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
    rows: Mutex<usize>,
}

impl ResultAggregator {
    pub fn create(path: &Path) -> Result<Self, ResultsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let has_content = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(!has_content)
            .from_writer(file);
        log::debug!(
            "{} metrics table '{}'",
            if has_content { "Appending to" } else { "Creating" },
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            rows: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one run's records as a contiguous block.
    pub fn record(&self, records: &[MetricRecord]) -> Result<(), ResultsError> {
        let mut writer = self.writer.lock().map_err(|_| ResultsError::Poisoned)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        let mut rows = self.rows.lock().map_err(|_| ResultsError::Poisoned)?;
        *rows += records.len();
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows.lock().map(|rows| *rows).unwrap_or(0)
    }

    /// Flushes and closes the table, returning its path.
    pub fn finalize(self) -> Result<PathBuf, ResultsError> {
        let mut writer = self.writer.into_inner().map_err(|_| ResultsError::Poisoned)?;
        writer.flush()?;
        let rows = self.rows.into_inner().unwrap_or(0);
        log::info!("Wrote {} metric rows to '{}'", rows, self.path.display());
        Ok(self.path)
    }
}

/// Reads a metrics table back, e.g. for analysis or tests.
pub fn read_table(path: &Path) -> Result<Vec<MetricRecord>, ResultsError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<MetricRecord>, csv::Error>>()?;
    Ok(records)
}
