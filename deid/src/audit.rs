//! Append-only CSV log of archived values and renamed files.
use crate::error::{Result, WriteCsvSnafu, WriteFileSnafu};
use snafu::ResultExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// A row of the audit log:
/// the source file, the field or event, and the recorded value.
pub type AuditRow = [String; 3];

/// Handle to a CSV audit log.
///
/// Rows are appended in batches,
/// each batch opening the file and flushing it before returning,
/// so that entries already written survive a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Open a log file for appending,
    /// creating it if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(WriteFileSnafu { path: &path })?;
        Ok(AuditLog { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows to the log.
    pub fn append(&self, rows: &[AuditRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(WriteFileSnafu { path: &self.path })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for row in rows {
            writer
                .write_record(row)
                .context(WriteCsvSnafu { path: &self.path })?;
        }
        writer.flush().context(WriteFileSnafu { path: &self.path })?;
        Ok(())
    }
}
