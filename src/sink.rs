//! Append-only tabular outputs: the per-message audit log and the raw
//! group-report archive.

use crate::error::{DigestError, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::PathBuf;

pub const AUDIT_COLUMNS: [&str; 8] = [
    "Date", "Client", "Sender", "Subject", "Status", "VM Total", "Success", "Details",
];

pub const ARCHIVE_COLUMNS: [&str; 5] = ["Date", "Time", "Sender", "Subject", "Body"];

pub trait ReportSink {
    /// Makes sure the first row is exactly `columns`.
    fn ensure_header(&mut self, columns: &[&str]) -> Result<()>;

    fn append_row(&mut self, row: &[String]) -> Result<()>;
}

/// One audit log row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub date: DateTime<Local>,
    pub client: String,
    pub sender: String,
    pub subject: String,
    pub status: String,
    pub vm_total: String,
    pub success: String,
    pub details: String,
}

impl AuditRow {
    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.date.format("%d/%m/%Y %H:%M:%S").to_string(),
            self.client.clone(),
            self.sender.clone(),
            self.subject.clone(),
            self.status.clone(),
            self.vm_total.clone(),
            self.success.clone(),
            self.details.clone(),
        ]
    }
}

/// CSV file sink. The header row is rewritten in place when it differs.
pub struct CsvReportSink {
    path: PathBuf,
}

impl CsvReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn sink_error(&self, e: impl std::fmt::Display) -> DigestError {
        DigestError::Sink(format!("{}: {}", self.path.display(), e))
    }

    fn read_records(&self) -> Result<Vec<csv::StringRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.sink_error(e))?;
        reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.sink_error(e))
    }
}

impl ReportSink for CsvReportSink {
    fn ensure_header(&mut self, columns: &[&str]) -> Result<()> {
        let records = self.read_records()?;
        if let Some(first) = records.first() {
            if first.iter().eq(columns.iter().copied()) {
                return Ok(());
            }
            log::info!("Rewriting header of {}", self.path.display());
        }

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.sink_error(e))?;
        writer.write_record(columns).map_err(|e| self.sink_error(e))?;
        for record in records.iter().skip(1) {
            writer.write_record(record).map_err(|e| self.sink_error(e))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn append_row(&mut self, row: &[String]) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        writer.write_record(row).map_err(|e| self.sink_error(e))?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps rows in memory; used by `--test-email` and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportSink for MemorySink {
    fn ensure_header(&mut self, columns: &[&str]) -> Result<()> {
        self.header = columns.iter().map(|c| c.to_string()).collect();
        Ok(())
    }

    fn append_row(&mut self, row: &[String]) -> Result<()> {
        self.rows.push(row.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn read(path: &std::path::Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let mut sink = CsvReportSink::new(&path);

        sink.ensure_header(&AUDIT_COLUMNS).unwrap();
        sink.append_row(&["a".to_string(), "b, with comma".to_string()]).unwrap();
        sink.ensure_header(&AUDIT_COLUMNS).unwrap();

        let rows = read(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], AUDIT_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>());
        assert_eq!(rows[1], vec!["a", "b, with comma"]);
    }

    #[test]
    fn test_stale_header_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.csv");
        std::fs::write(&path, "Old,Header\nkept,row\n").unwrap();

        let mut sink = CsvReportSink::new(&path);
        sink.ensure_header(&ARCHIVE_COLUMNS).unwrap();

        let rows = read(&path);
        assert_eq!(rows[0], vec!["Date", "Time", "Sender", "Subject", "Body"]);
        assert_eq!(rows[1], vec!["kept", "row"]);
    }

    #[test]
    fn test_audit_row_record() {
        let row = AuditRow {
            date: Local.with_ymd_and_hms(2025, 3, 4, 18, 5, 9).unwrap(),
            client: "ACME".to_string(),
            sender: "backup@acme.fr".to_string(),
            subject: "Backup OK".to_string(),
            status: "OK".to_string(),
            vm_total: "1".to_string(),
            success: "1".to_string(),
            details: String::new(),
        };
        let record = row.to_record();
        assert_eq!(record.len(), AUDIT_COLUMNS.len());
        assert_eq!(record[0], "04/03/2025 18:05:09");
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::default();
        sink.ensure_header(&ARCHIVE_COLUMNS).unwrap();
        sink.append_row(&["x".to_string()]).unwrap();
        assert_eq!(sink.header.len(), 5);
        assert_eq!(sink.rows, vec![vec!["x".to_string()]]);
    }
}
