//! Operational log sink
//!
//! Every outcome of a run lands in two places: a JSON-lines audit file the
//! scheduler can alert on, and the `tracing` stream. Names that could not be
//! resolved to a directory object go to a separate flat file for review.

use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

/// Fixed event codes, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    RunStarted,
    RunFinished,
    MemberAdded,
    MemberRemoved,
    MemberAddFailed,
    MemberRemoveFailed,
    DeviceUnresolved,
    TargetSkipped,
    PrimaryUserRemoved,
    PrimaryUserRemoveFailed,
    DuplicateDeleted,
    DuplicateDeleteFailed,
    RetiredDeleted,
    RetiredDeleteFailed,
    ComputerDeleted,
    ComputerRenamed,
    ComputerDeferred,
    ComputerFailed,
}

impl EventCode {
    pub fn code(self) -> u16 {
        match self {
            EventCode::RunStarted => 1000,
            EventCode::RunFinished => 1001,
            EventCode::MemberAdded => 1100,
            EventCode::MemberRemoved => 1101,
            EventCode::MemberAddFailed => 1110,
            EventCode::MemberRemoveFailed => 1111,
            EventCode::DeviceUnresolved => 1120,
            EventCode::TargetSkipped => 1130,
            EventCode::PrimaryUserRemoved => 1200,
            EventCode::PrimaryUserRemoveFailed => 1210,
            EventCode::DuplicateDeleted => 1300,
            EventCode::DuplicateDeleteFailed => 1310,
            EventCode::RetiredDeleted => 1400,
            EventCode::RetiredDeleteFailed => 1410,
            EventCode::ComputerDeleted => 1500,
            EventCode::ComputerRenamed => 1501,
            EventCode::ComputerDeferred => 1502,
            EventCode::ComputerFailed => 1510,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<Utc>,
    pub code: u16,
    pub severity: Severity,
    pub message: String,
}

/// Append-only JSON-lines log. A sink without a path only emits tracing events.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn info(&self, code: EventCode, message: impl Into<String>) {
        self.record(code, Severity::Information, message.into());
    }

    pub fn warn(&self, code: EventCode, message: impl Into<String>) {
        self.record(code, Severity::Warning, message.into());
    }

    pub fn error(&self, code: EventCode, message: impl Into<String>) {
        self.record(code, Severity::Error, message.into());
    }

    fn record(&self, code: EventCode, severity: Severity, message: String) {
        match severity {
            Severity::Information => tracing::info!(code = code.code(), "{}", message),
            Severity::Warning => tracing::warn!(code = code.code(), "{}", message),
            Severity::Error => tracing::error!(code = code.code(), "{}", message),
        }

        let Some(path) = &self.path else {
            return;
        };

        let entry = AuditEntry {
            timestamp: Utc::now(),
            code: code.code(),
            severity,
            message,
        };

        // A broken audit file must not stop the run; the tracing event above still went out.
        if let Err(e) = append_line(path, &entry) {
            tracing::error!("Failed to write audit log {}: {}", path.display(), e);
        }
    }

    #[cfg(test)]
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }
}

fn append_line(path: &Path, entry: &AuditEntry) -> Result<()> {
    let line = serde_json::to_string(entry)?;
    let mut file = open_append(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

fn open_append(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Flat list of device names that resolved to nothing, kept across runs
#[derive(Debug, Clone)]
pub struct MissingLog {
    path: PathBuf,
}

impl MissingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, target: &str, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = open_append(&self.path)?;
        for name in names {
            writeln!(file, "{}\t{}\t{}", stamp, target, name)?;
        }
        Ok(())
    }
}
