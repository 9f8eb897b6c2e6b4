use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::FailureStoreConfig;
use super::record::FailureRecord;

const FAILURES_DIR_NAME: &str = "failures";
const RECORD_EXTENSION: &str = "json";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors that can occur while storing failure records.
#[derive(Error, Debug)]
pub enum FailureStoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid work item key")]
    InvalidKey,
}

/// Result type for failure store operations.
pub type FailureStoreResult<T> = Result<T, FailureStoreError>;

/// A failure record together with the file it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFailure {
    pub path: PathBuf,
    pub record: FailureRecord,
}

/// Failure records backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct FailureStore {
    root_dir: PathBuf,
    retention_days: u64,
}

impl FailureStore {
    /// Create a store under `<state_dir>/failures`.
    pub fn new(state_dir: impl Into<PathBuf>, config: FailureStoreConfig) -> FailureStoreResult<Self> {
        let root_dir = state_dir.into().join(FAILURES_DIR_NAME);
        fs::create_dir_all(&root_dir)?;
        Ok(Self {
            root_dir,
            retention_days: config.retention_days,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Write `record` to a new file and return its path. Never replaces an
    /// existing record.
    pub fn record(&self, record: &FailureRecord) -> FailureStoreResult<PathBuf> {
        let stem = file_stem(&record.work_item_key).ok_or(FailureStoreError::InvalidKey)?;
        let json = serde_json::to_string_pretty(record)?;

        let temp_path = self.root_dir.join(format!(
            ".{}.{}.{}.tmp",
            stem,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let claimed = write_temp(&temp_path, json.as_bytes())
            .and_then(|()| self.claim_next(&stem, &temp_path));
        let _ = fs::remove_file(&temp_path);
        let path = claimed?;

        info!(
            component = "failure",
            work_item = %record.work_item_key,
            stage = %record.stage,
            path = %path.display(),
            "failure record written"
        );
        Ok(path)
    }

    /// Stored records, oldest first, optionally restricted to one key.
    pub fn list(&self, key: Option<&str>) -> FailureStoreResult<Vec<StoredFailure>> {
        let mut failures = Vec::new();
        for path in self.record_files()? {
            let Some(record) = read_record(&path) else {
                continue;
            };
            if key.is_some_and(|k| k != record.work_item_key) {
                continue;
            }
            failures.push(StoredFailure { path, record });
        }
        failures.sort_by(|a, b| {
            a.record
                .recorded_at
                .cmp(&b.record.recorded_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(failures)
    }

    /// Delete records older than the retention period.
    pub fn prune(&self) -> FailureStoreResult<usize> {
        if self.retention_days == 0 {
            return Ok(0);
        }

        let cutoff = i64::try_from(self.retention_days)
            .ok()
            .and_then(TimeDelta::try_days)
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            debug!(
                component = "failure",
                retention_days = self.retention_days,
                "retention period exceeds the calendar, keeping every record"
            );
            return Ok(0);
        };
        let mut deleted = 0;

        for path in self.record_files()? {
            let Some(record) = read_record(&path) else {
                continue;
            };
            if record.recorded_at < cutoff {
                fs::remove_file(&path)?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(component = "failure", deleted, retention_days = self.retention_days, "pruned failure records");
        }
        Ok(deleted)
    }

    /// Link the finished temp file under the first free sequence number.
    /// Linking fails on an existing name, so a concurrent writer can never
    /// have its record replaced.
    fn claim_next(&self, stem: &str, temp_path: &Path) -> io::Result<PathBuf> {
        let mut sequence = 1u32;
        loop {
            let candidate = self.record_path(stem, sequence);
            match fs::hard_link(temp_path, &candidate) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => sequence += 1,
                Err(err) => return Err(err),
            }
        }
    }

    fn record_path(&self, stem: &str, sequence: u32) -> PathBuf {
        if sequence == 1 {
            self.root_dir.join(format!("{}.{}", stem, RECORD_EXTENSION))
        } else {
            self.root_dir
                .join(format!("{}.{}.{}", stem, sequence, RECORD_EXTENSION))
        }
    }

    fn record_files(&self) -> FailureStoreResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.root_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if !hidden && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn write_temp(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn read_record(path: &Path) -> Option<FailureRecord> {
    let parsed = fs::read_to_string(path)
        .map_err(FailureStoreError::from)
        .and_then(|content| serde_json::from_str(&content).map_err(FailureStoreError::from));
    match parsed {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(component = "failure", path = %path.display(), error = %err, "skipping unreadable failure record");
            None
        }
    }
}

/// File-name-safe form of a work item key.
fn file_stem(key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some(
        key.chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                other => other,
            })
            .collect::<String>()
            .trim_start_matches('.')
            .to_string(),
    )
    .filter(|stem| !stem.is_empty())
}
