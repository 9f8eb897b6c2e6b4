use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::status::WorkItemStatus;

/// Keys with this prefix are aggregate (epic) records, not deliverable work.
const EPIC_PREFIX: &str = "epic-";
/// Keys with this suffix are retrospective records, not deliverable work.
const RETROSPECTIVE_SUFFIX: &str = "-retrospective";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors that can occur while reading or writing the ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// IO error while reading or replacing the ledger file.
    #[error("ledger IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

fn line_regex() -> Option<&'static Regex> {
    static LINE: OnceLock<Option<Regex>> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(
            r"^(?P<indent>[ \t]*)(?P<key>[A-Za-z0-9][A-Za-z0-9._/-]*):[ \t]+(?P<status>[A-Za-z][A-Za-z_-]*)(?P<rest>(?:[ \t][^\r\n]*)?)$",
        )
        .ok()
    })
    .as_ref()
}

fn depends_regex() -> Option<&'static Regex> {
    static DEPENDS: OnceLock<Option<Regex>> = OnceLock::new();
    DEPENDS
        .get_or_init(|| Regex::new(r"(?i)#\s*(?:depends[-_ ]on|after)\s*:\s*(?P<deps>.*)$").ok())
        .as_ref()
}

/// One `key: status` line of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Stable work item key, e.g. `5-7-feature-name`.
    pub key: String,
    /// Current status.
    pub status: WorkItemStatus,
    /// Keys that must be done before this item may start, in ledger order.
    pub prerequisites: Vec<String>,
    /// Zero-based line index in the ledger file.
    pub line: usize,
}

impl LedgerEntry {
    /// Whether this entry is an aggregate or retrospective record.
    pub fn is_aggregate(&self) -> bool {
        is_aggregate_key(&self.key)
    }
}

/// Whether a key names an epic or retrospective record by convention.
pub fn is_aggregate_key(key: &str) -> bool {
    key.starts_with(EPIC_PREFIX) || key.ends_with(RETROSPECTIVE_SUFFIX)
}

/// Immutable view of the ledger at the moment it was read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    entries: Vec<LedgerEntry>,
}

impl LedgerSnapshot {
    /// Parse ledger text. Lines that are not `key: status` entries are ignored.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .split_inclusive('\n')
            .enumerate()
            .filter_map(|(line, raw)| {
                let (body, _) = split_terminator(raw);
                let caps = line_regex()?.captures(body)?;
                let prerequisites = caps
                    .name("rest")
                    .and_then(|rest| depends_regex()?.captures(rest.as_str()))
                    .and_then(|deps| deps.name("deps"))
                    .map(|deps| {
                        deps.as_str()
                            .split(',')
                            .map(str::trim)
                            .filter(|dep| !dep.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Some(LedgerEntry {
                    key: caps["key"].to_string(),
                    status: WorkItemStatus::parse(&caps["status"]),
                    prerequisites,
                    line,
                })
            })
            .collect();
        Self { entries }
    }

    /// All entries in ledger order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Find the entry for `key`: an exact match, otherwise the first entry
    /// whose key extends `key` with a `-` separated suffix (`7-1` finds
    /// `7-1-login-form`).
    pub fn resolve(&self, key: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .or_else(|| {
                let prefix = format!("{key}-");
                self.entries.iter().find(|entry| entry.key.starts_with(&prefix))
            })
    }

    /// Status of `key`, resolved as in [`LedgerSnapshot::resolve`].
    pub fn status_of(&self, key: &str) -> Option<&WorkItemStatus> {
        self.resolve(key).map(|entry| &entry.status)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerUpdate {
    /// The status line was rewritten.
    Updated { key: String, previous: WorkItemStatus },
    /// The entry already had the requested status; the file was not touched.
    Unchanged { key: String },
    /// No entry matched; nothing was inserted.
    KeyMissing,
    /// The update would have moved the item backwards; the file was not touched.
    RegressionRefused { key: String, current: WorkItemStatus },
}

/// File-backed status ledger.
///
/// Every read goes to disk so concurrent writers are always observed.
/// Writes replace the whole file through a temp file and a rename, so a
/// reader sees either the old or the new content, never a partial line.
#[derive(Debug)]
pub struct StatusLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StatusLedger {
    /// Create a ledger handle for `path`. The file is not read until needed.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current ledger content.
    pub fn snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        let content = self.read()?;
        Ok(LedgerSnapshot::parse(&content))
    }

    /// Set the status of `key`, replacing only the status token on its line.
    pub fn update_status(&self, key: &str, status: WorkItemStatus) -> LedgerResult<LedgerUpdate> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let content = self.read()?;
        let snapshot = LedgerSnapshot::parse(&content);
        let Some(entry) = snapshot.resolve(key) else {
            warn!(
                component = "ledger",
                work_item = key,
                path = %self.path.display(),
                "work item not present in ledger, leaving file untouched"
            );
            return Ok(LedgerUpdate::KeyMissing);
        };

        if entry.status == status {
            debug!(component = "ledger", work_item = %entry.key, status = %status, "status unchanged");
            return Ok(LedgerUpdate::Unchanged {
                key: entry.key.clone(),
            });
        }

        if !entry.status.allows_transition_to(&status) {
            warn!(
                component = "ledger",
                work_item = %entry.key,
                current = %entry.status,
                requested = %status,
                "refusing to move work item backwards"
            );
            return Ok(LedgerUpdate::RegressionRefused {
                key: entry.key.clone(),
                current: entry.status.clone(),
            });
        }

        let updated = replace_status_on_line(&content, entry.line, &status);
        self.write_atomic(updated.as_bytes())?;

        info!(
            component = "ledger",
            work_item = %entry.key,
            from = %entry.status,
            to = %status,
            "ledger status updated"
        );
        Ok(LedgerUpdate::Updated {
            key: entry.key.clone(),
            previous: entry.status.clone(),
        })
    }

    fn read(&self) -> LedgerResult<String> {
        fs::read_to_string(&self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn write_atomic(&self, data: &[u8]) -> LedgerResult<()> {
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger".to_string());
        let temp_path = dir.join(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        };

        if let Err(err) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(io_err(err));
        }
        Ok(())
    }
}

fn split_terminator(raw: &str) -> (&str, &str) {
    if let Some(body) = raw.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = raw.strip_suffix('\n') {
        (body, "\n")
    } else {
        (raw, "")
    }
}

fn replace_status_on_line(content: &str, target: usize, status: &WorkItemStatus) -> String {
    let mut out = String::with_capacity(content.len() + 16);
    for (line, raw) in content.split_inclusive('\n').enumerate() {
        if line != target {
            out.push_str(raw);
            continue;
        }
        let (body, terminator) = split_terminator(raw);
        match line_regex()
            .and_then(|re| re.captures(body))
            .and_then(|caps| caps.name("status"))
        {
            Some(token) => {
                out.push_str(&body[..token.start()]);
                out.push_str(status.as_str());
                out.push_str(&body[token.end()..]);
                out.push_str(terminator);
            }
            None => out.push_str(raw),
        }
    }
    out
}
