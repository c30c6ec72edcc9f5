//! JSON-lines session store implementation.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "jsonl";

/// A session name and its on-disk encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// File name for this key: every non-alphanumeric char becomes `_`.
    pub fn file_name(&self) -> String {
        let stem: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{stem}.{EXTENSION}")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Summary of a stored session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// File stem of the session (the encoded key).
    pub name: String,
    pub path: PathBuf,
    pub record_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// A directory of session logs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open or create a session store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the log for a session. The file is created on first append.
    pub fn log(&self, key: impl Into<SessionKey>) -> SessionLog {
        let key = key.into();
        SessionLog {
            path: self.dir.join(key.file_name()),
            key,
        }
    }

    /// Start a new, empty session. Fails if the session already has a file.
    pub fn create(&self, key: impl Into<SessionKey>) -> Result<SessionLog> {
        let log = self.log(key);
        match OpenOptions::new().write(true).create_new(true).open(&log.path) {
            Ok(_) => Ok(log),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::Exists(log.key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a session's file. Returns whether it existed.
    pub fn delete(&self, key: impl Into<SessionKey>) -> Result<bool> {
        let log = self.log(key);
        let removed = log.clear()?;
        if removed {
            tracing::debug!(session = %log.key, "deleted session");
        }
        Ok(removed)
    }

    /// List all sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let modified = fs::metadata(&path)?.modified()?;
            sessions.push(SessionSummary {
                name: name.to_string(),
                record_count: count_records(&path)?,
                updated_at: DateTime::<Utc>::from(modified),
                path,
            });
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

/// Append-only log for a single session.
#[derive(Debug, Clone)]
pub struct SessionLog {
    key: SessionKey,
    path: PathBuf,
}

impl SessionLog {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Append one record as a single JSON line.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Load every record in append order. A missing file is an empty log.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|source| Error::Corrupt {
                path: self.path.clone(),
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }

        tracing::debug!(session = %self.key, count = records.len(), "loaded session log");
        Ok(records)
    }

    /// Remove all records. Returns whether a file existed.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn count_records(path: &Path) -> Result<usize> {
    let file = fs::File::open(path)?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
