//! Durable JSON persistence
//!
//! *pool-config* and *pool-state* are pretty-printed JSON documents with a
//! trailing newline. Writes are atomic: serialize to a temp file in the
//! same directory, fsync, then rename over the target, so a crash mid-write
//! never leaves a torn file. An unparseable file on load is quarantined to
//! `<name>.corrupt-<timestamp>.json` and replaced with defaults.

use crate::error::{Result, TritonError};
use crate::logging::get_logger;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What `PersistFile::load_or_default` found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// File existed and parsed
    Loaded,
    /// No file; defaults instantiated
    Missing,
    /// File existed but did not parse; quarantined, defaults instantiated
    Corrupt,
}

/// One durable JSON document
pub struct PersistFile {
    path: PathBuf,
    logger: crate::logging::StructuredLogger,
}

impl PersistFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            logger: get_logger("persistence"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, falling back to defaults on a missing file and
    /// quarantining a corrupt one
    pub fn load_or_default<T: DeserializeOwned + Default>(&self) -> (T, LoadOutcome) {
        if !self.path.exists() {
            self.logger.info(&format!(
                "No file at {}, using defaults",
                self.path.display()
            ));
            return (T::default(), LoadOutcome::Missing);
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                self.logger
                    .warn(&format!("Unreadable {}: {}", self.path.display(), e));
                self.quarantine();
                return (T::default(), LoadOutcome::Corrupt);
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => {
                self.logger
                    .debug(&format!("Loaded {}", self.path.display()));
                (value, LoadOutcome::Loaded)
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Corrupt {}: {}", self.path.display(), e));
                self.quarantine();
                (T::default(), LoadOutcome::Corrupt)
            }
        }
    }

    /// Move the broken file aside so its bytes survive for inspection
    fn quarantine(&self) {
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let quarantined = self
            .path
            .with_file_name(format!("{}.corrupt-{}.json", stem, timestamp));
        match std::fs::rename(&self.path, &quarantined) {
            Ok(()) => self.logger.warn(&format!(
                "Quarantined corrupt file to {}",
                quarantined.display()
            )),
            Err(e) => self
                .logger
                .error(&format!("Failed to quarantine corrupt file: {}", e)),
        }
    }

    /// Atomically replace the document: temp file, fsync, rename
    pub fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        let path_str = self.path.display().to_string();
        let mut contents = serde_json::to_string_pretty(value)
            .map_err(|e| TritonError::persistence(path_str.clone(), e.to_string()))?;
        contents.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TritonError::persistence(path_str.clone(), e.to_string()))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)?;
            Ok(())
        })();

        result.map_err(|e| {
            std::fs::remove_file(&tmp).ok();
            TritonError::persistence(path_str, e.to_string())
        })
    }
}
