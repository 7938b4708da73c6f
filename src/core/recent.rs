//! Pointer to the most recently created or opened index database.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{NebbyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentDatabase {
    pub database: PathBuf,
    pub recorded_at: DateTime<Utc>,
}

/// JSON file holding a single [`RecentDatabase`].
#[derive(Debug, Clone)]
pub struct RecentDatabaseStore {
    path: PathBuf,
}

impl RecentDatabaseStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nothing was recorded yet. A file that is not valid JSON is
    /// an error.
    pub fn load(&self) -> Result<Option<RecentDatabase>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NebbyError::io(&self.path, e)),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Replace the recorded database. Written to a sibling temp file and
    /// renamed into place.
    pub fn store(&self, database: &Path) -> Result<RecentDatabase> {
        let entry = RecentDatabase {
            database: database.to_path_buf(),
            recorded_at: Utc::now(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| NebbyError::io(parent, e))?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(&entry)?;
        fs::write(&tmp_path, data).map_err(|e| NebbyError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| NebbyError::io(&self.path, e))?;
        Ok(entry)
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NebbyError::io(&self.path, e)),
        }
    }
}
