use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;

use util::file_name_str;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Cannot derive a unit id from {0:?}")]
    NoUnitId(PathBuf),
}

/// One sequencer run or one sample-sheet-derived comparison.
/// Recomputed on every scan; nothing about it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Deterministic identity, used to name all of the unit's files.
    pub id: String,
    /// Location of the unit's raw inputs.
    pub path: PathBuf,
}

impl WorkUnit {
    /// A unit named after the last component of `path` (run directories).
    pub fn from_dir_name(path: PathBuf) -> Result<Self> {
        let id = file_name_str(&path)?.to_owned();
        Ok(Self { id, path })
    }

    /// A unit named after a file with the part matching `suffix` removed.
    pub fn from_file_name(path: PathBuf, suffix: &Regex) -> Result<Self> {
        let name = file_name_str(&path)?;
        let id = suffix.replace(name, "").into_owned();
        if id.is_empty() || id == name {
            return Err(Error::NoUnitId(path).into());
        }
        Ok(Self { id, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
