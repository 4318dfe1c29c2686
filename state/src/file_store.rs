use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{check_transition, check_unit_id, Error, State, StateStore};

/// Stores each unit's state as the presence of a marker file
/// `{dir}/{unit}.{state}`.
///
/// New markers are created with an exclusive create, so two writers racing
/// for the same transition cannot both succeed. Later states are reached by
/// renaming the previous marker in place; a `finished` marker therefore only
/// ever exists where a `started` marker was before.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    dir: PathBuf,
}

impl FileMarkerStore {
    pub fn new<T: AsRef<Path>>(dir: T) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the marker recording `state` for `unit`, if that state has a marker.
    pub fn marker_path(&self, unit: &str, state: State) -> Option<PathBuf> {
        let suffix = state.marker_suffix()?;
        Some(self.dir.join(format!("{unit}.{suffix}")))
    }

    fn has_marker(&self, unit: &str, state: State) -> bool {
        match self.marker_path(unit, state) {
            Some(path) => path.exists() || path.is_symlink(),
            None => false,
        }
    }

    fn create_marker(&self, unit: &str, state: State) -> Result<(), Error> {
        let path = self.required_marker(unit, state);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => {
                log::debug!("created marker {path:?}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::Conflict(path)),
            Err(source) => Err(Error::Io { path, source }),
        }
    }

    fn rename_marker(&self, unit: &str, from: State, to: State) -> Result<(), Error> {
        let src = self.required_marker(unit, from);
        let tgt = self.required_marker(unit, to);
        if tgt.exists() {
            return Err(Error::Conflict(tgt));
        }
        fs::rename(&src, &tgt).map_err(|source| Error::Io { path: src, source })?;
        log::debug!("renamed marker to {tgt:?}");
        Ok(())
    }

    fn remove_marker(&self, unit: &str, state: State) -> Result<(), Error> {
        let path = self.required_marker(unit, state);
        fs::remove_file(&path).map_err(|source| Error::Io { path, source })
    }

    // only called for states that have markers:
    fn required_marker(&self, unit: &str, state: State) -> PathBuf {
        self.marker_path(unit, state)
            .unwrap_or_else(|| self.dir.join(unit))
    }
}

impl StateStore for FileMarkerStore {
    fn get(&self, unit: &str) -> Result<State, Error> {
        check_unit_id(unit)?;
        // most advanced state wins, so a stray leftover marker can't
        // make a finished unit look runnable again:
        let state = if self.has_marker(unit, State::Finished) {
            State::Finished
        } else if self.has_marker(unit, State::Started) {
            State::Started
        } else if self.has_marker(unit, State::Ambiguous) {
            State::Ambiguous
        } else {
            State::Absent
        };
        Ok(state)
    }

    fn transition(&self, unit: &str, from: State, to: State) -> Result<(), Error> {
        check_transition(unit, from, to, self.get(unit)?)?;
        match (from, to) {
            (State::Absent, _) => self.create_marker(unit, to),
            (_, State::Absent) => self.remove_marker(unit, from),
            _ => self.rename_marker(unit, from, to),
        }
    }
}
