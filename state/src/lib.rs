//! Lifecycle state of seqlaunch work units.
//!
//! Each work unit moves through a small state machine:
//!
//! ```text
//! absent --> started --> finished
//!   |           ^
//!   v           |
//! ambiguous ----+--> absent
//! ```
//!
//! A unit is `ambiguous` when a job may have reached the scheduler but its
//! `started` marker could not be recorded. Only an operator can tell which
//! way it went, so nothing moves out of `ambiguous` automatically.

use std::fmt;
use std::path::PathBuf;

/// Markers stored as files in a single directory
mod file_store;
pub use file_store::FileMarkerStore;

/// Markers kept in memory, for tests and dry runs
mod memory_store;
pub use memory_store::MemoryStore;

/// Lifecycle state of one work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Never submitted.
    Absent,
    /// Submitted to the scheduler; job not (yet) finished.
    Started,
    /// Job reported success.
    Finished,
    /// Submission outcome unknown; needs an operator.
    Ambiguous,
}

impl State {
    /// Suffix of the marker file recording this state, if it has one.
    pub fn marker_suffix(self) -> Option<&'static str> {
        match self {
            Self::Absent => None,
            Self::Started => Some("started"),
            Self::Finished => Some("finished"),
            Self::Ambiguous => Some("ambiguous"),
        }
    }

    /// Transitions the store is allowed to perform.
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Absent, Started)
                | (Started, Finished)
                | (Absent, Ambiguous)
                | (Ambiguous, Started)
                | (Ambiguous, Absent)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Ambiguous => "ambiguous",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid unit id \"{0}\"")]
    InvalidUnitId(String),
    #[error("Transition {from} -> {to} is not allowed (unit \"{unit}\")")]
    InvalidTransition {
        unit: String,
        from: State,
        to: State,
    },
    #[error("Unit \"{unit}\" is {actual}, expected {expected}")]
    StateMismatch {
        unit: String,
        expected: State,
        actual: State,
    },
    #[error("Marker {0:?} already exists; another process got there first")]
    Conflict(PathBuf),
    #[error("IO error on marker {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persistence for unit lifecycle states.
///
/// Implementations must not cache: every `get` reflects the backing store
/// at the time of the call.
pub trait StateStore {
    /// Current state of `unit`.
    fn get(&self, unit: &str) -> Result<State, Error>;

    /// Move `unit` from `from` to `to`, failing if the unit is not in `from`
    /// or the transition is not allowed.
    fn transition(&self, unit: &str, from: State, to: State) -> Result<(), Error>;
}

/// Unit ids become file names, so they must be a single path component.
pub(crate) fn check_unit_id(unit: &str) -> Result<(), Error> {
    if unit.is_empty() || unit == "." || unit == ".." || unit.contains(['/', '\\', '\0']) {
        Err(Error::InvalidUnitId(unit.to_owned()))
    } else {
        Ok(())
    }
}

/// Validate a requested transition against the unit's actual state.
pub(crate) fn check_transition(
    unit: &str,
    from: State,
    to: State,
    actual: State,
) -> Result<(), Error> {
    check_unit_id(unit)?;
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            unit: unit.to_owned(),
            from,
            to,
        });
    }
    if actual != from {
        return Err(Error::StateMismatch {
            unit: unit.to_owned(),
            expected: from,
            actual,
        });
    }
    Ok(())
}
