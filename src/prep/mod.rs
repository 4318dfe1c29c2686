use std::path::PathBuf;

use crate::fs::Fs;

/// `{placeholder}` substitution in configured command lines.
pub mod template;

/// Pure rendering of scheduler job scripts.
mod job_script;
pub use job_script::{render_script, JobBody, JobSpec};

/// Writes a unit's job script and pre-processed inputs, once.
mod generator;
pub use generator::{ArtifactGenerator, Generated};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Staged file name \"{name}\" is used by both {first:?} and {second:?}")]
    StagingCollision {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("No region of interest found in the header of {0:?}")]
    RegionNotFound(PathBuf),
}

/// Per-unit directories under the work dir.
#[derive(Debug, Clone)]
pub struct UnitPaths {
    /// Where the job runs and pre-processed inputs are staged.
    pub tmp_dir: PathBuf,
    /// Where the job writes its final outputs.
    pub results_dir: PathBuf,
}

impl UnitPaths {
    pub fn new(fs: &Fs, unit: &str) -> Self {
        Self {
            tmp_dir: fs.unit_tmp_dir(unit),
            results_dir: fs.unit_results_dir(unit),
        }
    }
}
