use std::fmt;

use anyhow::Result;

use crate::exec::CommandRunner;
use crate::fs::Fs;
use crate::prep::{JobBody, UnitPaths};
use crate::unit::WorkUnit;

/// Sequencer runs to demultiplex.
mod demux;
pub use demux::DemuxPipeline;

/// Sample sheets listing array-vs-NGS genotype comparisons.
mod concordance;
pub use concordance::ConcordancePipeline;

/// Why a candidate unit is not processed in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyFinished,
    InProgress,
    /// A submission may or may not have happened; an operator must decide.
    Ambiguous,
    /// Inputs are not complete yet; the message says what is missing.
    SourceNotReady(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyFinished => f.write_str("already finished"),
            Self::InProgress => f.write_str("in progress"),
            Self::Ambiguous => f.write_str("ambiguous submission state"),
            Self::SourceNotReady(what) => write!(f, "not ready: {what}"),
        }
    }
}

/// Outcome of classifying a candidate unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    Skip(SkipReason),
    Ready(T),
}

/// One kind of pipeline launch: where its units come from, when they are
/// ready, and what their jobs do.
pub trait Pipeline {
    /// Unit parameters parsed during inspection and reused to build the job.
    type Inputs;

    fn name(&self) -> &'static str;

    /// Fresh enumeration of candidate units. Fails if the scan root is unreadable;
    /// a single bad entry is yielded as an `Err` item.
    fn candidates(&self) -> Result<Box<dyn Iterator<Item = Result<WorkUnit>> + '_>>;

    /// Check external completion markers and parse the unit's manifest.
    /// Malformed manifests are errors, never skips.
    fn inspect(&self, unit: &WorkUnit) -> Result<Readiness<Self::Inputs>>;

    /// Stage and pre-process inputs into `paths.tmp_dir`.
    fn preprocess(
        &self,
        fs: &Fs,
        runner: &mut dyn CommandRunner,
        unit: &WorkUnit,
        paths: &UnitPaths,
        inputs: &Self::Inputs,
    ) -> Result<()>;

    /// Resources and command lines for the unit's job script.
    fn job_body(&self, unit: &WorkUnit, paths: &UnitPaths, inputs: &Self::Inputs) -> Result<JobBody>;
}
