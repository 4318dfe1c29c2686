use anyhow::Result;

use state::{FileMarkerStore, StateStore};

use crate::classify::classify;
use crate::config::{SchedulerConfig, UnitErrorPolicy};
use crate::errors::Errors;
use crate::exec::{CommandRunner, SubmissionController};
use crate::fs::Fs;
use crate::pipeline::{Pipeline, Readiness, SkipReason};
use crate::prep::ArtifactGenerator;
use crate::ui::Ui;
use crate::unit::WorkUnit;

/// Label used in the error recap for scan entries that could not be read.
const UNREADABLE_ENTRY: &str = "(unreadable entry)";

/// What happened to one unit during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Submitted { job_id: Option<String> },
    /// Ready, but this is a dry run.
    WouldSubmit,
    Skipped(SkipReason),
    /// The error itself is kept in `Summary::errors`.
    Failed,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub outcomes: Vec<(String, UnitOutcome)>,
    pub errors: Errors,
}

impl Summary {
    fn count<F: Fn(&UnitOutcome) -> bool>(&self, f: F) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| f(outcome)).count()
    }

    pub fn submitted(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Submitted { .. }))
    }

    pub fn would_submit(&self) -> usize {
        self.count(|o| *o == UnitOutcome::WouldSubmit)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped(_)))
    }

    /// Failed units plus unreadable scan entries.
    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

/// One scan over a pipeline's candidates: classify, generate, submit.
///
/// Units are processed one after another. A unit's failure is recorded and,
/// unless the policy says to abort, the pass moves on to the next unit.
pub struct DiscoveryPass<'a> {
    fs: &'a Fs,
    store: &'a dyn StateStore,
    generator: ArtifactGenerator<'a>,
    submitter: SubmissionController<'a>,
    policy: UnitErrorPolicy,
}

impl<'a> DiscoveryPass<'a> {
    pub fn new(
        fs: &'a Fs,
        store: &'a dyn StateStore,
        markers: &'a FileMarkerStore,
        scheduler: &'a SchedulerConfig,
        policy: UnitErrorPolicy,
    ) -> Result<Self> {
        Ok(Self {
            fs,
            store,
            generator: ArtifactGenerator::new(fs, markers),
            submitter: SubmissionController::new(fs, store, scheduler)?,
            policy,
        })
    }
}

impl DiscoveryPass<'_> {
    /// Fails only if the scan itself cannot start; unit failures end up in the summary.
    pub fn run<P: Pipeline>(
        &self,
        pipeline: &P,
        runner: &mut dyn CommandRunner,
        ui: &Ui,
    ) -> Result<Summary> {
        log::info!("scanning for {} units", pipeline.name());
        let mut summary = Summary::default();

        for candidate in pipeline.candidates()? {
            let unit = match candidate {
                Ok(unit) => unit,
                Err(e) => {
                    summary
                        .errors
                        .add(UNREADABLE_ENTRY, e.context("while scanning for candidates"));
                    if self.policy == UnitErrorPolicy::Abort {
                        break;
                    }
                    continue;
                }
            };

            let outcome = match self.process(pipeline, runner, &unit) {
                Ok(outcome) => outcome,
                Err(e) => {
                    summary.errors.add(&unit.id, e);
                    UnitOutcome::Failed
                }
            };
            ui.unit_outcome(&unit.id, &outcome);

            let failed = outcome == UnitOutcome::Failed;
            summary.outcomes.push((unit.id, outcome));
            if failed && self.policy == UnitErrorPolicy::Abort {
                log::error!("stopping at first failed unit (on_unit_error = \"abort\")");
                break;
            }
        }

        Ok(summary)
    }

    /// classify -> generate -> submit, in that order.
    fn process<P: Pipeline>(
        &self,
        pipeline: &P,
        runner: &mut dyn CommandRunner,
        unit: &WorkUnit,
    ) -> Result<UnitOutcome> {
        log::debug!("{unit}: classifying {:?}", unit.path());
        let inputs = match classify(self.store, self.fs, pipeline, unit)? {
            Readiness::Skip(reason) => {
                log::debug!("{unit}: skipping ({reason})");
                return Ok(UnitOutcome::Skipped(reason));
            }
            Readiness::Ready(inputs) => inputs,
        };

        if self.fs.is_dry_run() {
            log::info!("{unit}: ready; dry run, not submitting");
            return Ok(UnitOutcome::WouldSubmit);
        }

        let generated = self.generator.generate(runner, pipeline, unit, &inputs)?;
        let submission = self.submitter.submit(runner, unit, generated.path())?;
        Ok(UnitOutcome::Submitted {
            job_id: submission.job_id,
        })
    }
}
