use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

use state::{State, StateStore};

use crate::config::SchedulerConfig;
use crate::fs::Fs;
use crate::settings::Resolution;
use crate::unit::WorkUnit;

use super::{CommandRunner, Error, ToolCall};

/// Written to the job's `.sh.started` marker until the scheduler answers.
const INTENT: &str = "submitting\n";

/// A job the scheduler accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Parsed from the scheduler's reply, if it matched the configured pattern.
    pub job_id: Option<String>,
}

/// Submits each unit's job script to the scheduler at most once.
///
/// The job's own `.sh.started` marker is created exclusively *before* the
/// scheduler is called, and the unit's `started` marker right after. A crash
/// in between leaves a job marker without a unit marker, which the classifier
/// reports as ambiguous instead of submitting again.
pub struct SubmissionController<'a> {
    fs: &'a Fs,
    store: &'a dyn StateStore,
    scheduler: &'a SchedulerConfig,
    job_id_re: Regex,
}

impl<'a> SubmissionController<'a> {
    pub fn new(fs: &'a Fs, store: &'a dyn StateStore, scheduler: &'a SchedulerConfig) -> Result<Self> {
        let job_id_re = Regex::new(&scheduler.job_id_pattern)
            .with_context(|| format!("invalid job_id_pattern {:?}", scheduler.job_id_pattern))?;
        Ok(Self {
            fs,
            store,
            scheduler,
            job_id_re,
        })
    }
}

impl SubmissionController<'_> {
    /// Submit `script` for `unit`, then mark the unit started.
    pub fn submit(
        &self,
        runner: &mut dyn CommandRunner,
        unit: &WorkUnit,
        script: &Path,
    ) -> Result<Submission> {
        let id = unit.id.as_str();
        let state = self.store.get(id)?;
        if state != State::Absent {
            return Err(Error::NotAbsent(id.to_owned(), state).into());
        }
        let job_finished = self.fs.job_finished(id);
        if self.fs.exists(&job_finished) {
            return Err(Error::AlreadySubmitted(id.to_owned(), job_finished).into());
        }

        let job_started = self.fs.job_started(id);
        if let Err(e) = self.fs.create_new_file(&job_started, INTENT) {
            let exists = e
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::AlreadyExists);
            return if exists {
                Err(Error::AlreadySubmitted(id.to_owned(), job_started).into())
            } else {
                Err(e.context("while writing submission marker"))
            };
        }

        let call = ToolCall::new(&self.scheduler.submit_command)
            .args(&self.scheduler.submit_args)
            .arg(script)
            .current_dir(self.fs.work_dir());
        log::info!("{id}: submitting `{call}`");

        let output = match runner.run(&call) {
            Ok(output) => output,
            Err(e) => {
                // if the scheduler never started, nothing was submitted:
                if matches!(e.downcast_ref::<Error>(), Some(Error::SpawnFailed(..))) {
                    self.withdraw_intent(&job_started);
                } else {
                    self.mark_ambiguous(id);
                }
                return Err(e.context("while submitting job script"));
            }
        };
        if !output.success {
            self.withdraw_intent(&job_started);
            return Err(Error::tool_failed(&call, &output).into());
        }

        let job_id = self
            .job_id_re
            .captures(&output.stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_owned());
        match &job_id {
            Some(job) => log::info!("{id}: scheduler accepted job {job}"),
            None => log::warn!(
                "{id}: could not find a job id in scheduler output {:?}",
                output.stdout.trim()
            ),
        }
        let job_str = job_id.as_deref().unwrap_or("unknown");
        if let Err(e) = self.fs.write_file(&job_started, &format!("{job_str}\n")) {
            log::warn!("{id}: could not record job id in {job_started:?}: {e:#}");
        }

        self.mark_started(id, job_str)?;
        Ok(Submission { job_id })
    }

    /// Write the unit's `started` marker, retrying a bounded number of times.
    fn mark_started(&self, id: &str, job: &str) -> Result<()> {
        let attempts = self.scheduler.marker_retries.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.store.transition(id, State::Absent, State::Started) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("{id}: writing started marker failed (attempt {attempt}/{attempts}): {e}");
                    last_err = Some(e);
                    if attempt < attempts {
                        let delay = self.scheduler.marker_retry_delay_ms * u64::from(attempt);
                        thread::sleep(Duration::from_millis(delay));
                    }
                }
            }
        }
        self.mark_ambiguous(id);
        let err = Error::MarkerWriteFailed {
            unit: id.to_owned(),
            job: job.to_owned(),
        };
        match last_err {
            Some(cause) => Err(anyhow::Error::new(cause).context(err)),
            None => Err(err.into()),
        }
    }

    fn mark_ambiguous(&self, id: &str) {
        match self.store.transition(id, State::Absent, State::Ambiguous) {
            Ok(()) => log::error!("{id}: marked ambiguous; resolve with --resolve {id}=submitted|absent"),
            Err(e) => log::error!(
                "{id}: could not mark ambiguous either ({e}); the job marker {:?} still flags it",
                self.fs.job_started(id)
            ),
        }
    }

    fn withdraw_intent(&self, job_started: &Path) {
        if let Err(e) = self.fs.delete_file(job_started) {
            log::error!("could not remove submission marker {job_started:?}: {e:#}");
        }
    }

    /// Settle an ambiguous unit according to an operator's finding.
    ///
    /// The job marker is updated before the unit marker, so a failure part
    /// way through leaves the unit ambiguous rather than half resolved.
    pub fn resolve(&self, id: &str, resolution: Resolution) -> Result<State> {
        // the marker store writes regardless of dry run:
        if self.fs.is_dry_run() {
            return Err(Error::DryRunResolve(id.to_owned()).into());
        }
        let state = self.store.get(id)?;
        let job_started = self.fs.job_started(id);
        let intent_only = state == State::Absent && self.fs.exists(&job_started);
        if state != State::Ambiguous && !intent_only {
            return Err(Error::NotAmbiguous(id.to_owned(), state).into());
        }

        match resolution {
            Resolution::Submitted => {
                // the job script renames both markers when it finishes:
                if !self.fs.exists(&job_started) {
                    self.fs.write_file(&job_started, "resolved\n")?;
                }
                self.store.transition(id, state, State::Started)?;
                Ok(State::Started)
            }
            Resolution::Absent => {
                if self.fs.exists(&job_started) {
                    self.fs.delete_file(&job_started)?;
                }
                if state == State::Ambiguous {
                    self.store.transition(id, State::Ambiguous, State::Absent)?;
                }
                Ok(State::Absent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ToolOutput;
    use state::{FileMarkerStore, MemoryStore};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    /// Replies to every call with a fixed output.
    struct FixedRunner {
        calls: Vec<ToolCall>,
        reply: Option<ToolOutput>,
    }

    impl FixedRunner {
        fn new(reply: Option<ToolOutput>) -> Self {
            Self {
                calls: Vec::new(),
                reply,
            }
        }
    }

    impl CommandRunner for FixedRunner {
        fn run(&mut self, call: &ToolCall) -> Result<ToolOutput> {
            self.calls.push(call.clone());
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(Error::SpawnFailed(
                    call.program.clone(),
                    io::Error::from(io::ErrorKind::NotFound),
                )
                .into()),
            }
        }
    }

    /// A store whose Absent -> Started transition always fails.
    struct StuckStore(MemoryStore);

    impl StateStore for StuckStore {
        fn get(&self, unit: &str) -> Result<State, state::Error> {
            self.0.get(unit)
        }
        fn transition(&self, unit: &str, from: State, to: State) -> Result<(), state::Error> {
            if to == State::Started {
                return Err(state::Error::Conflict(PathBuf::from(unit)));
            }
            self.0.transition(unit, from, to)
        }
    }

    fn setup() -> Result<(TempDir, Fs, WorkUnit)> {
        let dir = tempdir()?;
        let mut fs = Fs::new(dir.path(), false);
        fs.ensure_layout()?;
        std::fs::write(fs.job_script("RUN_042"), "#!/bin/bash\n")?;
        let unit = WorkUnit {
            id: "RUN_042".to_owned(),
            path: PathBuf::from("/in/RUN_042.sampleId.txt"),
        };
        Ok((dir, fs, unit))
    }

    fn fast_scheduler() -> SchedulerConfig {
        SchedulerConfig {
            marker_retry_delay_ms: 0,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn test_submit_marks_started() -> Result<()> {
        let (_dir, fs, unit) = setup()?;
        let store = FileMarkerStore::new(fs.logs_dir());
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;
        let mut runner = FixedRunner::new(Some(ToolOutput::ok("Submitted batch job 4242\n")));

        let submission = controller.submit(&mut runner, &unit, &fs.job_script("RUN_042"))?;

        assert_eq!(submission.job_id.as_deref(), Some("4242"));
        assert_eq!(runner.calls.len(), 1);
        assert_eq!(runner.calls[0].program, "sbatch");
        assert_eq!(
            runner.calls[0].args.last().map(String::as_str),
            fs.job_script("RUN_042").to_str()
        );
        assert_eq!(store.get("RUN_042")?, State::Started);
        assert_eq!(std::fs::read_to_string(fs.job_started("RUN_042"))?, "4242\n");
        Ok(())
    }

    #[test]
    fn test_second_submit_is_refused() -> Result<()> {
        let (_dir, fs, unit) = setup()?;
        let store = FileMarkerStore::new(fs.logs_dir());
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;
        let mut runner = FixedRunner::new(Some(ToolOutput::ok("Submitted batch job 1\n")));

        controller.submit(&mut runner, &unit, &fs.job_script("RUN_042"))?;
        let err = controller
            .submit(&mut runner, &unit, &fs.job_script("RUN_042"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NotAbsent(_, State::Started))
        ));
        assert_eq!(runner.calls.len(), 1);
        Ok(())
    }

    #[test]
    fn test_existing_job_marker_blocks_submission() -> Result<()> {
        let (_dir, fs, unit) = setup()?;
        std::fs::write(fs.job_started("RUN_042"), "submitting\n")?;
        let store = MemoryStore::new();
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;
        let mut runner = FixedRunner::new(Some(ToolOutput::ok("Submitted batch job 1\n")));

        let err = controller
            .submit(&mut runner, &unit, &fs.job_script("RUN_042"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::AlreadySubmitted(..))
        ));
        assert!(runner.calls.is_empty());
        Ok(())
    }

    #[test]
    fn test_rejected_submission_leaves_unit_absent() -> Result<()> {
        let (_dir, fs, unit) = setup()?;
        let store = FileMarkerStore::new(fs.logs_dir());
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;
        let mut runner = FixedRunner::new(Some(ToolOutput::failed(1, "invalid partition")));

        let err = controller
            .submit(&mut runner, &unit, &fs.job_script("RUN_042"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ToolFailed { .. })
        ));
        assert_eq!(store.get("RUN_042")?, State::Absent);
        assert!(!fs.job_started("RUN_042").exists());
        Ok(())
    }

    #[test]
    fn test_missing_scheduler_withdraws_intent() -> Result<()> {
        let (_dir, fs, unit) = setup()?;
        let store = MemoryStore::new();
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;
        let mut runner = FixedRunner::new(None);

        assert!(controller
            .submit(&mut runner, &unit, &fs.job_script("RUN_042"))
            .is_err());
        assert!(!fs.job_started("RUN_042").exists());
        assert_eq!(store.get("RUN_042")?, State::Absent);
        Ok(())
    }

    #[test]
    fn test_unwritable_marker_becomes_ambiguous() -> Result<()> {
        let (_dir, fs, unit) = setup()?;
        let store = StuckStore(MemoryStore::new());
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;
        let mut runner = FixedRunner::new(Some(ToolOutput::ok("Submitted batch job 7\n")));

        let err = controller
            .submit(&mut runner, &unit, &fs.job_script("RUN_042"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MarkerWriteFailed { .. })
        ));
        assert_eq!(store.get("RUN_042")?, State::Ambiguous);
        assert!(fs.job_started("RUN_042").exists());
        Ok(())
    }

    #[test]
    fn test_resolve() -> Result<()> {
        let (_dir, fs, _unit) = setup()?;
        let store = FileMarkerStore::new(fs.logs_dir());
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;

        // nothing to resolve yet:
        assert!(controller.resolve("RUN_042", Resolution::Absent).is_err());

        // crash between scheduler call and started marker:
        std::fs::write(fs.job_started("RUN_042"), "submitting\n")?;
        assert_eq!(controller.resolve("RUN_042", Resolution::Absent)?, State::Absent);
        assert!(!fs.job_started("RUN_042").exists());

        store.transition("RUN_042", State::Absent, State::Ambiguous)?;
        std::fs::write(fs.job_started("RUN_042"), "99\n")?;
        assert_eq!(
            controller.resolve("RUN_042", Resolution::Submitted)?,
            State::Started
        );
        assert_eq!(store.get("RUN_042")?, State::Started);
        assert!(fs.job_started("RUN_042").exists());
        Ok(())
    }

    #[test]
    fn test_dry_run_resolve_leaves_markers_alone() -> Result<()> {
        let (dir, fs, _unit) = setup()?;
        let store = FileMarkerStore::new(fs.logs_dir());
        store.transition("RUN_042", State::Absent, State::Ambiguous)?;
        std::fs::write(fs.job_started("RUN_042"), "submitting\n")?;

        let dry_fs = Fs::new(dir.path(), true);
        let dry_store = FileMarkerStore::new(dry_fs.logs_dir());
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&dry_fs, &dry_store, &scheduler)?;

        let err = controller.resolve("RUN_042", Resolution::Absent).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DryRunResolve(_))
        ));
        assert_eq!(store.get("RUN_042")?, State::Ambiguous);
        assert!(fs.job_started("RUN_042").exists());
        Ok(())
    }

    #[test]
    fn test_failed_job_marker_cleanup_keeps_unit_ambiguous() -> Result<()> {
        let (_dir, fs, _unit) = setup()?;
        let store = FileMarkerStore::new(fs.logs_dir());
        store.transition("RUN_042", State::Absent, State::Ambiguous)?;
        // a job marker that is a directory can't be deleted as a file:
        std::fs::create_dir(fs.job_started("RUN_042"))?;
        let scheduler = fast_scheduler();
        let controller = SubmissionController::new(&fs, &store, &scheduler)?;

        assert!(controller.resolve("RUN_042", Resolution::Absent).is_err());
        assert_eq!(store.get("RUN_042")?, State::Ambiguous);
        Ok(())
    }
}
