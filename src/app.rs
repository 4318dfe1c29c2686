use std::path::Path;

use anyhow::{Context, Result};

use state::FileMarkerStore;

use crate::args::PipelineKind;
use crate::config::GroupConfig;
use crate::discovery::DiscoveryPass;
use crate::exec::{CommandRunner, ProcessRunner, SubmissionController};
use crate::fs::Fs;
use crate::lock::LockGuard;
use crate::pipeline::{ConcordancePipeline, DemuxPipeline, Pipeline};
use crate::settings::Settings;
use crate::ui::Ui;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Group \"{0}\" is not in the config file")]
    UnknownGroup(String),
    #[error("Pipeline {pipeline} is not configured for group \"{group}\"")]
    NotConfigured { group: String, pipeline: &'static str },
    #[error("This script must be run by {expected}, not {actual}")]
    WrongUser { expected: String, actual: String },
}

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// User interface
    ui: Ui,
    /// Runs the scheduler and pre-processing tools
    runner: Box<dyn CommandRunner>,
}

impl App {
    /// Create a new `App` that runs tools as real subprocesses.
    pub fn new(settings: Settings) -> Self {
        Self::with_runner(settings, Box::new(ProcessRunner))
    }

    /// Create a new `App` with a custom tool runner.
    pub fn with_runner(settings: Settings, runner: Box<dyn CommandRunner>) -> Self {
        let ui = Ui::new(settings.log_level >= log::LevelFilter::Debug);
        Self {
            settings,
            ui,
            runner,
        }
    }

    /// Run one pass for the configured group and pipeline.
    pub fn run(mut self) -> Result<()> {
        let settings = &self.settings;
        let group = settings
            .config
            .groups
            .get(&settings.group)
            .ok_or_else(|| Error::UnknownGroup(settings.group.clone()))?;
        check_user(group)?;

        let lock = LockGuard::try_acquire(&settings.lock_path())?;
        self.ui.verbose_msg(&format!("Holding lock {:?}", lock.path()));

        let not_configured = || Error::NotConfigured {
            group: settings.group.clone(),
            pipeline: settings.pipeline.name(),
        };
        let runner = self.runner.as_mut();
        self.ui.start_timer();
        match settings.pipeline {
            PipelineKind::Demultiplexing => {
                let config = group.demultiplexing.as_ref().ok_or_else(not_configured)?;
                let pipeline = DemuxPipeline::new(config)?;
                launch(settings, &self.ui, runner, &config.work_dir, &pipeline)?;
            }
            PipelineKind::Concordance => {
                let config = group.concordance.as_ref().ok_or_else(not_configured)?;
                let pipeline = ConcordancePipeline::new(config)?;
                launch(settings, &self.ui, runner, &config.work_dir, &pipeline)?;
            }
        }
        self.ui.print_elapsed("Pass");
        Ok(())
    }
}

/// Refuse to run as anyone but the group's designated user.
fn check_user(group: &GroupConfig) -> Result<()> {
    let Some(expected) = &group.expected_user else {
        return Ok(());
    };
    let actual = invoking_user(|name| std::env::var(name).ok());
    if &actual != expected {
        return Err(Error::WrongUser {
            expected: expected.clone(),
            actual,
        }
        .into());
    }
    Ok(())
}

/// `$USER`, or `$LOGNAME` where `USER` is unset (as under cron).
fn invoking_user(var: impl Fn(&str) -> Option<String>) -> String {
    ["USER", "LOGNAME"]
        .into_iter()
        .filter_map(var)
        .find(|name| !name.is_empty())
        .unwrap_or_default()
}

/// Everything after the lock: set up the work dir, then resolve or scan.
fn launch<P: Pipeline>(
    settings: &Settings,
    ui: &Ui,
    runner: &mut dyn CommandRunner,
    work_dir: &Path,
    pipeline: &P,
) -> Result<()> {
    let mut fs = Fs::new(work_dir, settings.dry_run);
    fs.ensure_layout()
        .with_context(|| format!("while preparing {} work dir", pipeline.name()))?;
    let store = FileMarkerStore::new(fs.logs_dir());
    let scheduler = &settings.config.scheduler;

    if !settings.resolve.is_empty() {
        let submitter = SubmissionController::new(&fs, &store, scheduler)?;
        for (unit, resolution) in &settings.resolve {
            let state = submitter
                .resolve(unit, *resolution)
                .with_context(|| format!("while resolving {unit}"))?;
            ui.resolved(unit, state);
        }
        return Ok(());
    }

    let pass = DiscoveryPass::new(
        &fs,
        &store,
        &store,
        scheduler,
        settings.config.on_unit_error,
    )?;
    let summary = pass.run(pipeline, runner, ui)?;
    ui.summary(pipeline.name(), &summary);
    summary.errors.print_recap(&format!("{} pass", pipeline.name()))
}
