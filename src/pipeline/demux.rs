use std::path::PathBuf;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::DemuxConfig;
use crate::exec::CommandRunner;
use crate::fs::Fs;
use crate::prep::{template, JobBody, UnitPaths};
use crate::samplesheet::check_samplesheet;
use crate::scan::scan_children;
use crate::unit::WorkUnit;

use super::{Pipeline, Readiness, SkipReason};

const PLACEHOLDERS: [&str; 4] = ["run_dir", "output_dir", "samplesheet", "threads"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxInputs {
    /// The run's sample sheet, already checked.
    pub samplesheet: PathBuf,
    pub samples: usize,
}

/// Finds completed sequencer runs with a valid sample sheet.
pub struct DemuxPipeline<'a> {
    config: &'a DemuxConfig,
    run_re: Regex,
    miseq_re: Regex,
}

impl<'a> DemuxPipeline<'a> {
    pub fn new(config: &'a DemuxConfig) -> Result<Self> {
        let run_re = Regex::new(&config.run_pattern)
            .with_context(|| format!("invalid run_pattern {:?}", config.run_pattern))?;
        let miseq_re = Regex::new(&config.miseq_pattern)
            .with_context(|| format!("invalid miseq_pattern {:?}", config.miseq_pattern))?;
        template::validate(&config.command, &PLACEHOLDERS)
            .context("invalid demultiplexing command")?;
        Ok(Self {
            config,
            run_re,
            miseq_re,
        })
    }

    /// Marker the sequencer writes once it has copied the whole run.
    fn completion_marker(&self, run: &str) -> &str {
        if self.miseq_re.is_match(run) {
            &self.config.miseq_marker
        } else {
            &self.config.completion_marker
        }
    }

    /// Name the staged sample sheet gets in the unit's tmp dir.
    fn staged_samplesheet(paths: &UnitPaths, unit: &WorkUnit) -> PathBuf {
        paths.tmp_dir.join(format!("{}.csv", unit.id))
    }
}

impl Pipeline for DemuxPipeline<'_> {
    type Inputs = DemuxInputs;

    fn name(&self) -> &'static str {
        "demultiplexing"
    }

    fn candidates(&self) -> Result<Box<dyn Iterator<Item = Result<WorkUnit>> + '_>> {
        let run_re = &self.run_re;
        let runs = scan_children(&self.config.sequencers_dir, move |path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| run_re.is_match(name))
        })?;
        Ok(Box::new(runs.map(|path| WorkUnit::from_dir_name(path?))))
    }

    fn inspect(&self, unit: &WorkUnit) -> Result<Readiness<DemuxInputs>> {
        let marker = self.completion_marker(&unit.id);
        if !unit.path().join(marker).exists() {
            return Ok(Readiness::Skip(SkipReason::SourceNotReady(format!(
                "{marker} not present"
            ))));
        }

        let samplesheet = self.config.samplesheets_dir.join(format!("{}.csv", unit.id));
        if !samplesheet.exists() {
            return Ok(Readiness::Skip(SkipReason::SourceNotReady(format!(
                "no sample sheet {samplesheet:?}"
            ))));
        }
        let samples = check_samplesheet(&samplesheet, &unit.id)?;

        Ok(Readiness::Ready(DemuxInputs {
            samplesheet,
            samples,
        }))
    }

    fn preprocess(
        &self,
        fs: &Fs,
        _runner: &mut dyn CommandRunner,
        unit: &WorkUnit,
        paths: &UnitPaths,
        inputs: &DemuxInputs,
    ) -> Result<()> {
        log::debug!("{unit}: staging sample sheet for {} sample(s)", inputs.samples);
        // the job must see the sheet that was checked, not a later edit:
        fs.copy(&inputs.samplesheet, Self::staged_samplesheet(paths, unit))
    }

    fn job_body(&self, unit: &WorkUnit, paths: &UnitPaths, _inputs: &DemuxInputs) -> Result<JobBody> {
        let resources = self.config.resources.clone();
        let run_dir = unit.path().to_string_lossy();
        let output_dir = paths.results_dir.to_string_lossy();
        let samplesheet = Self::staged_samplesheet(paths, unit);
        let samplesheet = samplesheet.to_string_lossy();
        let threads = resources.cpus.to_string();

        let command = template::render(
            &self.config.command,
            &[
                ("run_dir", &*run_dir),
                ("output_dir", &*output_dir),
                ("samplesheet", &*samplesheet),
                ("threads", threads.as_str()),
            ],
        )?;
        Ok(JobBody {
            resources,
            commands: vec![
                format!("mkdir -p {}", template::shell_quote(&output_dir)),
                command,
            ],
        })
    }
}
