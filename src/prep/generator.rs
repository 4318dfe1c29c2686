use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use state::{FileMarkerStore, State};

use crate::exec::CommandRunner;
use crate::fs::Fs;
use crate::pipeline::Pipeline;
use crate::unit::WorkUnit;

use super::{render_script, JobBody, JobSpec, UnitPaths};

/// Result of asking for a unit's job script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    /// Written by this call, after pre-processing.
    Created(PathBuf),
    /// Already on disk; left untouched and nothing was re-run.
    Existing(PathBuf),
}

impl Generated {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Existing(path) => path,
        }
    }
}

/// Materializes job scripts and their staged inputs in the work dir.
pub struct ArtifactGenerator<'a> {
    fs: &'a Fs,
    /// Names the unit lifecycle markers the job script renames.
    markers: &'a FileMarkerStore,
}

impl<'a> ArtifactGenerator<'a> {
    pub fn new(fs: &'a Fs, markers: &'a FileMarkerStore) -> Self {
        Self { fs, markers }
    }
}

impl ArtifactGenerator<'_> {
    /// Write `jobs/{unit}.sh` unless it exists already.
    ///
    /// If pre-processing fails, no script is written, so the next pass
    /// will try again from the start.
    pub fn generate<P: Pipeline>(
        &self,
        runner: &mut dyn CommandRunner,
        pipeline: &P,
        unit: &WorkUnit,
        inputs: &P::Inputs,
    ) -> Result<Generated> {
        let id = unit.id.as_str();
        let script = self.fs.job_script(id);
        if self.fs.exists(&script) {
            log::debug!("{id}: reusing existing job script {script:?}");
            return Ok(Generated::Existing(script));
        }

        let paths = UnitPaths::new(self.fs, id);
        self.fs
            .create_dir(&paths.tmp_dir)
            .with_context(|| format!("while creating working dir for {id}"))?;

        pipeline
            .preprocess(self.fs, runner, unit, &paths, inputs)
            .with_context(|| format!("while pre-processing inputs for {id}"))?;

        let body = pipeline.job_body(unit, &paths, inputs)?;
        let spec = self.job_spec(id, paths, body)?;
        let text = render_script(&spec);

        log::info!("{id}: writing job script {script:?}");
        self.fs.write_file_atomic(&script, &text)?;
        self.fs.make_executable(&script)?;
        Ok(Generated::Created(script))
    }

    fn job_spec(&self, id: &str, paths: UnitPaths, body: JobBody) -> Result<JobSpec> {
        let marker = |state: State| {
            self.markers
                .marker_path(id, state)
                .with_context(|| format!("{state} units have no marker file"))
        };
        Ok(JobSpec {
            job_name: id.to_owned(),
            body,
            stdout: self.fs.job_stdout(id),
            stderr: self.fs.job_stderr(id),
            work_dir: paths.tmp_dir,
            done_guard: marker(State::Finished)?,
            on_success: vec![
                (self.fs.job_started(id), self.fs.job_finished(id)),
                (marker(State::Started)?, marker(State::Finished)?),
            ],
        })
    }
}
