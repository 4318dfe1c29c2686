use std::path::{Path, PathBuf};

use crate::config::Resources;

use super::template::shell_quote;

/// The pipeline-specific part of a job: what it needs and what it runs.
#[derive(Debug, Clone)]
pub struct JobBody {
    pub resources: Resources,
    /// Shell lines, run in order from the unit's tmp dir.
    pub commands: Vec<String>,
}

/// Everything needed to write one scheduler job script.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_name: String,
    pub body: JobBody,
    /// Scheduler log files.
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    /// Directory the job runs in.
    pub work_dir: PathBuf,
    /// If this exists the job exits immediately (it already ran).
    pub done_guard: PathBuf,
    /// `(from, to)` marker renames performed once all commands succeeded.
    pub on_success: Vec<(PathBuf, PathBuf)>,
}

/// Render a job script. Pure; no filesystem access.
pub fn render_script(spec: &JobSpec) -> String {
    let mut strbuf = String::with_capacity(2048);
    let mut script = JobScriptBuilder::new(&mut strbuf);
    script.write_prefix();
    script.write_directives(spec);
    script.write_shell_options();
    script.write_done_guard(&spec.job_name, &spec.done_guard);
    script.write_cd(&spec.work_dir);
    script.write_commands(&spec.body.commands);
    script.write_success_renames(&spec.on_success);
    script.write_exit();
    strbuf
}

/// Utility for building the contents of a job script.
/// Note that it modifies a String reference held internally;
/// read that String to get the script's contents.
#[derive(Debug)]
struct JobScriptBuilder<'a> {
    strbuf: &'a mut String,
}

impl<'a> JobScriptBuilder<'a> {
    fn new(strbuf: &'a mut String) -> Self {
        strbuf.clear();
        Self { strbuf }
    }
}

impl JobScriptBuilder<'_> {
    /// shebang line
    fn write_prefix(&mut self) {
        self.strbuf.push_str("#!/bin/bash\n");
    }

    /// scheduler resource requests
    fn write_directives(&mut self, spec: &JobSpec) {
        let res = &spec.body.resources;
        self.write_directive("job-name", &spec.job_name);
        self.write_directive("output", &spec.stdout.to_string_lossy());
        self.write_directive("error", &spec.stderr.to_string_lossy());
        self.write_directive("time", &res.time);
        self.write_directive("cpus-per-task", &res.cpus.to_string());
        self.write_directive("mem", &res.mem);
        self.write_directive("nodes", "1");
        self.write_directive("open-mode", "append");
        if let Some(partition) = &res.partition {
            self.write_directive("partition", partition);
        }
    }

    fn write_directive(&mut self, key: &str, value: &str) {
        self.strbuf.push_str("#SBATCH --");
        self.strbuf.push_str(key);
        self.strbuf.push('=');
        self.strbuf.push_str(value);
        self.strbuf.push('\n');
    }

    fn write_shell_options(&mut self) {
        self.strbuf.push_str("\nset -euo pipefail\n");
    }

    fn write_done_guard(&mut self, job_name: &str, guard: &Path) {
        self.strbuf
            .push_str("\n# A previous submission of this script already completed:\n");
        self.strbuf.push_str("if [[ -e ");
        self.strbuf.push_str(&shell_quote(&guard.to_string_lossy()));
        self.strbuf.push_str(" ]]; then\n    echo ");
        self.strbuf
            .push_str(&shell_quote(&format!("{job_name} already finished; nothing to do.")));
        self.strbuf.push_str("\n    exit 0\nfi\n");
    }

    fn write_cd(&mut self, dir: &Path) {
        self.strbuf.push_str("\ncd ");
        self.strbuf.push_str(&shell_quote(&dir.to_string_lossy()));
        self.strbuf.push_str("\n\n");
    }

    fn write_commands(&mut self, commands: &[String]) {
        for command in commands {
            self.strbuf.push_str(command);
            self.strbuf.push('\n');
        }
    }

    fn write_success_renames(&mut self, renames: &[(PathBuf, PathBuf)]) {
        self.strbuf.push_str("\n# Success; mark job and unit as finished:\n");
        for (from, to) in renames {
            self.strbuf.push_str("mv ");
            self.strbuf.push_str(&shell_quote(&from.to_string_lossy()));
            self.strbuf.push(' ');
            self.strbuf.push_str(&shell_quote(&to.to_string_lossy()));
            self.strbuf.push('\n');
        }
    }

    fn write_exit(&mut self) {
        self.strbuf.push_str("\nexit 0\n");
    }
}
