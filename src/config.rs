//! On-disk configuration, loaded once per invocation from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use util::HashMap;

/// Top-level contents of the config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding one lock file per pipeline and group.
    pub lock_dir: PathBuf,
    /// What to do with the rest of the batch when one unit fails.
    #[serde(default)]
    pub on_unit_error: UnitErrorPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub groups: HashMap<String, GroupConfig>,
}

impl Config {
    /// Read and parse the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("while reading config file {path:?}"))?;
        Self::parse(&text).with_context(|| format!("while parsing config file {path:?}"))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Escalation of a single unit's failure.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitErrorPolicy {
    /// Record the failure and continue with the next unit.
    #[default]
    Isolate,
    /// Stop the pass at the first failed unit.
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Program that accepts a job script path as its last argument.
    pub submit_command: String,
    /// Extra arguments passed before the script path.
    pub submit_args: Vec<String>,
    /// Regex whose first capture group is the job id in the submit output.
    pub job_id_pattern: String,
    /// Attempts at writing the `started` marker after a successful submit.
    pub marker_retries: u32,
    /// Milliseconds to wait between marker attempts (multiplied by the attempt number).
    pub marker_retry_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            submit_command: "sbatch".to_owned(),
            submit_args: Vec::new(),
            job_id_pattern: r"Submitted batch job (\d+)".to_owned(),
            marker_retries: 3,
            marker_retry_delay_ms: 200,
        }
    }
}

/// Settings for one group (one team's share of the cluster).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    /// If set, only this user may launch jobs for the group.
    pub expected_user: Option<String>,
    pub demultiplexing: Option<DemuxConfig>,
    pub concordance: Option<ConcordanceConfig>,
}

/// Scheduler resource requests for a generated job.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    pub cpus: u32,
    pub mem: String,
    pub time: String,
    #[serde(default)]
    pub partition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemuxConfig {
    /// Root of logs/, jobs/, tmp/ and results/.
    pub work_dir: PathBuf,
    /// Sequencer output; one directory per run.
    pub sequencers_dir: PathBuf,
    /// Holds `{run}.csv` sample sheets.
    pub samplesheets_dir: PathBuf,
    /// Only directories whose name matches this are considered runs.
    #[serde(default = "default_run_pattern")]
    pub run_pattern: String,
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    /// Runs from instruments matching `miseq_pattern` write a different marker.
    #[serde(default = "default_miseq_marker")]
    pub miseq_marker: String,
    #[serde(default = "default_miseq_pattern")]
    pub miseq_pattern: String,
    /// Template for the demultiplexer command line.
    #[serde(default = "default_demux_command")]
    pub command: String,
    #[serde(default = "default_demux_resources")]
    pub resources: Resources,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcordanceConfig {
    /// Root of logs/, jobs/, tmp/ and results/.
    pub work_dir: PathBuf,
    /// Searched recursively for sample sheets.
    pub samplesheets_dir: PathBuf,
    /// Sample sheet file names match this; the match is stripped to get the unit id.
    #[serde(default = "default_samplesheet_pattern")]
    pub samplesheet_pattern: String,
    /// Header line pattern in the array VCF; captures contig name and length.
    #[serde(default = "default_region_pattern")]
    pub region_pattern: String,
    #[serde(default = "default_bedtools")]
    pub bedtools: String,
    /// Template for the genotype comparison command line, run once per sample pair.
    #[serde(default = "default_concordance_command")]
    pub command: String,
    #[serde(default = "default_concordance_resources")]
    pub resources: Resources,
}

fn default_run_pattern() -> String {
    r"^[0-9]{6}_[A-Za-z0-9]+_[0-9]+_[A-Za-z0-9-]+$".to_owned()
}

fn default_completion_marker() -> String {
    "CopyComplete.txt".to_owned()
}

fn default_miseq_marker() -> String {
    "RTAComplete.txt".to_owned()
}

fn default_miseq_pattern() -> String {
    r"^[0-9]{6}_M[0-9]{5}_".to_owned()
}

fn default_demux_command() -> String {
    "bcl2fastq --runfolder-dir {run_dir} --output-dir {output_dir} \
     --sample-sheet {samplesheet} -r 2 -p {threads} -w 2"
        .to_owned()
}

fn default_demux_resources() -> Resources {
    Resources {
        cpus: 8,
        mem: "16gb".to_owned(),
        time: "07:59:00".to_owned(),
        partition: None,
    }
}

fn default_samplesheet_pattern() -> String {
    r"\.sampleId\.txt$".to_owned()
}

fn default_region_pattern() -> String {
    r"^##contig=<ID=([^,>]+),length=([0-9]+)".to_owned()
}

fn default_bedtools() -> String {
    "bedtools".to_owned()
}

fn default_concordance_command() -> String {
    "compareGenotypeCalls -d1 {array_vcf} -D1 VCF -d2 {ngs_vcf} -D2 VCF \
     -ac -sva -o {output_prefix}"
        .to_owned()
}

fn default_concordance_resources() -> Resources {
    Resources {
        cpus: 1,
        mem: "4gb".to_owned(),
        time: "01:59:00".to_owned(),
        partition: None,
    }
}
