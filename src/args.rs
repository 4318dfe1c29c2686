use std::path::PathBuf;

use clap::{Parser, ValueEnum};

const CMD_NAME: &str = "seqlaunch";
const MERGE_CMD_NAME: &str = "seqlaunch-merge-samplesheets";
const DEFAULT_CONFIG: &str = "seqlaunch.toml";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Which kind of work to discover and launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PipelineKind {
    /// Sequencer runs -> demultiplexing jobs
    Demultiplexing,
    /// Sample sheets -> array vs. NGS concordance jobs
    Concordance,
}

impl PipelineKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Demultiplexing => "demultiplexing",
            Self::Concordance => "concordance",
        }
    }
}

/// Stores our command-line args format.
#[derive(Parser, Debug)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    /// Group whose data should be processed
    #[arg(short, long, value_name = "GROUP")]
    pub group: String,

    /// Pipeline to launch jobs for
    #[arg(short, long, value_enum)]
    pub pipeline: PipelineKind,

    /// Config file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    #[arg(env = "SEQLAUNCH_CONFIG")]
    pub config: String,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Dry run; report what would be submitted but don't modify anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Reconcile an ambiguous unit ('UNIT=submitted' or 'UNIT=absent')
    #[arg(long, value_name = "UNIT=OUTCOME")]
    pub resolve: Vec<String>,
}

/// Args of the sample sheet merge tool.
#[derive(Parser, Debug)]
#[command(name = MERGE_CMD_NAME, version, about = None, long_about = None)]
pub struct MergeArgs {
    /// GenomeScan delivery with its sample sheet, checksums.md5 and run dirs
    #[arg(short, long, value_name = "DIR")]
    pub genomescan_dir: PathBuf,

    /// Partial in-house sample sheets, one {project}.csv per project
    #[arg(short, long, value_name = "DIR")]
    pub inhouse_dir: PathBuf,

    /// Where the completed sample sheets are written
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Dry run; check everything but don't write the sheets.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}
