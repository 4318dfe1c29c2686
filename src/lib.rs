/// High-level command line app
mod app;
/// Definition of command-line args
mod args;
/// Readiness rules shared by all pipelines
mod classify;
/// On-disk configuration
mod config;
/// Per-unit loop over one scan
mod discovery;
/// Collected unit failures
mod errors;
/// Subprocesses and job submission
mod exec;
/// Filesystem operations
mod fs;
/// Single-instance guard
mod lock;
/// Concordance manifest parsing
mod manifest;
/// Completing in-house sample sheets from GenomeScan deliveries
mod merge;
/// Demultiplexing and concordance launchers
mod pipeline;
/// Job script generation
mod prep;
/// Run sample sheet checks
mod samplesheet;
/// Candidate enumeration
mod scan;
/// Combined command-line and config file run settings
mod settings;
/// Text UI
mod ui;
/// Work unit identity
mod unit;

// exported for tests:
pub use app::App;
pub use args::{Args, MergeArgs, PipelineKind};
pub use exec::{CommandRunner, ToolCall, ToolOutput};
pub use lock::{LockError, LockGuard};
pub use settings::Settings;

/// Run the command-line app.
pub fn run() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();
    run_with(args, simple_logging::log_to_stderr)
}

/// Interpret `args` and run the app, installing logging with `init_log`.
/// A fatal error is logged before it is returned.
fn run_with(args: Args, init_log: impl Fn(log::LevelFilter)) -> Result<(), anyhow::Error> {
    // until the settings are read, only errors get through:
    init_log(log::LevelFilter::Error);
    let result = interpret_and_run(args, &init_log);
    if let Err(e) = &result {
        log::error!("{e:#}");
    }
    result
}

/// Run the sample sheet merge tool.
pub fn run_merge() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = MergeArgs::parse();
    simple_logging::log_to_stderr(log::LevelFilter::Error);
    let result = merge_with(&args);
    if let Err(e) = &result {
        log::error!("{e:#}");
    }
    result
}

fn merge_with(args: &MergeArgs) -> Result<(), anyhow::Error> {
    simple_logging::log_to_stderr(settings::parse_log_level(&args.log_level)?);
    let out = fs::Fs::new(&args.output_dir, args.dry_run);
    let written = merge::merge_samplesheets(&out, &args.genomescan_dir, &args.inhouse_dir)?;
    log::info!("completed {} sample sheet(s)", written.len());
    Ok(())
}

fn interpret_and_run(args: Args, init_log: impl Fn(log::LevelFilter)) -> Result<(), anyhow::Error> {
    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;
    init_log(settings.log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()?;

    Ok(())
}
