use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;
use seqlaunch::{
    App, Args, CommandRunner, LockError, LockGuard, PipelineKind, ToolCall, ToolOutput,
};
use tempfile::{tempdir, TempDir};
use walkdir::WalkDir;

const ARRAY_VCF: &str = "\
##fileformat=VCFv4.2
##contig=<ID=1,length=249250621>
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
";

const DEMUX_RUN: &str = "230101_A00379_0012_AHGTKDDSX5";
const DEMUX_SHEET: &str = "externalSampleID,project,sequencer,sequencingStartDate,flowcell,run,lane,seqType,prepKit,capturingKit,barcode,barcodeType
S1,P1,A00379,230101,AHGTKDDSX5,0012,1,PE,Kit,None,ACGT,RPI
";

/// Records every call; accepts every job. bedtools output files are created
/// so the tree looks like a real run.
#[derive(Clone, Default)]
struct FakeRunner {
    calls: Rc<RefCell<Vec<ToolCall>>>,
}

impl FakeRunner {
    fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.program.clone()).collect()
    }

    fn count(&self, program: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&mut self, call: &ToolCall) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(call.clone());
        if let Some(out) = &call.stdout_to {
            fs::write(out, "##fileformat=VCFv4.2\n")?;
        }
        if call.program == "sbatch" {
            Ok(ToolOutput::ok("Submitted batch job 4242\n"))
        } else {
            Ok(ToolOutput::ok(""))
        }
    }
}

/// A temp tree with a config file, input data and work dirs.
struct Site {
    root: TempDir,
}

impl Site {
    fn new(expected_user: Option<&str>) -> Result<Self> {
        let site = Self { root: tempdir()? };
        for dir in ["in", "sheets", "sequencers", "demux-sheets", "concordance", "demux", "locks"] {
            fs::create_dir_all(site.path(dir))?;
        }
        fs::write(site.path("in/a1.vcf"), ARRAY_VCF)?;
        fs::write(site.path("in/n1.vcf.gz"), "ngs")?;

        let user = expected_user
            .map(|u| format!("expected_user = '{u}'\n"))
            .unwrap_or_default();
        let config = format!(
            "lock_dir = '{locks}'

[groups.test]
{user}
[groups.test.concordance]
work_dir = '{concordance}'
samplesheets_dir = '{sheets}'

[groups.test.demultiplexing]
work_dir = '{demux}'
sequencers_dir = '{sequencers}'
samplesheets_dir = '{demux_sheets}'
",
            locks = site.path("locks").display(),
            concordance = site.path("concordance").display(),
            sheets = site.path("sheets").display(),
            demux = site.path("demux").display(),
            sequencers = site.path("sequencers").display(),
            demux_sheets = site.path("demux-sheets").display(),
        );
        fs::write(site.path("seqlaunch.toml"), config)?;
        Ok(site)
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// Canonical path inside the concordance work dir.
    fn work(&self, rel: &str) -> Result<PathBuf> {
        Ok(self.path("concordance").canonicalize()?.join(rel))
    }

    fn write_manifest(&self, unit: &str) -> Result<()> {
        fs::write(
            self.path(&format!("sheets/{unit}.sampleId.txt")),
            format!(
                "arrayId\tngsId\tarrayFile\tngsFile\nA1\tN1\t{}\t{}\n",
                self.path("in/a1.vcf").display(),
                self.path("in/n1.vcf.gz").display()
            ),
        )?;
        Ok(())
    }

    fn args(&self, pipeline: PipelineKind) -> Args {
        Args {
            group: String::from("test"),
            pipeline,
            config: self.path("seqlaunch.toml").display().to_string(),
            log_level: String::from("warn"),
            dry_run: false,
            resolve: Vec::with_capacity(0),
        }
    }

    fn run_args(&self, args: Args, runner: &FakeRunner) -> Result<()> {
        simple_logging::log_to_stderr(log::LevelFilter::Warn);
        let settings = args.try_into()?;
        let app = App::with_runner(settings, Box::new(runner.clone()));
        app.run()
    }

    fn run(&self, pipeline: PipelineKind, runner: &FakeRunner) -> Result<()> {
        self.run_args(self.args(pipeline), runner)
    }

    /// Every file and dir under `rel`, sorted.
    fn snapshot(&self, rel: &str) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(self.path(rel))
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .collect();
        paths.sort();
        paths
    }
}

fn exists(path: PathBuf) -> bool {
    path.exists()
}

#[test]
fn test_ready_unit_is_generated_and_submitted() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    let runner = FakeRunner::default();

    site.run(PipelineKind::Concordance, &runner)?;

    assert!(exists(site.work("tmp/RUN_042")?), "working dir created");
    assert!(exists(site.work("tmp/RUN_042/a1.vcf")?), "array vcf staged");
    assert!(exists(site.work("tmp/RUN_042/n1.vcf.gz")?), "ngs vcf staged");
    assert!(exists(site.work("tmp/RUN_042/A1_N1.region.bed")?));
    assert!(exists(site.work("jobs/RUN_042.sh")?), "job script created");
    assert!(exists(site.work("logs/RUN_042.started")?), "unit marked started");
    assert_eq!(
        fs::read_to_string(site.work("jobs/RUN_042.sh.started")?)?,
        "4242\n"
    );
    assert_eq!(runner.programs(), vec!["bedtools", "sbatch"]);

    let script = fs::read_to_string(site.work("jobs/RUN_042.sh")?)?;
    assert!(script.contains("compareGenotypeCalls"));
    assert!(script.contains("set -euo pipefail"));
    Ok(())
}

#[test]
fn test_finished_unit_is_left_alone() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_043")?;
    for dir in ["logs", "jobs", "tmp", "results"] {
        fs::create_dir_all(site.path("concordance").join(dir))?;
    }
    fs::write(site.path("concordance/jobs/RUN_043.sh"), "#!/bin/bash\n")?;
    fs::write(site.path("concordance/jobs/RUN_043.sh.finished"), "17\n")?;
    fs::write(site.path("concordance/logs/RUN_043.finished"), "")?;
    let before = site.snapshot("concordance");
    let runner = FakeRunner::default();

    site.run(PipelineKind::Concordance, &runner)?;

    assert!(runner.programs().is_empty(), "no external calls");
    assert_eq!(site.snapshot("concordance"), before, "no new files");
    Ok(())
}

#[test]
fn test_repeated_passes_submit_once() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    let runner = FakeRunner::default();

    for _ in 0..4 {
        site.run(PipelineKind::Concordance, &runner)?;
    }

    assert_eq!(runner.count("sbatch"), 1);
    assert_eq!(runner.count("bedtools"), 1);
    Ok(())
}

#[test]
fn test_held_lock_fails_without_side_effects() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    let _held = LockGuard::try_acquire(&site.path("locks/concordance.test.lock"))?;
    let before = site.snapshot("concordance");
    let runner = FakeRunner::default();

    let err = site.run(PipelineKind::Concordance, &runner).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<LockError>(),
        Some(LockError::Locked(_))
    ));
    assert!(runner.programs().is_empty());
    assert_eq!(site.snapshot("concordance"), before);
    Ok(())
}

#[test]
fn test_other_pipeline_does_not_share_lock() -> Result<()> {
    let site = Site::new(None)?;
    let _held = LockGuard::try_acquire(&site.path("locks/concordance.test.lock"))?;
    site.run(PipelineKind::Demultiplexing, &FakeRunner::default())?;
    Ok(())
}

#[test]
fn test_malformed_manifest_fails_unit() -> Result<()> {
    let site = Site::new(None)?;
    fs::write(
        site.path("sheets/RUN_044.sampleId.txt"),
        "arrayId\tngsId\tarrayFile\nA1\tN1\t/in/a1.vcf\n",
    )?;
    let runner = FakeRunner::default();

    assert!(site.run(PipelineKind::Concordance, &runner).is_err());

    assert!(!exists(site.work("logs/RUN_044.started")?));
    assert!(!exists(site.work("jobs/RUN_044.sh")?));
    assert!(runner.programs().is_empty());
    Ok(())
}

#[test]
fn test_failed_unit_does_not_block_others() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    fs::write(site.path("sheets/RUN_044.sampleId.txt"), "arrayId\tngsId\n")?;
    let runner = FakeRunner::default();

    assert!(site.run(PipelineKind::Concordance, &runner).is_err());

    assert!(exists(site.work("logs/RUN_042.started")?));
    assert_eq!(runner.count("sbatch"), 1);
    Ok(())
}

#[test]
fn test_existing_script_is_reused() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    fs::create_dir_all(site.path("concordance/jobs"))?;
    fs::write(site.path("concordance/jobs/RUN_042.sh"), "#!/bin/bash\necho kept\n")?;
    let runner = FakeRunner::default();

    site.run(PipelineKind::Concordance, &runner)?;

    assert_eq!(runner.programs(), vec!["sbatch"], "no pre-processing re-run");
    assert_eq!(
        fs::read_to_string(site.work("jobs/RUN_042.sh")?)?,
        "#!/bin/bash\necho kept\n"
    );
    assert!(!exists(site.work("tmp/RUN_042")?));
    Ok(())
}

#[test]
fn test_dry_run_changes_nothing() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    let before = site.snapshot("concordance");
    let runner = FakeRunner::default();

    let mut args = site.args(PipelineKind::Concordance);
    args.dry_run = true;
    site.run_args(args, &runner)?;

    assert!(runner.programs().is_empty());
    assert_eq!(site.snapshot("concordance"), before);
    Ok(())
}

#[test]
fn test_dry_run_refuses_resolve() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    for dir in ["logs", "jobs"] {
        fs::create_dir_all(site.path("concordance").join(dir))?;
    }
    fs::write(site.path("concordance/logs/RUN_042.ambiguous"), "")?;
    fs::write(site.path("concordance/jobs/RUN_042.sh.started"), "submitting\n")?;
    let before = site.snapshot("concordance");
    let runner = FakeRunner::default();

    let mut args = site.args(PipelineKind::Concordance);
    args.dry_run = true;
    args.resolve = vec![String::from("RUN_042=absent")];
    assert!(site.run_args(args, &runner).is_err());

    assert!(exists(site.path("concordance/logs/RUN_042.ambiguous")));
    assert_eq!(site.snapshot("concordance"), before);
    Ok(())
}

#[test]
fn test_orphaned_submission_is_resolved() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    for dir in ["logs", "jobs"] {
        fs::create_dir_all(site.path("concordance").join(dir))?;
    }
    fs::write(site.path("concordance/jobs/RUN_042.sh"), "#!/bin/bash\n")?;
    fs::write(site.path("concordance/jobs/RUN_042.sh.started"), "4242\n")?;
    let runner = FakeRunner::default();

    // ambiguous: skipped, not resubmitted
    site.run(PipelineKind::Concordance, &runner)?;
    assert!(runner.programs().is_empty());

    let mut args = site.args(PipelineKind::Concordance);
    args.resolve = vec![String::from("RUN_042=submitted")];
    site.run_args(args, &runner)?;
    assert!(exists(site.work("logs/RUN_042.started")?));

    site.run(PipelineKind::Concordance, &runner)?;
    assert!(runner.programs().is_empty());
    Ok(())
}

#[test]
fn test_resolved_absent_is_submitted_again() -> Result<()> {
    let site = Site::new(None)?;
    site.write_manifest("RUN_042")?;
    for dir in ["logs", "jobs"] {
        fs::create_dir_all(site.path("concordance").join(dir))?;
    }
    fs::write(site.path("concordance/logs/RUN_042.ambiguous"), "")?;
    let runner = FakeRunner::default();

    let mut args = site.args(PipelineKind::Concordance);
    args.resolve = vec![String::from("RUN_042=absent")];
    site.run_args(args, &runner)?;
    assert!(!exists(site.work("logs/RUN_042.ambiguous")?));

    site.run(PipelineKind::Concordance, &runner)?;
    assert_eq!(runner.count("sbatch"), 1);
    Ok(())
}

#[test]
fn test_demultiplexing_run() -> Result<()> {
    let site = Site::new(None)?;
    let run_dir = site.path("sequencers").join(DEMUX_RUN);
    fs::create_dir_all(&run_dir)?;
    fs::write(site.path(&format!("demux-sheets/{DEMUX_RUN}.csv")), DEMUX_SHEET)?;
    let runner = FakeRunner::default();

    // not copied yet:
    site.run(PipelineKind::Demultiplexing, &runner)?;
    assert!(runner.programs().is_empty());

    fs::write(run_dir.join("CopyComplete.txt"), "")?;
    site.run(PipelineKind::Demultiplexing, &runner)?;
    assert_eq!(runner.programs(), vec!["sbatch"]);

    let work = site.path("demux").canonicalize()?;
    let script = fs::read_to_string(work.join(format!("jobs/{DEMUX_RUN}.sh")))?;
    assert!(script.contains("bcl2fastq --runfolder-dir"));
    assert!(work.join(format!("tmp/{DEMUX_RUN}/{DEMUX_RUN}.csv")).exists());
    assert!(work.join(format!("logs/{DEMUX_RUN}.started")).exists());
    Ok(())
}

#[test]
fn test_wrong_user_is_refused() -> Result<()> {
    let site = Site::new(Some("seqlaunch-test-nobody"))?;
    site.write_manifest("RUN_042")?;
    let runner = FakeRunner::default();

    let err = site.run(PipelineKind::Concordance, &runner).unwrap_err();
    assert!(err.to_string().contains("seqlaunch-test-nobody"));
    assert!(runner.programs().is_empty());
    assert!(!site.path("concordance/logs").exists());
    Ok(())
}

#[test]
fn test_unknown_group_is_refused() -> Result<()> {
    let site = Site::new(None)?;
    let mut args = site.args(PipelineKind::Concordance);
    args.group = String::from("nope");
    assert!(site.run_args(args, &FakeRunner::default()).is_err());
    Ok(())
}
