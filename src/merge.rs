//! Completes partial in-house sample sheets with the sequencing metadata of a
//! GenomeScan delivery.
//!
//! A delivery directory holds GenomeScan's sample sheet
//! (`UMCG_CSV_*.csv.converted`), a `checksums.md5` listing the original FASTQ
//! file names, and one directory per sequencer run. Every in-house sheet
//! `{project}.csv` is rewritten with one row per sample per lane, with the
//! lane, run and barcode columns filled in, so the demultiplexing launcher
//! can pick it up.

use std::collections::BTreeMap;
use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use walkdir::WalkDir;

use util::HashMap;

use crate::fs::Fs;
use crate::samplesheet::RunMetadata;

const GS_SHEET_PATTERN: &str = r"^UMCG_CSV_.*\.csv\.converted$";
const CHECKSUMS: &str = "checksums.md5";
const RUN_DIR_PATTERN: &str = r"^([0-9]{6})_([a-zA-Z0-9]{6,8})_([0-9]{4})_([a-zA-Z0-9]{9})$";
const FASTQ_PATTERN: &str =
    r"^([a-z0-9]+).+?([a-zA-Z0-9]{9})_([0-9-]+)_([ATGCN]+-[ATGCN]+)_L00([0-9]).+R1\.fastq\.gz$";
/// `{project}-{sampleProcessStepID}`; the project may contain dashes itself.
const SAMPLE_ID_PATTERN: &str = r"^([a-zA-Z0-9_-]+)-([0-9]+)$";

/// GenomeScan names its sample id column differently depending on who prepped the samples.
const SAMPLE_ID_COLUMNS: [&str; 2] = ["Sample_ID", "ID"];
/// Added to in-house sheets that lack them.
const ADDED_COLUMNS: [&str; 4] = ["barcode", "barcode1", "barcode2", "GS_ID"];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Directory {0:?} does not exist")]
    MissingDir(PathBuf),
    #[error("Input and output sample sheet dirs are both {0:?}; refusing to overwrite the originals")]
    SameDirs(PathBuf),
    #[error("No GenomeScan sample sheet (UMCG_CSV_*.csv.converted) in {0:?}")]
    NoGsSheet(PathBuf),
    #[error("More than one GenomeScan sample sheet in {0:?}")]
    ManyGsSheets(PathBuf),
    #[error("FASTQ on flowcell {flowcell} has no matching run directory: {line}")]
    UnknownFlowcell { flowcell: String, line: String },
    #[error("Sample sheet has no {0} column")]
    MissingColumn(String),
    #[error("Can't split sample id \"{0}\" into a project and a sampleProcessStepID")]
    BadSampleId(String),
    #[error("sampleProcessStepID {0} occurs more than once in the GenomeScan sample sheet")]
    DuplicateSample(String),
    #[error("No FASTQ files listed for GenomeScan sample {gs_id} with barcodes {barcodes}; check the barcodes in the sample sheet")]
    NoFastqs { gs_id: String, barcodes: String },
    #[error("sampleProcessStepID {0} is not in the GenomeScan sample sheet")]
    UnknownSample(String),
    #[error("sampleProcessStepID {id} belongs to project {gs} at GenomeScan but to {inhouse} in-house")]
    ProjectMismatch {
        id: String,
        gs: String,
        inhouse: String,
    },
    #[error("Project {project}: GenomeScan lists {expected} sample(s), the in-house sheet has {found}")]
    SampleCount {
        project: String,
        expected: usize,
        found: usize,
    },
    #[error("Barcodes \"{0}\" are not two dash-separated barcodes")]
    BadBarcodes(String),
}

/// One lane of FASTQ output for a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqLane {
    pub lane: String,
    /// `{barcode1}-{barcode2}`
    pub barcodes: String,
    pub run: RunMetadata,
}

/// A sample as GenomeScan knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsSample {
    pub project: String,
    pub gs_id: String,
    pub lanes: Vec<FastqLane>,
}

/// The parsed GenomeScan sample sheet.
#[derive(Debug, Default)]
pub struct GsSheet {
    /// Keyed by sampleProcessStepID.
    pub samples: HashMap<String, GsSample>,
    /// Samples per project, in project order.
    pub projects: BTreeMap<String, usize>,
}

/// Sequencer runs delivered below `delivery`, keyed by flowcell.
pub fn run_dirs(delivery: &Path) -> Result<HashMap<String, RunMetadata>> {
    let re = Regex::new(RUN_DIR_PATTERN)?;
    let mut runs = HashMap::default();
    for entry in WalkDir::new(delivery).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Some(caps) = re.captures(&name) else {
            log::debug!("skipping {name}, which is not named like a run dir");
            continue;
        };
        let run = RunMetadata {
            sequencing_start_date: caps[1].to_owned(),
            sequencer: caps[2].to_owned(),
            run: caps[3].to_owned(),
            flowcell: caps[4].to_owned(),
        };
        log::debug!("found run {name}");
        runs.insert(run.flowcell.clone(), run);
    }
    Ok(runs)
}

/// Lanes per sample from the R1 FASTQ names in a checksum file,
/// keyed by `{barcodes}-{gs_id}`.
pub fn parse_checksums<R: BufRead>(
    reader: R,
    runs: &HashMap<String, RunMetadata>,
) -> Result<HashMap<String, Vec<FastqLane>>> {
    let re = Regex::new(FASTQ_PATTERN)?;
    let mut fastqs: HashMap<String, Vec<FastqLane>> = HashMap::default();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let flowcell = &caps[2];
        let run = runs.get(flowcell).ok_or_else(|| Error::UnknownFlowcell {
            flowcell: flowcell.to_owned(),
            line: line.to_owned(),
        })?;
        let barcodes = caps[4].to_owned();
        fastqs
            .entry(format!("{barcodes}-{}", &caps[3]))
            .or_default()
            .push(FastqLane {
                lane: caps[5].to_owned(),
                barcodes,
                run: run.clone(),
            });
    }
    Ok(fastqs)
}

fn column(headers: &csv::StringRecord, name: &str) -> Result<usize, Error> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| Error::MissingColumn(name.to_owned()))
}

/// Parse GenomeScan's sample sheet, matching every sample with its FASTQ lanes.
pub fn parse_gs_sheet<R: Read>(
    reader: R,
    fastqs: &HashMap<String, Vec<FastqLane>>,
) -> Result<GsSheet> {
    let id_re = Regex::new(SAMPLE_ID_PATTERN)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    let id_col = SAMPLE_ID_COLUMNS
        .iter()
        .find_map(|name| column(&headers, name).ok())
        .ok_or_else(|| Error::MissingColumn(SAMPLE_ID_COLUMNS.join(" or ")))?;
    let gs_id_col = column(&headers, "GS_ID")?;
    let index1_col = column(&headers, "Index1")?;
    let index2_col = column(&headers, "Index2")?;

    let mut sheet = GsSheet::default();
    for record in rdr.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        let sample_id = field(id_col);
        if sample_id.is_empty() {
            log::warn!("skipping a row without sample id in the GenomeScan sample sheet");
            continue;
        }
        let caps = id_re
            .captures(sample_id)
            .ok_or_else(|| Error::BadSampleId(sample_id.to_owned()))?;
        let (project, step_id) = (&caps[1], &caps[2]);
        if sheet.samples.contains_key(step_id) {
            return Err(Error::DuplicateSample(step_id.to_owned()).into());
        }

        let gs_id = field(gs_id_col);
        let barcodes = format!("{}-{}", field(index1_col), field(index2_col));
        let lanes = fastqs
            .get(&format!("{barcodes}-{gs_id}"))
            .ok_or_else(|| Error::NoFastqs {
                gs_id: gs_id.to_owned(),
                barcodes: barcodes.clone(),
            })?;
        log::debug!("{step_id}: project {project}, {} lane(s)", lanes.len());

        *sheet.projects.entry(project.to_owned()).or_default() += 1;
        sheet.samples.insert(
            step_id.to_owned(),
            GsSample {
                project: project.to_owned(),
                gs_id: gs_id.to_owned(),
                lanes: lanes.clone(),
            },
        );
    }
    Ok(sheet)
}

/// Fill in the lane-level columns of one project's in-house sheet.
/// Returns the completed sheet and the number of samples it lists.
pub fn complete_sheet<R: Read>(reader: R, gs: &GsSheet) -> Result<(String, usize)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let mut headers: Vec<String> = rdr.headers()?.iter().map(str::to_owned).collect();
    for added in ADDED_COLUMNS {
        if !headers.iter().any(|h| h == added) {
            headers.push(added.to_owned());
        }
    }
    let header_record = csv::StringRecord::from(headers.clone());
    let step_col = column(&header_record, "sampleProcessStepID")?;
    let project_col = column(&header_record, "project")?;

    let mut wtr = csv::Writer::from_writer(Vec::with_capacity(4096));
    wtr.write_record(&headers)?;
    let mut samples = 0;
    for record in rdr.records() {
        let record = record?;
        samples += 1;
        let step_id = record.get(step_col).unwrap_or("").trim();
        let sample = gs
            .samples
            .get(step_id)
            .ok_or_else(|| Error::UnknownSample(step_id.to_owned()))?;
        let project = record.get(project_col).unwrap_or("").trim();
        if project != sample.project {
            return Err(Error::ProjectMismatch {
                id: step_id.to_owned(),
                gs: sample.project.clone(),
                inhouse: project.to_owned(),
            }
            .into());
        }

        for fastq in &sample.lanes {
            let (barcode1, barcode2) = fastq
                .barcodes
                .split_once('-')
                .ok_or_else(|| Error::BadBarcodes(fastq.barcodes.clone()))?;
            let row = headers.iter().enumerate().map(|(i, name)| match name.as_str() {
                "lane" => fastq.lane.as_str(),
                "sequencer" => fastq.run.sequencer.as_str(),
                "run" => fastq.run.run.as_str(),
                "flowcell" => fastq.run.flowcell.as_str(),
                "sequencingStartDate" => fastq.run.sequencing_start_date.as_str(),
                "barcode" => fastq.barcodes.as_str(),
                "barcode1" => barcode1,
                "barcode2" => barcode2,
                "GS_ID" => sample.gs_id.as_str(),
                _ => record.get(i).unwrap_or(""),
            });
            wtr.write_record(row)?;
        }
    }

    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok((String::from_utf8(bytes)?, samples))
}

fn gs_sheet_path(delivery: &Path) -> Result<PathBuf> {
    let re = Regex::new(GS_SHEET_PATTERN)?;
    let mut found = Vec::with_capacity(1);
    for entry in std::fs::read_dir(delivery).with_context(|| format!("while listing {delivery:?}"))? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| re.is_match(name));
        if matches && path.is_file() {
            found.push(path);
        }
    }
    match found.len() {
        0 => Err(Error::NoGsSheet(delivery.to_path_buf()).into()),
        1 => Ok(found.remove(0)),
        _ => Err(Error::ManyGsSheets(delivery.to_path_buf()).into()),
    }
}

/// Complete every project's in-house sheet in `inhouse_dir` with the
/// metadata from `delivery`, writing the results into the work dir of `fs`.
/// Returns the paths of the completed sheets.
pub fn merge_samplesheets(fs: &Fs, delivery: &Path, inhouse_dir: &Path) -> Result<Vec<PathBuf>> {
    for dir in [delivery, inhouse_dir, fs.work_dir()] {
        if !dir.is_dir() {
            return Err(Error::MissingDir(dir.to_path_buf()).into());
        }
    }
    let output_dir = fs.work_dir().canonicalize()?;
    if inhouse_dir.canonicalize()? == output_dir {
        return Err(Error::SameDirs(output_dir).into());
    }

    let gs_path = gs_sheet_path(delivery)?;
    log::info!("found GenomeScan sample sheet {gs_path:?}");
    let checksums = delivery.join(CHECKSUMS);
    let reader = fs
        .open_buffered(&checksums)
        .with_context(|| format!("while opening {checksums:?}"))?;
    let fastqs = parse_checksums(reader, &run_dirs(delivery)?)
        .with_context(|| format!("in {checksums:?}"))?;
    let gs_file = std::fs::File::open(&gs_path)
        .with_context(|| format!("while opening {gs_path:?}"))?;
    let gs = parse_gs_sheet(gs_file, &fastqs).with_context(|| format!("in {gs_path:?}"))?;

    let mut written = Vec::with_capacity(gs.projects.len());
    for (project, &expected) in &gs.projects {
        let src = inhouse_dir.join(format!("{project}.csv"));
        let f = std::fs::File::open(&src)
            .with_context(|| format!("while opening in-house sample sheet {src:?}"))?;
        let (text, found) = complete_sheet(f, &gs).with_context(|| format!("in {src:?}"))?;
        if found != expected {
            return Err(Error::SampleCount {
                project: project.clone(),
                expected,
                found,
            }
            .into());
        }

        let tgt = fs.work_dir().join(format!("{project}.csv"));
        if fs.is_dry_run() {
            log::info!("Dry run. Not writing {tgt:?}");
        } else {
            log::info!("writing complete sample sheet {tgt:?}");
            fs.write_file_atomic(&tgt, &text)?;
        }
        written.push(tgt);
    }
    Ok(written)
}
