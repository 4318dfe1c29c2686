//! Sanity checks for a run's sample sheet before it is handed to the
//! demultiplexer.
//!
//! The sheet is named after the run (`{date}_{sequencer}_{run}_{flowcell}.csv`)
//! and every row must agree with that name. All problems are collected so
//! the lab can fix the sheet in one go.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use util::HashMap;

/// Columns every sample sheet must have, with a value in every row.
pub const REQUIRED_COLUMNS: [&str; 12] = [
    "externalSampleID",
    "project",
    "sequencer",
    "sequencingStartDate",
    "flowcell",
    "run",
    "lane",
    "seqType",
    "prepKit",
    "capturingKit",
    "barcode",
    "barcodeType",
];

/// Columns where "no value" must be written out as `None`.
const EXPLICIT_NONE_COLUMNS: [&str; 3] = ["capturingKit", "barcode", "barcodeType"];

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Sample sheet name \"{0}\" is not formatted as DATE_SEQUENCER_RUN_FLOWCELL")]
    BadFileName(String),
    #[error("Sample sheet failed {} check(s):\n{}", .0.len(), .0.join("\n"))]
    Invalid(Vec<String>),
}

/// Run metadata encoded in a run (and sample sheet) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub sequencing_start_date: String,
    pub sequencer: String,
    pub run: String,
    pub flowcell: String,
}

impl RunMetadata {
    /// Split a run name; everything after the third `_` is the flowcell.
    pub fn from_run_name(name: &str) -> Result<Self, Error> {
        let mut parts = name.splitn(4, '_');
        let mut next = || {
            parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::BadFileName(name.to_owned()))
        };
        Ok(Self {
            sequencing_start_date: next()?.to_owned(),
            sequencer: next()?.to_owned(),
            run: next()?.to_owned(),
            flowcell: next()?.to_owned(),
        })
    }

    fn expected(&self, column: &str) -> Option<&str> {
        match column {
            "sequencingStartDate" => Some(self.sequencing_start_date.as_str()),
            "sequencer" => Some(self.sequencer.as_str()),
            "run" => Some(self.run.as_str()),
            "flowcell" => Some(self.flowcell.as_str()),
            _ => None,
        }
    }
}

/// Check the sample sheet at `path` for the run `run_name`.
/// Returns the number of sample rows.
pub fn check_samplesheet(path: &Path, run_name: &str) -> Result<usize> {
    let meta = RunMetadata::from_run_name(run_name)?;
    let f = std::fs::File::open(path)
        .with_context(|| format!("while opening sample sheet {path:?}"))?;
    check(f, &meta).with_context(|| format!("in sample sheet {path:?}"))
}

/// Check a comma-separated sample sheet against `meta`.
pub fn check<R: Read>(reader: R, meta: &RunMetadata) -> Result<usize> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !index.contains_key(col))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Invalid(vec![format!(
            "Required column(s) missing (or with a trailing space): {}.",
            missing.join(", ")
        )])
        .into());
    }

    let mut problems = Vec::with_capacity(0);
    let mut rows = 0;
    for record in rdr.records() {
        let record = record?;
        rows += 1;
        let line = record.position().map_or(0, |p| p.line());
        for column in REQUIRED_COLUMNS {
            let value = record.get(index[column]).unwrap_or("").trim();
            if value.is_empty() {
                if EXPLICIT_NONE_COLUMNS.contains(&column) {
                    problems.push(format!(
                        "line {line}: {column} is empty; fill in \"None\" to show it is not missing."
                    ));
                } else {
                    problems.push(format!("line {line}: {column} is empty."));
                }
            } else if let Some(expected) = meta.expected(column) {
                if value != expected {
                    problems.push(format!(
                        "line {line}: {column} value ({value}) does not match {column} in file name ({expected})."
                    ));
                }
            }
        }
    }

    if rows == 0 {
        problems.push("Sample sheet has no sample rows.".to_owned());
    }
    if problems.is_empty() {
        Ok(rows)
    } else {
        Err(Error::Invalid(problems).into())
    }
}
