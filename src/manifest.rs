//! Concordance manifests: which array sample to compare with which NGS sample.
//!
//! Tab-delimited, one header row (ignored), then one row per pair:
//!
//! ```text
//! arrayId  ngsId  arrayVcf  ngsVcf
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use util::HashMap;

const MIN_COLUMNS: usize = 4;
const COLUMN_NAMES: [&str; MIN_COLUMNS] = [
    "array sample id",
    "NGS sample id",
    "array file",
    "NGS file",
];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("line {line}: expected at least {MIN_COLUMNS} tab-separated columns, found {found}")]
    MissingColumns { line: u64, found: usize },
    #[error("line {line}: {column} is empty")]
    EmptyField { line: u64, column: &'static str },
    #[error("line {line}: pair {array_id}/{ngs_id} would share its output names with line {first}")]
    DuplicatePair {
        line: u64,
        first: u64,
        array_id: String,
        ngs_id: String,
    },
    #[error("manifest contains no sample rows")]
    NoRows,
}

/// One array-vs-NGS comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonPair {
    pub array_id: String,
    pub ngs_id: String,
    pub array_file: PathBuf,
    pub ngs_file: PathBuf,
}

impl ComparisonPair {
    /// `{array_id}_{ngs_id}`, the stem of every file made for this pair.
    pub fn label(&self) -> String {
        format!("{}_{}", self.array_id, self.ngs_id)
    }
}

/// Read and validate the manifest at `path`.
pub fn read_manifest(path: &Path) -> Result<Vec<ComparisonPair>> {
    let f = std::fs::File::open(path).with_context(|| format!("while opening manifest {path:?}"))?;
    parse_manifest(f).with_context(|| format!("in manifest {path:?}"))
}

/// Parse a manifest. Any malformed row fails the whole manifest.
pub fn parse_manifest<R: Read>(reader: R) -> Result<Vec<ComparisonPair>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut pairs = Vec::with_capacity(4);
    let mut seen: HashMap<String, u64> = HashMap::default();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() < MIN_COLUMNS {
            return Err(Error::MissingColumns {
                line,
                found: record.len(),
            }
            .into());
        }
        let mut fields = [""; MIN_COLUMNS];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = record[i].trim();
            if field.is_empty() {
                return Err(Error::EmptyField {
                    line,
                    column: COLUMN_NAMES[i],
                }
                .into());
            }
        }
        let [array_id, ngs_id, array_file, ngs_file] = fields;
        let pair = ComparisonPair {
            array_id: array_id.to_owned(),
            ngs_id: ngs_id.to_owned(),
            array_file: PathBuf::from(array_file),
            ngs_file: PathBuf::from(ngs_file),
        };
        if let Some(&first) = seen.get(&pair.label()) {
            return Err(Error::DuplicatePair {
                line,
                first,
                array_id: pair.array_id,
                ngs_id: pair.ngs_id,
            }
            .into());
        }
        seen.insert(pair.label(), line);
        pairs.push(pair);
    }

    if pairs.is_empty() {
        return Err(Error::NoRows.into());
    }
    Ok(pairs)
}
