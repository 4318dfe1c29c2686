use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use util::{file_name_str, HashMap};

use crate::config::ConcordanceConfig;
use crate::exec::{self, CommandRunner, ToolCall};
use crate::fs::Fs;
use crate::manifest::{read_manifest, ComparisonPair};
use crate::prep::{self, template, JobBody, UnitPaths};
use crate::scan::scan_recursive;
use crate::unit::WorkUnit;

use super::{Pipeline, Readiness, SkipReason};

const PLACEHOLDERS: [&str; 5] = ["array_vcf", "ngs_vcf", "output_prefix", "array_id", "ngs_id"];

/// Compares array genotypes with NGS variant calls for every pair
/// listed in a sample sheet.
pub struct ConcordancePipeline<'a> {
    config: &'a ConcordanceConfig,
    sheet_re: Regex,
    region_re: Regex,
}

impl<'a> ConcordancePipeline<'a> {
    pub fn new(config: &'a ConcordanceConfig) -> Result<Self> {
        let sheet_re = Regex::new(&config.samplesheet_pattern).with_context(|| {
            format!("invalid samplesheet_pattern {:?}", config.samplesheet_pattern)
        })?;
        let region_re = Regex::new(&config.region_pattern)
            .with_context(|| format!("invalid region_pattern {:?}", config.region_pattern))?;
        if region_re.captures_len() < 3 {
            anyhow::bail!(
                "region_pattern {:?} must capture a contig name and a length",
                config.region_pattern
            );
        }
        template::validate(&config.command, &PLACEHOLDERS)
            .context("invalid concordance command")?;
        Ok(Self {
            config,
            sheet_re,
            region_re,
        })
    }
}

fn staged(paths: &UnitPaths, src: &Path) -> Result<PathBuf> {
    Ok(paths.tmp_dir.join(file_name_str(src)?))
}

fn region_bed(paths: &UnitPaths, pair: &ComparisonPair) -> PathBuf {
    paths.tmp_dir.join(format!("{}.region.bed", pair.label()))
}

fn intersected(paths: &UnitPaths, pair: &ComparisonPair) -> PathBuf {
    paths.tmp_dir.join(format!("{}.intersected.vcf", pair.label()))
}

/// Contigs and their lengths declared in a VCF header, as matched by `re`.
/// Reading stops at the first non-header line.
pub fn regions_from_header<R: BufRead>(reader: R, re: &Regex) -> Result<Vec<(String, u64)>> {
    let mut regions = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.starts_with('#') {
            break;
        }
        if let Some(caps) = re.captures(&line) {
            let length = caps[2]
                .parse::<u64>()
                .with_context(|| format!("bad contig length in header line {line:?}"))?;
            regions.push((caps[1].to_owned(), length));
        }
    }
    Ok(regions)
}

impl ConcordancePipeline<'_> {
    /// Copy every input file into the tmp dir once, refusing two different
    /// files that would land on the same name.
    fn stage_inputs(&self, fs: &Fs, paths: &UnitPaths, pairs: &[ComparisonPair]) -> Result<()> {
        let mut staged_from: HashMap<&str, &Path> = HashMap::default();
        for pair in pairs {
            for src in [&pair.array_file, &pair.ngs_file] {
                let name = file_name_str(src)?;
                match staged_from.get(name) {
                    Some(first) if *first == src.as_path() => continue,
                    Some(first) => {
                        return Err(prep::Error::StagingCollision {
                            name: name.to_owned(),
                            first: first.to_path_buf(),
                            second: src.clone(),
                        }
                        .into())
                    }
                    None => {}
                }
                log::debug!("staging {src:?}");
                fs.copy(src, paths.tmp_dir.join(name))?;
                staged_from.insert(name, src);
            }
        }
        Ok(())
    }

    /// Write a BED file covering every contig in the array VCF header.
    fn write_region_bed(&self, fs: &Fs, paths: &UnitPaths, pair: &ComparisonPair) -> Result<()> {
        let array_vcf = staged(paths, &pair.array_file)?;
        let reader = fs
            .open_buffered(&array_vcf)
            .with_context(|| format!("while opening {array_vcf:?}"))?;
        let regions = regions_from_header(reader, &self.region_re)
            .with_context(|| format!("while reading header of {array_vcf:?}"))?;
        if regions.is_empty() {
            return Err(prep::Error::RegionNotFound(pair.array_file.clone()).into());
        }

        let mut bed = String::with_capacity(regions.len() * 32);
        for (contig, length) in &regions {
            bed.push_str(&format!("{contig}\t0\t{length}\n"));
        }
        fs.write_file(region_bed(paths, pair), &bed)
    }

    /// Restrict the NGS calls to the region the array covers.
    fn intersect(
        &self,
        runner: &mut dyn CommandRunner,
        paths: &UnitPaths,
        pair: &ComparisonPair,
    ) -> Result<()> {
        let call = ToolCall::new(&self.config.bedtools)
            .args(["intersect", "-header", "-a"])
            .arg(staged(paths, &pair.ngs_file)?)
            .arg("-b")
            .arg(region_bed(paths, pair))
            .current_dir(&paths.tmp_dir)
            .stdout_to(intersected(paths, pair));
        log::info!("running `{call}`");
        let output = runner.run(&call)?;
        if !output.success {
            return Err(exec::Error::tool_failed(&call, &output).into());
        }
        Ok(())
    }
}

impl Pipeline for ConcordancePipeline<'_> {
    type Inputs = Vec<ComparisonPair>;

    fn name(&self) -> &'static str {
        "concordance"
    }

    fn candidates(&self) -> Result<Box<dyn Iterator<Item = Result<WorkUnit>> + '_>> {
        let sheet_re = &self.sheet_re;
        let sheets = scan_recursive(&self.config.samplesheets_dir, move |path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| sheet_re.is_match(name))
        })?;
        Ok(Box::new(
            sheets.map(move |path| WorkUnit::from_file_name(path?, sheet_re)),
        ))
    }

    fn inspect(&self, unit: &WorkUnit) -> Result<Readiness<Vec<ComparisonPair>>> {
        let pairs = read_manifest(unit.path())?;
        for pair in &pairs {
            for file in [&pair.array_file, &pair.ngs_file] {
                if !file.exists() {
                    return Ok(Readiness::Skip(SkipReason::SourceNotReady(format!(
                        "{file:?} not present"
                    ))));
                }
            }
        }
        Ok(Readiness::Ready(pairs))
    }

    fn preprocess(
        &self,
        fs: &Fs,
        runner: &mut dyn CommandRunner,
        _unit: &WorkUnit,
        paths: &UnitPaths,
        pairs: &Vec<ComparisonPair>,
    ) -> Result<()> {
        self.stage_inputs(fs, paths, pairs)?;
        for pair in pairs {
            self.write_region_bed(fs, paths, pair)?;
            self.intersect(runner, paths, pair)?;
        }
        Ok(())
    }

    fn job_body(
        &self,
        _unit: &WorkUnit,
        paths: &UnitPaths,
        pairs: &Vec<ComparisonPair>,
    ) -> Result<JobBody> {
        let results_dir = paths.results_dir.to_string_lossy();
        let mut commands = Vec::with_capacity(pairs.len() + 1);
        commands.push(format!("mkdir -p {}", template::shell_quote(&results_dir)));

        for pair in pairs {
            let array_vcf = staged(paths, &pair.array_file)?;
            let ngs_vcf = intersected(paths, pair);
            let output_prefix = paths.results_dir.join(pair.label());
            commands.push(template::render(
                &self.config.command,
                &[
                    ("array_vcf", &*array_vcf.to_string_lossy()),
                    ("ngs_vcf", &*ngs_vcf.to_string_lossy()),
                    ("output_prefix", &*output_prefix.to_string_lossy()),
                    ("array_id", pair.array_id.as_str()),
                    ("ngs_id", pair.ngs_id.as_str()),
                ],
            )?);
        }

        Ok(JobBody {
            resources: self.config.resources.clone(),
            commands,
        })
    }
}
