use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::args::{Args, PipelineKind};
use crate::config::Config;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid log level '{0}' (expected off, error, warn, info, debug or trace)")]
    InvalidLogLevel(String),
    #[error("invalid resolve flag '{0}' (should be formatted 'UNIT=submitted' or 'UNIT=absent')")]
    InvalidResolveFlag(String),
    #[error("--resolve changes lifecycle state and can't be combined with --dry-run")]
    ResolveInDryRun,
    #[error("Config file {0:?} does not exist")]
    MissingConfig(PathBuf),
}

/// How an operator says an ambiguous submission actually went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The job did reach the scheduler.
    Submitted,
    /// The job never reached the scheduler; the unit may be submitted again.
    Absent,
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. the config file has been read.
#[derive(Debug)]
pub struct Settings {
    pub group: String,
    pub pipeline: PipelineKind,
    pub config_path: PathBuf,
    pub config: Config,
    pub log_level: log::LevelFilter,
    pub dry_run: bool,
    pub resolve: Vec<(String, Resolution)>,
}

impl Settings {
    /// `{lock_dir}/{pipeline}.{group}.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.config
            .lock_dir
            .join(format!("{}.{}.lock", self.pipeline.name(), self.group))
    }
}

pub fn parse_log_level(level: &str) -> Result<log::LevelFilter, Error> {
    level
        .parse::<log::LevelFilter>()
        .map_err(|_| Error::InvalidLogLevel(level.to_owned()))
}

fn parse_resolve_flag(flag: &str) -> Result<(String, Resolution), Error> {
    let invalid = || Error::InvalidResolveFlag(flag.to_owned());
    let (unit, outcome) = flag.split_once('=').ok_or_else(invalid)?;
    if unit.is_empty() {
        return Err(invalid());
    }
    let resolution = match outcome {
        "submitted" => Resolution::Submitted,
        "absent" => Resolution::Absent,
        _ => return Err(invalid()),
    };
    Ok((unit.to_owned(), resolution))
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let log_level = parse_log_level(&args.log_level)?;

        let resolve = args
            .resolve
            .iter()
            .map(|flag| parse_resolve_flag(flag))
            .collect::<Result<Vec<_>, _>>()?;
        if args.dry_run && !resolve.is_empty() {
            return Err(Error::ResolveInDryRun.into());
        }

        let config_path = PathBuf::from(&args.config);
        if !config_path.exists() {
            return Err(Error::MissingConfig(config_path).into());
        }
        let config_path = config_path
            .canonicalize()
            .context("canonicalizing config path")?;
        let config = Config::load(&config_path)?;

        Ok(Self {
            group: args.group,
            pipeline: args.pipeline,
            config_path,
            config,
            log_level,
            dry_run: args.dry_run,
            resolve,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolve_flag() {
        let (unit, res) = parse_resolve_flag("RUN_042=submitted").unwrap();
        assert_eq!(unit, "RUN_042");
        assert_eq!(res, Resolution::Submitted);

        let (_, res) = parse_resolve_flag("RUN_042=absent").unwrap();
        assert_eq!(res, Resolution::Absent);

        assert!(parse_resolve_flag("RUN_042").is_err());
        assert!(parse_resolve_flag("=absent").is_err());
        assert!(parse_resolve_flag("RUN_042=maybe").is_err());
    }

    #[test]
    fn test_resolve_refused_in_dry_run() {
        let args = Args {
            group: "test".to_owned(),
            pipeline: PipelineKind::Concordance,
            config: "does-not-matter.toml".to_owned(),
            log_level: "info".to_owned(),
            dry_run: true,
            resolve: vec!["RUN_042=absent".to_owned()],
        };
        let err = Settings::try_from(args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ResolveInDryRun)
        ));
    }
}
