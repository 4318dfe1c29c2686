use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};

use util::PathEncodingError;

/// Utility fns
mod ops;

/// Defines fns for creating common paths in the work directory
mod paths;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Work directory \"{0}\" does not exist")]
    MissingWorkDir(String),
    #[error("Specified work directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
    #[error("Can't perform IO operation on \"{0}\" during a dry run")]
    DryRun(String),
}

/// Subdirectories of the work directory, created on first use.
const LAYOUT_DIRS: [&str; 4] = ["logs", "jobs", "tmp", "results"];

/// All file operations on the work directory should go through this struct.
///
/// All destructive operations check that the path in question is a child of the
/// single whitelisted prefix (the work dir), otherwise they will not be performed.
/// Reading is allowed anywhere, since inputs live outside the work dir.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    work_prefix: PathBuf,
    /// if true, prevents all destructive operations
    dry_run: bool,
}

impl Fs {
    /// Create a new `Fs` with the given work directory.
    pub fn new(work_prefix: &Path, dry_run: bool) -> Self {
        Self {
            work_prefix: work_prefix.to_path_buf(),
            dry_run,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_prefix
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Check that the work dir exists, and create its standard subdirectories.
    pub fn ensure_layout(&mut self) -> Result<()> {
        let display = || {
            self.work_prefix
                .to_str()
                .map(str::to_owned)
                .ok_or(PathEncodingError)
        };
        if !self.work_prefix.exists() {
            return Err(Error::MissingWorkDir(display()?).into());
        } else if !self.work_prefix.is_dir() {
            return Err(Error::NotDirectory(display()?).into());
        }
        self.work_prefix = self
            .work_prefix
            .canonicalize()
            .context("canonicalizing work directory")?;

        for dir in LAYOUT_DIRS {
            let path = self.work_prefix.join(dir);
            if path.is_dir() {
                continue;
            }
            if self.dry_run {
                log::info!("Dry run. Not creating {path:?}");
            } else {
                log::info!("Creating {path:?}");
                fs::create_dir_all(&path).with_context(|| format!("creating {path:?}"))?;
            }
        }
        Ok(())
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Create a file that must not exist yet, and write `text` to it.
    /// Fails with an `AlreadyExists` io error if it does exist.
    pub fn create_new_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();
        self.check_whitelist(path)?;
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        f.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Write entire str to a file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::write(path, text).context("writing file")?;
        Ok(())
    }

    /// Write entire str to a file, so that readers only ever see
    /// no file or the complete file.
    pub fn write_file_atomic<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        ops::write_atomic(path, text.as_bytes())
            .with_context(|| format!("writing {path:?}"))?;
        Ok(())
    }

    /// Make a file executable by everyone allowed to read it.
    pub fn make_executable<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        ops::make_executable(path).with_context(|| format!("chmod +x {path:?}"))?;
        Ok(())
    }

    /// Delete a file.
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Copy the contents of file `src` to `tgt`. `src` may live anywhere.
    pub fn copy<T: AsRef<Path>, U: AsRef<Path>>(&self, src: T, tgt: U) -> Result<()> {
        let (src, tgt) = (src.as_ref(), tgt.as_ref());
        self.check_whitelist(tgt)?;
        ops::copy_file(src, tgt).with_context(|| format!("copying {src:?} to {tgt:?}"))?;
        Ok(())
    }

    /// Open a file for buffered reading.
    pub fn open_buffered<T: AsRef<Path>>(&self, path: T) -> Result<io::BufReader<fs::File>, io::Error> {
        Ok(io::BufReader::new(fs::File::open(path)?))
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().starts_with(&self.work_prefix)
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        let display = || path.to_str().map(str::to_owned).ok_or(PathEncodingError);
        if self.dry_run {
            Err(Error::DryRun(display()?).into())
        } else if !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(display()?).into())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_layout() -> Result<()> {
        let dir = tempdir()?;
        let mut fs = Fs::new(dir.path(), false);
        fs.ensure_layout()?;
        for sub in LAYOUT_DIRS {
            assert!(dir.path().join(sub).is_dir(), "{sub} was created");
        }
        Ok(())
    }

    #[test]
    fn test_missing_work_dir() -> Result<()> {
        let dir = tempdir()?;
        let mut fs = Fs::new(&dir.path().join("nope"), false);
        let err = fs.ensure_layout().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MissingWorkDir(_))
        ));
        Ok(())
    }

    #[test]
    fn test_dry_run_blocks_writes() -> Result<()> {
        let dir = tempdir()?;
        let mut fs = Fs::new(dir.path(), true);
        fs.ensure_layout()?;
        assert!(!dir.path().join("logs").exists());
        let target = fs.work_dir().join("file");
        assert!(fs.write_file(&target, "x").is_err());
        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn test_writes_outside_work_dir_are_refused() -> Result<()> {
        let work = tempdir()?;
        let other = tempdir()?;
        let mut fs = Fs::new(work.path(), false);
        fs.ensure_layout()?;
        let err = fs.write_file(other.path().join("file"), "x").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NotWhitelisted(_))
        ));
        Ok(())
    }

    #[test]
    fn test_create_new_file_is_exclusive() -> Result<()> {
        let dir = tempdir()?;
        let mut fs = Fs::new(dir.path(), false);
        fs.ensure_layout()?;
        let marker = fs.work_dir().join("jobs/RUN_001.sh.started");
        fs.create_new_file(&marker, "first")?;
        let err = fs.create_new_file(&marker, "second").unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&marker)?, "first");
        Ok(())
    }
}
