//! Enumerate candidate work units.
//!
//! Both scanners are lazy and re-read the filesystem every time they are
//! called. Entries come out in enumeration order, which is not sorted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Immediate child directories of `root` accepted by `predicate`.
pub fn scan_children<'a, P>(
    root: &Path,
    mut predicate: P,
) -> Result<impl Iterator<Item = Result<PathBuf>> + 'a>
where
    P: FnMut(&Path) -> bool + 'a,
{
    let entries = fs::read_dir(root).with_context(|| format!("while listing {root:?}"))?;
    Ok(entries.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        let path = entry.path();
        // follow symlinks, so linked run dirs count too:
        if !path.is_dir() {
            return None;
        }
        if predicate(&path) {
            Some(Ok(path))
        } else {
            log::trace!("ignoring {path:?}");
            None
        }
    }))
}

/// Files anywhere below `root` accepted by `predicate`.
pub fn scan_recursive<'a, P>(
    root: &Path,
    mut predicate: P,
) -> Result<impl Iterator<Item = Result<PathBuf>> + 'a>
where
    P: FnMut(&Path) -> bool + 'a,
{
    // check up front so an unreadable root fails the pass instead of one entry:
    fs::read_dir(root).with_context(|| format!("while listing {root:?}"))?;
    let walker = WalkDir::new(root).follow_links(true).min_depth(1);
    Ok(walker.into_iter().filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        if !entry.file_type().is_file() {
            return None;
        }
        let path = entry.into_path();
        if predicate(&path) {
            Some(Ok(path))
        } else {
            log::trace!("ignoring {path:?}");
            None
        }
    }))
}
