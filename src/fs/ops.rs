use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// `path` with `.part` appended, on the same filesystem so rename is atomic.
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Write `data` to a sibling `.part` file, then rename it into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let part = part_path(path);
    let result = (|| {
        let mut f = fs::File::create(&part)?;
        f.write_all(data)?;
        f.sync_all()?;
        fs::rename(&part, path)
    })();
    if result.is_err() {
        // leftover part files are harmless, but don't leave them lying around:
        let _ = fs::remove_file(&part);
    }
    result
}

/// Copy the contents of `src` (following symlinks) to `tgt`,
/// so that `tgt` only appears once the copy is complete.
pub fn copy_file(src: &Path, tgt: &Path) -> io::Result<()> {
    let part = part_path(tgt);
    let result = fs::copy(src, &part).and_then(|_| fs::rename(&part, tgt));
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

/// Add execute permission wherever read permission is set.
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        let mode = perms.mode();
        perms.set_mode(mode | ((mode & 0o444) >> 2));
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
