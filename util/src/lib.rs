use std::path::Path;

mod timer;
pub use timer::Timer;

#[derive(thiserror::Error, Debug)]
#[error("Filesystem path is not valid UTF-8")]
pub struct PathEncodingError;

pub type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, Hasher>;

/// Get the final component of `path` as a str.
pub fn file_name_str(path: &Path) -> Result<&str, PathEncodingError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or(PathEncodingError)
}
