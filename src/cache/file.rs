//! File-backed [CacheHandler].

use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use log::debug;

use super::{CacheError, CacheHandler};
use crate::token::CacheRecord;

const DEFAULT_CACHE_PATH: &str = ".cache";

/// Stores the record as a JSON file. Defaults to `.cache` in the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self { path: path.into() }
    }

    /// A cache file for a specific user, `.cache-<username>`, so several identities can be cached on one machine.
    pub fn for_username(username: &str) -> Self {
        Self::new(format!("{}-{}", DEFAULT_CACHE_PATH, username))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)
    }
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PATH)
    }
}

impl CacheHandler for FileCache {
    fn get(&self) -> Result<Option<CacheRecord>, CacheError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("Cache file {} does not exist", self.path.display());
                return Ok(None);
            }
            Err(err) => {
                return Err(CacheError::Backend(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    err
                )))
            }
        };

        Ok(Some(serde_json::from_slice(&contents)?))
    }

    fn save(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let contents = serde_json::to_vec(record)?;

        self.write_atomically(&contents)
            .map_err(|err| CacheError::Backend(format!("failed to write {}: {}", self.path.display(), err)))?;

        debug!("Saved token to cache file {}", self.path.display());
        Ok(())
    }

    fn lock_key(&self) -> Option<String> {
        Some(format!("file:{}", resolve_path(&self.path).display()))
    }
}

/// Resolves the path to an absolute one that stays the same whether or not the file or its directories exist yet:
/// the nearest existing ancestor is canonicalized and the rest of the path is appended as-is.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = match std::env::current_dir() {
        Ok(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    };

    for ancestor in absolute.ancestors() {
        if let Ok(resolved) = fs::canonicalize(ancestor) {
            return match absolute.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => resolved.join(rest),
                _ => resolved,
            };
        }
    }

    absolute
}
