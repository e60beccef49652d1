use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Directory namespace the engine keeps its files under.
const NAMESPACE: &str = "weft.engine";

// Directory creation is racy across tasks writing to the same cache root;
// serialize it process-wide.
static DIR_CREATION: Mutex<()> = Mutex::new(());

/// Creates `dir` and its parents, one caller at a time.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    let _guard = DIR_CREATION.lock().unwrap();
    std::fs::create_dir_all(dir).map_err(|source| Error::FileOperationFailed {
        path: dir.to_path_buf(),
        source: std::sync::Arc::new(source),
    })
}

/// Where downloaded files land.
///
/// Two stock roots: a scratch root under the system temp directory, for
/// files the caller consumes immediately, and a durable root under a
/// caller-supplied cache directory, for files that outlive the process.
/// Destinations are derived from the request URL, so the same URL always
/// maps to the same file.
#[derive(Debug, Clone)]
pub struct DownloadLocations {
    root: PathBuf,
}

impl DownloadLocations {
    /// Files under the system temp directory.
    pub fn scratch() -> Self {
        Self {
            root: std::env::temp_dir().join(NAMESPACE),
        }
    }

    /// Files under `cache_root`, namespaced away from other users of it.
    pub fn durable(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            root: cache_root.into().join(NAMESPACE),
        }
    }

    /// Files directly under `root`, no namespacing.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory files land in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The stable destination for `url`: a digest-named file under the
    /// root, keeping the URL's file extension when it has one.
    pub fn destination_for(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let mut name = digest;
        if let Some(ext) = url_extension(url) {
            name.push('.');
            name.push_str(&ext);
        }
        self.root.join(name)
    }
}

/// The extension of the URL's path component, if it has a plausible one.
fn url_extension(url: &str) -> Option<String> {
    let path = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or_default();
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
