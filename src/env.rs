//! Per-session working directories.
//!
//! Plaintext only ever touches disk inside a session directory under the
//! application cache. Each engine instance gets its own session directory,
//! named from the creation time, so concurrent instances never share scratch
//! space. The wipe engine later destroys these directories with the same
//! rigor as user files.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Cache directory name under the application root
pub const CACHE_DIR: &str = "cache";

/// Directory of per-instance lock files
pub const INSTANCE_DIR: &str = "instance";

/// Staging subdirectory for freshly encrypted blobs
pub const STAGING_DIR: &str = "encrypted";

/// Extraction subdirectory for decrypted output
pub const EXTRACTION_DIR: &str = "extracted";

/// Layout of one engine instance's working directories.
#[derive(Debug, Clone)]
pub struct SessionEnv {
    root: PathBuf,
    cache_dir: PathBuf,
    instance_dir: PathBuf,
    session_dir: PathBuf,
    staging_dir: PathBuf,
    extraction_dir: PathBuf,
}

impl SessionEnv {
    /// Create the session tree under `root`, which is created if missing.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let cache_dir = root.join(CACHE_DIR);
        let instance_dir = root.join(INSTANCE_DIR);
        fs::create_dir_all(&cache_dir)?;
        fs::create_dir_all(&instance_dir)?;

        let session_dir = unique_session_dir(&cache_dir)?;
        let staging_dir = session_dir.join(STAGING_DIR);
        let extraction_dir = session_dir.join(EXTRACTION_DIR);
        fs::create_dir_all(&staging_dir)?;
        fs::create_dir_all(&extraction_dir)?;

        Ok(Self {
            root,
            cache_dir,
            instance_dir,
            session_dir,
            staging_dir,
            extraction_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Scratch directory for freshly encrypted blobs awaiting insertion.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Scratch directory for decrypted entries handed to the caller.
    pub fn extraction_dir(&self) -> &Path {
        &self.extraction_dir
    }

    /// Name of this session's directory, used for the instance lock file.
    pub fn session_name(&self) -> &str {
        self.session_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("session")
    }
}

/// Pick a session directory name that does not collide with an existing one.
fn unique_session_dir(cache_dir: &Path) -> Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let base = format!("session-{}", millis);

    let mut candidate = cache_dir.join(&base);
    let mut suffix = 1u32;
    while candidate.exists() {
        candidate = cache_dir.join(format!("{}-{}", base, suffix));
        suffix += 1;
    }
    fs::create_dir_all(&candidate)?;
    Ok(candidate)
}
