//! Session cache hygiene.
//!
//! Every engine instance holds a lock file under the instance directory,
//! named after its session directory. A session folder left in the cache
//! without a live lock belongs to a crashed or unclean run and may still
//! hold plaintext scratch files, so it is destroyed with the erase engine
//! rather than merely deleted.

use crate::env::SessionEnv;
use crate::error::{CofferError, Result};
use crate::wipe::eraser::Eraser;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Holds this session's instance lock for the lifetime of the engine.
pub struct SessionGuard {
    lock_path: PathBuf,
    file: File,
}

impl SessionGuard {
    /// Claim the lock file for the environment's session directory.
    pub fn claim(env: &SessionEnv) -> Result<Self> {
        let lock_path = env.instance_dir().join(format!("{}.lock", env.session_name()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)?;
        file.try_lock_exclusive()
            .map_err(|_| CofferError::ArchiveLocked(lock_path.display().to_string()))?;
        Ok(Self { lock_path, file })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// True if the cache holds session folders other than the current one.
pub fn previous_session_cache_exists(env: &SessionEnv) -> Result<bool> {
    for entry in fs::read_dir(env.cache_dir())? {
        let path = entry?.path();
        if path.is_dir() && path != env.session_dir() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Wipe stale session folders left behind by crashed runs.
///
/// A session is live when its instance lock file is held by some process;
/// live sessions are skipped. Returns the number of sessions destroyed.
pub fn clean_previous_sessions(env: &SessionEnv, eraser: &mut Eraser) -> Result<usize> {
    let mut cleaned = 0;
    for entry in fs::read_dir(env.cache_dir())? {
        let path = entry?.path();
        if !path.is_dir() || path == env.session_dir() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        if session_is_live(env, &name) {
            debug!(session = %name, "skipping live session");
            continue;
        }

        debug!(session = %name, "wiping stale session cache");
        eraser.erase_paths(&[&path])?;
        let lock_path = env.instance_dir().join(format!("{}.lock", name));
        if lock_path.exists() {
            if let Err(e) = fs::remove_file(&lock_path) {
                warn!(session = %name, error = %e, "could not remove stale lock file");
            }
        }
        cleaned += 1;
    }
    Ok(cleaned)
}

/// Wipe the current session's scratch folder. The caller must be done with
/// the environment; the guard should be dropped first.
pub fn clean_current_session(env: &SessionEnv, eraser: &mut Eraser) -> Result<()> {
    if env.session_dir().exists() {
        eraser.erase_paths(&[env.session_dir()])?;
    }
    Ok(())
}

fn session_is_live(env: &SessionEnv, name: &str) -> bool {
    let lock_path = env.instance_dir().join(format!("{}.lock", name));
    let file = match File::open(&lock_path) {
        Ok(file) => file,
        // No lock file means no live owner.
        Err(_) => return false,
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = fs2::FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}
