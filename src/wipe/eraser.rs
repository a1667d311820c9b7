//! Multi-pass file destruction with filename shredding.
//!
//! Content is overwritten in place according to the selected
//! [`WipeMethod`], then the name itself is destroyed: the file is renamed to
//! a random alphabetic name one character shorter per step, keeping the
//! extension dot at its distance from the end, until a single character
//! remains and the file is unlinked. Directories are removed deepest-first
//! after their subtree is gone, with their names shredded the same way.

use crate::error::{CofferError, Result};
use crate::progress::{Operation, ProgressListener, ProgressTracker};
use crate::wipe::patterns::{Pass, WipeMethod};
use rand::{Rng, RngCore};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Buffer size for fixed and random passes
const WIPE_BUFFER: usize = 4096;

/// Buffer size for three-byte pattern passes, kept divisible by three so the
/// pattern never breaks inside a buffer
const TRIPLE_BUFFER: usize = 4095;

/// Attempts at finding a non-colliding shredded name before giving up
const SHRED_ATTEMPTS: usize = 64;

/// Secure erase engine.
pub struct Eraser {
    method: WipeMethod,
    tracker: ProgressTracker,
}

impl Eraser {
    pub fn new(method: WipeMethod) -> Self {
        Self {
            method,
            tracker: ProgressTracker::new(),
        }
    }

    pub fn method(&self) -> WipeMethod {
        self.method
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.tracker.add_listener(listener);
    }

    pub fn tracker_mut(&mut self) -> &mut ProgressTracker {
        &mut self.tracker
    }

    /// Destroy the given files and directory trees.
    ///
    /// The total progress budget is the sum of every file length multiplied
    /// by the method's pass count. Listeners are notified done on every exit
    /// path.
    pub fn erase_paths<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for path in paths {
            collect(path.as_ref(), &mut files, &mut dirs)?;
        }

        let pass_count = self.method.pass_count() as u64;
        let mut budget = 0u64;
        for file in &files {
            budget += fs::metadata(file)?.len() * pass_count;
        }
        self.tracker.reset(budget);
        debug!(
            files = files.len(),
            dirs = dirs.len(),
            budget,
            "starting secure erase"
        );

        let result = self.erase_collected(&files, &mut dirs);
        self.tracker.notify_done();
        result
    }

    fn erase_collected(&mut self, files: &[PathBuf], dirs: &mut Vec<PathBuf>) -> Result<()> {
        for file in files {
            self.wipe_file(file)?;
        }

        // Deepest directories first so each is empty when its turn comes.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs.iter() {
            if self.tracker.poll_abort() {
                return Err(CofferError::Aborted);
            }
            shred_and_remove(dir, true)?;
        }
        Ok(())
    }

    /// Overwrite one file with every pass of the method, then shred its name.
    pub fn wipe_file(&mut self, path: &Path) -> Result<()> {
        let metadata = fs::metadata(path)?;
        let len = metadata.len();

        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(path, permissions)?;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let passes = self.method.passes(&mut rand::thread_rng());
        self.tracker
            .begin_file(&name, Operation::Wipe, len * passes.len() as u64);

        {
            let mut file = OpenOptions::new().write(true).open(path)?;
            for pass in &passes {
                self.overwrite_pass(&mut file, len, *pass)?;
            }
            file.sync_all()?;
        }

        shred_and_remove(path, false)
    }

    fn overwrite_pass(&mut self, file: &mut File, len: u64, pass: Pass) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;

        let mut rng = rand::thread_rng();
        let mut buf = match pass {
            Pass::Fixed(value) => vec![value; WIPE_BUFFER],
            Pass::Random => vec![0u8; WIPE_BUFFER],
            Pass::Triple(pattern) => {
                let mut buf = vec![0u8; TRIPLE_BUFFER];
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = pattern[i % 3];
                }
                buf
            }
        };

        let mut remaining = len;
        while remaining > 0 {
            if self.tracker.poll_abort() {
                return Err(CofferError::Aborted);
            }
            let n = remaining.min(buf.len() as u64) as usize;
            if matches!(pass, Pass::Random) {
                rng.fill_bytes(&mut buf[..n]);
            }
            file.write_all(&buf[..n])?;
            self.tracker.advance(n as u64);
            remaining -= n as u64;
        }
        file.flush()?;
        Ok(())
    }
}

/// Recursively partition a path into files and directories.
fn collect(path: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        dirs.push(path.to_path_buf());
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            collect(&entry.path(), files, dirs)?;
        }
    } else {
        files.push(path.to_path_buf());
    }
    Ok(())
}

/// Shred a path's name and remove it.
///
/// Each step renames to a random alphabetic name one character shorter,
/// keeping any extension dot at the same distance from the end, until one
/// character remains.
fn shred_and_remove(path: &Path, is_dir: bool) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => {
            return Err(CofferError::InvalidOperation(
                "cannot shred a filesystem root".to_string(),
            ))
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Distance of the dot from the end of the name, if any. Directories get
    // plain names regardless.
    let dot_from_end = if is_dir {
        None
    } else {
        name.rfind('.').map(|i| name.chars().count() - i)
    };

    let mut current = path.to_path_buf();
    let mut len = name.chars().count();
    let mut rng = rand::thread_rng();

    while len > 1 {
        let new_len = len - 1;
        let target = match pick_shredded_name(&parent, new_len, dot_from_end, &mut rng) {
            Some(target) => target,
            None => {
                warn!(path = %current.display(), "no free shredded name, removing directly");
                break;
            }
        };
        fs::rename(&current, &target)?;
        current = target;
        len = new_len;
    }

    if is_dir {
        fs::remove_dir(&current)?;
    } else {
        fs::remove_file(&current)?;
    }
    Ok(())
}

fn pick_shredded_name<R: Rng>(
    parent: &Path,
    len: usize,
    dot_from_end: Option<usize>,
    rng: &mut R,
) -> Option<PathBuf> {
    for _ in 0..SHRED_ATTEMPTS {
        let name = random_name(len, dot_from_end, rng);
        let candidate = parent.join(&name);
        if !candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn random_name<R: Rng>(len: usize, dot_from_end: Option<usize>, rng: &mut R) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut name: Vec<u8> = (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect();
    if let Some(d) = dot_from_end {
        if d < len {
            name[len - d] = b'.';
        }
    }
    // ALPHABET and '.' are ASCII, so the name is valid UTF-8.
    String::from_utf8_lossy(&name).into_owned()
}
