//! The archive engine: an encrypted virtual file tree inside the envelope.
//!
//! All structural knowledge lives in the encrypted file table: the envelope
//! only ever sees opaque slot names and ciphertext lengths. Metadata is
//! flushed on every exit path of a mutating operation, so completed
//! sub-changes survive mid-stream failures and aborts.

use crate::container::entry::{EntryMeta, FileEntry};
use crate::container::paths;
use crate::crypto::cipher;
use crate::crypto::kdf::{self, Argon2Params};
use crate::crypto::stamp;
use crate::crypto::{IV_LENGTH, SALT_LENGTH, STAMP_LENGTH};
use crate::envelope::Envelope;
use crate::env::SessionEnv;
use crate::error::{CofferError, Result};
use crate::progress::{Operation, ProgressListener, ProgressTracker};
use crate::wipe::{Eraser, WipeMethod};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Archive format version written to new archives
pub const FORMAT_VERSION: u32 = 1;

/// Envelope slot of the format version record
const META_VERSION: &str = "METADATA/Version";

/// Envelope slot of the last-assigned slot counter
const META_INDEX: &str = "METADATA/Index";

/// Envelope slot of the KDF parameters and verification stamp
const META_TEST: &str = "METADATA/Test";

/// Envelope slot of the encrypted file table
const META_TABLE: &str = "METADATA/FileTable";

/// An open encrypted archive.
pub struct Container {
    envelope: Envelope,
    key: [u8; kdf::KEY_LENGTH],
    version: u32,
    entries: Vec<EntryMeta>,
    slot_counter: u32,
    root_folder: String,
    tracker: ProgressTracker,
    env: SessionEnv,
    wipe_method: WipeMethod,
}

impl Container {
    /// Create a new archive at `path`, protected by `password`.
    ///
    /// The salt is drawn from `seed` when given, which makes creation
    /// deterministic for tests; production callers pass `None` for an
    /// OS-random salt.
    pub fn create<P: AsRef<Path>>(
        path: P,
        password: &str,
        params: Argon2Params,
        seed: Option<[u8; 32]>,
        env: SessionEnv,
    ) -> Result<Self> {
        let salt = kdf::generate_salt(seed);
        let key = kdf::derive_key(password, &salt, &params)?;
        let mut envelope = Envelope::create(path)?;

        envelope.add_bytes(META_VERSION, &FORMAT_VERSION.to_be_bytes())?;
        envelope.add_bytes(META_INDEX, &0u32.to_be_bytes())?;
        envelope.add_bytes(META_TEST, &test_record(&salt, &params, &key))?;

        let mut container = Self {
            envelope,
            key,
            version: FORMAT_VERSION,
            entries: Vec::new(),
            slot_counter: 0,
            root_folder: paths::ROOT.to_string(),
            tracker: ProgressTracker::new(),
            env,
            wipe_method: WipeMethod::default(),
        };
        container.flush_table()?;
        debug!(path = %container.envelope.path().display(), "created archive");
        Ok(container)
    }

    /// Open an existing archive.
    pub fn open<P: AsRef<Path>>(path: P, password: &str, env: SessionEnv) -> Result<Self> {
        let mut envelope = Envelope::open(path)?;

        let test = envelope
            .read_blob(META_TEST)
            .map_err(|_| CofferError::CorruptArchive("missing KDF record".to_string()))?;
        let (salt, params, stored_stamp) = parse_test_record(&test)?;

        let key = kdf::derive_key(password, &salt, &params)?;
        if stamp::verification_stamp(&key) != stored_stamp {
            return Err(CofferError::WrongPassword);
        }

        let version = read_be_u32(&mut envelope, META_VERSION)?;
        if version > FORMAT_VERSION {
            return Err(CofferError::CorruptArchive(format!(
                "unsupported format version {}",
                version
            )));
        }
        let slot_counter = read_be_u32(&mut envelope, META_INDEX)?;

        let table = envelope
            .read_blob(META_TABLE)
            .map_err(|_| CofferError::CorruptArchive("missing file table".to_string()))?;
        if table.len() < IV_LENGTH {
            return Err(CofferError::CorruptArchive(
                "file table is truncated".to_string(),
            ));
        }
        let mut iv = [0u8; IV_LENGTH];
        iv.copy_from_slice(&table[..IV_LENGTH]);
        let plaintext = cipher::decrypt_bytes(&key, &iv, &table[IV_LENGTH..])?;
        let entries: Vec<EntryMeta> = serde_json::from_slice(&plaintext)
            .map_err(|_| CofferError::CorruptArchive("file table is unreadable".to_string()))?;

        // Every file entry must still be linked to its ciphertext blob.
        for entry in &entries {
            if let Some(slot) = &entry.slot {
                if !envelope.contains(slot) {
                    return Err(CofferError::CorruptArchive(format!(
                        "entry {} lost its blob",
                        entry.path
                    )));
                }
            }
        }

        debug!(entries = entries.len(), version, "opened archive");
        Ok(Self {
            envelope,
            key,
            version,
            entries,
            slot_counter,
            root_folder: paths::ROOT.to_string(),
            tracker: ProgressTracker::new(),
            env,
            wipe_method: WipeMethod::default(),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn env(&self) -> &SessionEnv {
        &self.env
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        self.tracker.add_listener(listener);
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn ProgressListener>) {
        self.tracker.remove_listener(listener);
    }

    /// Method used when destroying plaintext sources after an add.
    pub fn set_wipe_method(&mut self, method: WipeMethod) {
        self.wipe_method = method;
    }

    /// Flush metadata and release the archive lock.
    pub fn close(mut self) -> Result<()> {
        self.flush_table()
    }

    // ---- root folder cursor ----

    /// Folder that scopes adds and whole-archive extraction.
    pub fn root_folder(&self) -> &str {
        &self.root_folder
    }

    pub fn set_root_folder(&mut self, folder: &str) -> Result<()> {
        if folder != paths::ROOT && !self.folder_exists(folder) {
            return Err(CofferError::NotFound(folder.to_string()));
        }
        self.root_folder = self.canonical_folder(folder);
        Ok(())
    }

    // ---- listings ----

    /// Number of real files in the archive.
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_folder_marker()).count()
    }

    /// Every file in the archive, sorted by path.
    pub fn all_files(&self) -> Vec<FileEntry> {
        let mut files: Vec<FileEntry> = self
            .entries
            .iter()
            .filter(|e| !e.is_folder_marker())
            .map(file_listing)
            .collect();
        files.sort_by(|a, b| a.path.to_lowercase().cmp(&b.path.to_lowercase()));
        files
    }

    /// Direct file children of a folder.
    pub fn files_in_folder(&self, folder: &str) -> Vec<FileEntry> {
        let mut files: Vec<FileEntry> = self
            .entries
            .iter()
            .filter(|e| {
                !e.is_folder_marker() && paths::eq_ignore_case(&paths::parent(&e.path), folder)
            })
            .map(file_listing)
            .collect();
        files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        files
    }

    /// Names of the direct subfolders of a folder, canonical casing.
    pub fn subfolders_of(&self, folder: &str) -> Vec<String> {
        let folder_lower = normalize_folder(folder);
        let mut subs: BTreeMap<String, String> = BTreeMap::new();
        for full in self.folder_set().values() {
            if paths::is_descendant(full, &folder_lower)
                && paths::eq_ignore_case(&paths::parent(full), &folder_lower)
            {
                let name = paths::file_name(full).to_string();
                subs.entry(name.to_lowercase()).or_insert(name);
            }
        }
        subs.into_values().collect()
    }

    /// Every folder in the archive including the root, sorted.
    pub fn folders_tree(&self) -> Vec<String> {
        let mut folders: Vec<String> = self.folder_set().into_values().collect();
        folders.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
        folders
    }

    /// Look up one file's listing row.
    pub fn file_entry(&self, path: &str) -> Option<FileEntry> {
        self.find_file(path).map(|i| file_listing(&self.entries[i]))
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.find_file(path).is_some()
    }

    pub fn folder_exists(&self, folder: &str) -> bool {
        if folder == paths::ROOT {
            return true;
        }
        self.folder_set().contains_key(&normalize_folder(folder))
    }

    // ---- comment ----

    /// Store an encrypted archive comment in the envelope's comment field.
    pub fn set_comment(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return self.envelope.set_comment(Vec::new());
        }
        let (iv, ciphertext) = cipher::encrypt_bytes(&self.key, text.as_bytes())?;
        let mut raw = Vec::with_capacity(IV_LENGTH + ciphertext.len());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&ciphertext);
        self.envelope
            .set_comment(BASE64.encode(&raw).into_bytes())
    }

    /// Decrypt the archive comment; an absent comment reads as empty.
    pub fn get_comment(&self) -> Result<String> {
        let encoded = self.envelope.comment();
        if encoded.is_empty() {
            return Ok(String::new());
        }
        let raw = BASE64
            .decode(encoded)
            .map_err(|_| CofferError::CorruptArchive("comment is not base64".to_string()))?;
        if raw.len() < IV_LENGTH {
            return Err(CofferError::CorruptArchive(
                "comment is truncated".to_string(),
            ));
        }
        let mut iv = [0u8; IV_LENGTH];
        iv.copy_from_slice(&raw[..IV_LENGTH]);
        let plaintext = cipher::decrypt_bytes(&self.key, &iv, &raw[IV_LENGTH..])?;
        String::from_utf8(plaintext)
            .map_err(|_| CofferError::CorruptArchive("comment is not UTF-8".to_string()))
    }

    // ---- add ----

    /// Virtual paths that would be overwritten by adding these sources.
    pub fn test_add_files_and_folders<P: AsRef<Path>>(
        &self,
        sources: &[P],
    ) -> Result<Vec<String>> {
        let plan = self.plan_add(sources)?;
        Ok(plan
            .files
            .iter()
            .filter(|f| self.find_file(&f.virtual_path).is_some())
            .map(|f| f.virtual_path.clone())
            .collect())
    }

    /// Add files and directory trees under the current root folder.
    ///
    /// Sources are encrypted into the staging area, inserted into the
    /// envelope, and recorded in the file table. Existing virtual paths are
    /// overwritten in place, reusing their slot. With `destroy_sources` the
    /// plaintext originals are wiped afterwards.
    pub fn add_files_and_folders<P: AsRef<Path>>(
        &mut self,
        sources: &[P],
        destroy_sources: bool,
    ) -> Result<()> {
        let plan = self.plan_add(sources)?;

        // Reserve slots up front and persist the counter before any
        // ciphertext lands, so a crash cannot reuse a slot name.
        let mut assignments = Vec::with_capacity(plan.files.len());
        for file in &plan.files {
            let slot = match self.find_file(&file.virtual_path) {
                Some(i) => match self.entries[i].slot.clone() {
                    Some(slot) => slot,
                    None => self.next_slot(),
                },
                None => self.next_slot(),
            };
            assignments.push(slot);
        }
        self.persist_index()?;

        // CFB ciphertext is the same length as the plaintext, so each file
        // advances exactly twice its length: once encrypting, once inserting.
        let budget: u64 = plan.files.iter().map(|f| 2 * f.length).sum();
        self.tracker.reset(budget);

        let result = self.add_planned(&plan, &assignments);
        let flush = self.flush_table();
        self.tracker.notify_done();
        result?;
        flush?;

        if destroy_sources {
            let mut eraser = Eraser::new(self.wipe_method);
            for listener in self.tracker.listeners() {
                eraser.add_listener(listener.clone());
            }
            let roots: Vec<PathBuf> = sources
                .iter()
                .map(|s| s.as_ref().to_path_buf())
                .collect();
            eraser.erase_paths(&roots)?;
        }
        Ok(())
    }

    fn add_planned(&mut self, plan: &AddPlan, assignments: &[String]) -> Result<()> {
        let now = now_ms();

        for (file, slot) in plan.files.iter().zip(assignments) {
            if self.tracker.poll_abort() {
                return Err(CofferError::Aborted);
            }

            let metadata = fs::metadata(&file.source)?;
            let modified_ms = metadata
                .modified()
                .map(system_time_ms)
                .unwrap_or(now);
            let created_ms = metadata
                .created()
                .map(system_time_ms)
                .unwrap_or(modified_ms);

            // Encrypt to staging, then insert the ciphertext.
            let staging = self.env.staging_dir().join(slot);
            let name = paths::file_name(&file.virtual_path).to_string();
            self.tracker
                .begin_file(&name, Operation::Encrypt, file.length);
            let iv = {
                let mut input = File::open(&file.source)?;
                let mut output = File::create(&staging)?;
                cipher::encrypt_stream(&self.key, &mut input, &mut output, &mut self.tracker)?
            };

            self.tracker.begin_file(&name, Operation::Add, file.length);
            {
                let staged = File::open(&staging)?;
                let mut counted = CountingReader {
                    inner: staged,
                    tracker: &mut self.tracker,
                };
                self.envelope.add_blob(slot, &mut counted, file.length)?;
            }
            if let Err(e) = fs::remove_file(&staging) {
                warn!(slot = %slot, error = %e, "could not remove staged ciphertext");
            }

            let meta = EntryMeta {
                path: file.virtual_path.clone(),
                slot: Some(slot.clone()),
                iv: Some(iv),
                size: file.length,
                created_ms,
                modified_ms,
            };
            match self.find_file(&file.virtual_path) {
                Some(i) => self.entries[i] = meta,
                None => self.entries.push(meta),
            }
            self.drop_markers_above(&file.virtual_path);
        }

        // Empty source directories become markers so the folders survive.
        // Parents come before children in the plan, so a child's marker
        // displaces its parent's.
        let folders = plan.folders.clone();
        for folder in &folders {
            if !self.folder_exists(folder) && self.find_file(folder).is_none() {
                self.entries.push(EntryMeta::folder_marker(folder, now));
                self.drop_markers_above(folder);
            }
        }
        Ok(())
    }

    /// Record an empty folder under the current root folder.
    pub fn add_empty_folder(&mut self, name: &str) -> Result<()> {
        if paths::has_invalid_chars(name) {
            return Err(CofferError::InvalidName(name.to_string()));
        }
        let virtual_path = paths::join(&self.root_folder, name);
        if self.find_file(&virtual_path).is_some() || self.folder_exists(&virtual_path) {
            return Err(CofferError::NameConflict(virtual_path));
        }
        self.entries
            .push(EntryMeta::folder_marker(&virtual_path, now_ms()));
        // Any ancestor marker is stale now: those folders have a subfolder.
        self.drop_markers_above(&virtual_path);
        self.flush_table()
    }

    // ---- delete ----

    /// Delete files and folders. Folder paths expand to their whole subtree.
    pub fn delete_files_and_folders(&mut self, targets: &[&str]) -> Result<()> {
        let indices = self.expand_targets(targets)?;
        // A parent that is itself being deleted must not be resurrected as
        // an empty-folder marker.
        let parents: Vec<String> = targets
            .iter()
            .map(|t| paths::parent(t))
            .filter(|p| {
                !targets.iter().any(|t| {
                    paths::eq_ignore_case(p, t) || paths::is_descendant(p, t)
                })
            })
            .collect();

        let budget: u64 = indices
            .iter()
            .map(|&i| self.entries[i].size.max(1))
            .sum();
        self.tracker.reset(budget);

        let result = self.delete_indices(indices);
        // Marker materialization must not be torn by a late abort.
        self.tracker.set_block_abort(true);
        self.materialize_empty_parents(&parents);
        self.tracker.set_block_abort(false);
        let flush = self.flush_table();
        self.tracker.notify_done();
        result?;
        flush
    }

    fn delete_indices(&mut self, mut indices: Vec<usize>) -> Result<()> {
        // Remove from the back so earlier indices stay valid.
        indices.sort_unstable();
        for &i in indices.iter().rev() {
            if self.tracker.poll_abort() {
                return Err(CofferError::Aborted);
            }
            let entry = self.entries.remove(i);
            let name = paths::file_name(&entry.path).to_string();
            let weight = entry.size.max(1);
            self.tracker.begin_file(&name, Operation::Remove, weight);
            if let Some(slot) = &entry.slot {
                self.envelope.remove_blob(slot)?;
            }
            self.tracker.advance(weight);
        }
        Ok(())
    }

    // ---- rename ----

    /// Rename a file in place.
    pub fn rename_file(&mut self, path: &str, new_name: &str) -> Result<()> {
        if paths::has_invalid_chars(new_name) {
            return Err(CofferError::InvalidName(new_name.to_string()));
        }
        let index = self
            .find_file(path)
            .ok_or_else(|| CofferError::NotFound(path.to_string()))?;
        let new_path = paths::join(&paths::parent(path), new_name);

        let self_rename = paths::eq_ignore_case(&new_path, path);
        if !self_rename
            && (self.find_file(&new_path).is_some() || self.folder_exists(&new_path))
        {
            return Err(CofferError::NameConflict(new_path));
        }

        self.entries[index].path = new_path;
        self.entries[index].modified_ms = now_ms();
        self.flush_table()
    }

    /// Rename a folder, rewriting every descendant path.
    pub fn rename_folder(&mut self, folder: &str, new_name: &str) -> Result<()> {
        if folder == paths::ROOT {
            return Err(CofferError::InvalidOperation(
                "the root folder cannot be renamed".to_string(),
            ));
        }
        if paths::has_invalid_chars(new_name) {
            return Err(CofferError::InvalidName(new_name.to_string()));
        }
        if !self.folder_exists(folder) {
            return Err(CofferError::NotFound(folder.to_string()));
        }
        let new_path = paths::join(&paths::parent(folder), new_name);

        let self_rename = paths::eq_ignore_case(&new_path, folder);
        if !self_rename
            && (self.find_file(&new_path).is_some() || self.folder_exists(&new_path))
        {
            return Err(CofferError::NameConflict(new_path));
        }

        self.rewrite_prefix(folder, &new_path);
        self.flush_table()
    }

    // ---- move ----

    /// Destination paths that already exist and would block a move.
    pub fn test_move_files_and_folders(
        &self,
        sources: &[&str],
        destination: &str,
    ) -> Result<Vec<String>> {
        self.validate_move(sources, destination)?;
        let mut conflicts = Vec::new();
        for source in sources {
            let target = paths::join(destination, paths::file_name(source));
            if self.find_file(&target).is_some() || self.folder_exists(&target) {
                conflicts.push(target);
            }
        }
        Ok(conflicts)
    }

    /// Move files and folders into another folder.
    pub fn move_files_and_folders(&mut self, sources: &[&str], destination: &str) -> Result<()> {
        let conflicts = self.test_move_files_and_folders(sources, destination)?;
        if let Some(conflict) = conflicts.into_iter().next() {
            return Err(CofferError::NameConflict(conflict));
        }

        let destination = self.canonical_folder(destination);
        let old_parents: Vec<String> = sources.iter().map(|s| paths::parent(s)).collect();

        for source in sources {
            let target = paths::join(&destination, paths::file_name(source));
            if let Some(index) = self.find_file(source) {
                self.entries[index].path = target;
            } else {
                self.rewrite_prefix(source, &target);
            }
        }

        // The destination is no longer empty.
        self.remove_marker_in(&destination);
        self.materialize_empty_parents(&old_parents);
        self.flush_table()
    }

    fn validate_move(&self, sources: &[&str], destination: &str) -> Result<()> {
        if destination != paths::ROOT && !self.folder_exists(destination) {
            return Err(CofferError::NotFound(destination.to_string()));
        }
        for source in sources {
            let is_file = self.find_file(source).is_some();
            if !is_file && !self.folder_exists(source) {
                return Err(CofferError::NotFound(source.to_string()));
            }
            if paths::eq_ignore_case(source, destination) {
                return Err(CofferError::InvalidOperation(format!(
                    "cannot move {} onto itself",
                    source
                )));
            }
            if !is_file
                && (paths::is_descendant(destination, source)
                    || paths::eq_ignore_case(&paths::join(destination, paths::file_name(source)), source))
            {
                return Err(CofferError::InvalidOperation(format!(
                    "cannot move {} into its own subtree",
                    source
                )));
            }
        }
        Ok(())
    }

    // ---- extract ----

    /// Destination files that already exist and would be overwritten.
    pub fn test_extract_files_and_folders<P: AsRef<Path>>(
        &self,
        targets: &[&str],
        destination: P,
    ) -> Result<Vec<PathBuf>> {
        let outputs = self.plan_extract(targets, destination.as_ref())?;
        Ok(outputs
            .iter()
            .filter(|(_, out, is_dir)| !is_dir && out.exists())
            .map(|(_, out, _)| out.clone())
            .collect())
    }

    /// Decrypt files and folders to `destination`, preserving structure and
    /// restoring each file's modified timestamp. The creation timestamp is
    /// stored in the table but not restored: no cross-platform API can set
    /// it, so outputs carry their extraction time as creation time.
    pub fn extract_files_and_folders<P: AsRef<Path>>(
        &mut self,
        targets: &[&str],
        destination: P,
    ) -> Result<()> {
        let outputs = self.plan_extract(targets, destination.as_ref())?;

        let budget: u64 = outputs
            .iter()
            .filter(|(_, _, is_dir)| !is_dir)
            .map(|(i, _, _)| self.entries[*i].size)
            .sum();
        self.tracker.reset(budget);

        let result = self.extract_planned(&outputs, false).map(|_| ());
        self.tracker.notify_done();
        result
    }

    /// Extract everything under the current root folder.
    pub fn extract_all_files<P: AsRef<Path>>(&mut self, destination: P) -> Result<()> {
        let root = self.root_folder.clone();
        self.extract_files_and_folders(&[root.as_str()], destination)
    }

    /// Decrypt single files into the session's extraction scratch area.
    ///
    /// Clashing names get a ` (n)` suffix and outputs are marked read-only.
    /// Returns the paths written.
    pub fn extract_to_scratch(&mut self, targets: &[&str]) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::with_capacity(targets.len());
        for target in targets {
            let index = self
                .find_file(target)
                .ok_or_else(|| CofferError::NotFound(target.to_string()))?;
            let out = unique_output(
                self.env.extraction_dir(),
                paths::file_name(&self.entries[index].path),
            );
            outputs.push((index, out, false));
        }

        let budget: u64 = outputs.iter().map(|(i, _, _)| self.entries[*i].size).sum();
        self.tracker.reset(budget);

        let result = self.extract_planned(&outputs, true);
        self.tracker.notify_done();
        result
    }

    fn extract_planned(
        &mut self,
        outputs: &[(usize, PathBuf, bool)],
        read_only: bool,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (index, out, is_dir) in outputs {
            if *is_dir {
                fs::create_dir_all(out)?;
                continue;
            }
            if self.tracker.poll_abort() {
                return Err(CofferError::Aborted);
            }
            let entry = self.entries[*index].clone();
            let slot = entry
                .slot
                .as_ref()
                .ok_or_else(|| CofferError::CorruptArchive(entry.path.clone()))?;
            let iv = entry
                .iv
                .ok_or_else(|| CofferError::CorruptArchive(entry.path.clone()))?;

            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let name = paths::file_name(&entry.path).to_string();
            self.tracker.begin_file(&name, Operation::Extract, entry.size);

            let mut input = self.envelope.blob_reader(slot)?;
            let output = File::create(out)?;
            {
                let mut writer = &output;
                cipher::decrypt_stream(&self.key, &iv, &mut input, &mut writer, &mut self.tracker)?;
            }
            output.set_modified(
                UNIX_EPOCH + Duration::from_millis(entry.modified_ms.max(0) as u64),
            )?;
            if read_only {
                let mut perms = output.metadata()?.permissions();
                perms.set_readonly(true);
                fs::set_permissions(out, perms)?;
            }
            written.push(out.clone());
        }
        Ok(written)
    }

    // ---- internals ----

    fn find_file(&self, path: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_folder_marker() && paths::eq_ignore_case(&e.path, path))
    }

    /// All folders in the tree, keyed by lowercase path, valued by the first
    /// casing observed.
    fn folder_set(&self) -> BTreeMap<String, String> {
        let mut folders = BTreeMap::new();
        folders.insert(paths::ROOT.to_string(), paths::ROOT.to_string());
        for entry in &self.entries {
            let mut folder = paths::parent(&entry.path);
            while folder != paths::ROOT {
                folders
                    .entry(folder.to_lowercase())
                    .or_insert_with(|| folder.clone());
                folder = paths::parent(&folder);
            }
        }
        folders
    }

    fn canonical_folder(&self, folder: &str) -> String {
        if folder == paths::ROOT {
            return paths::ROOT.to_string();
        }
        self.folder_set()
            .get(&normalize_folder(folder))
            .cloned()
            .unwrap_or_else(|| folder.trim_end_matches('/').to_string())
    }

    fn next_slot(&mut self) -> String {
        self.slot_counter += 1;
        format!("File{:07}", self.slot_counter)
    }

    fn persist_index(&mut self) -> Result<()> {
        self.envelope
            .add_bytes(META_INDEX, &self.slot_counter.to_be_bytes())
    }

    /// Serialize, encrypt, and store the file table; also persists the slot
    /// counter. Runs on every exit path of mutating operations.
    fn flush_table(&mut self) -> Result<()> {
        self.persist_index()?;
        let plaintext = serde_json::to_vec(&self.entries)?;
        let (iv, ciphertext) = cipher::encrypt_bytes(&self.key, &plaintext)?;
        let mut record = Vec::with_capacity(IV_LENGTH + ciphertext.len());
        record.extend_from_slice(&iv);
        record.extend_from_slice(&ciphertext);
        self.envelope.add_bytes(META_TABLE, &record)
    }

    /// Drop markers of every folder along a new file's path: those folders
    /// now hold real content.
    fn drop_markers_above(&mut self, path: &str) {
        let mut folder = paths::parent(path);
        loop {
            self.remove_marker_in(&folder);
            if folder == paths::ROOT {
                break;
            }
            folder = paths::parent(&folder);
        }
    }

    fn remove_marker_in(&mut self, folder: &str) {
        self.entries.retain(|e| {
            !(e.is_folder_marker() && paths::eq_ignore_case(&paths::parent(&e.path), folder))
        });
    }

    /// Parents that lost their last child get a marker so the folder itself
    /// survives in the tree.
    fn materialize_empty_parents(&mut self, parents: &[String]) {
        let now = now_ms();
        for parent in parents {
            if parent == paths::ROOT {
                continue;
            }
            let still_referenced = self
                .entries
                .iter()
                .any(|e| paths::is_descendant(&e.path, parent));
            if !still_referenced {
                self.entries.push(EntryMeta::folder_marker(parent, now));
            }
        }
    }

    /// Rewrite every path at or under `from` to sit under `to` instead.
    fn rewrite_prefix(&mut self, from: &str, to: &str) {
        let from = from.trim_end_matches('/');
        for entry in &mut self.entries {
            if paths::eq_ignore_case(&entry.path, from) {
                entry.path = to.to_string();
            } else if let Some(suffix) = paths::strip_prefix_ignore_case(&entry.path, from) {
                // "/AB/c" also survives a strip of "/A"; a real descendant's
                // suffix starts at a separator.
                if suffix.starts_with('/') {
                    entry.path = format!("{}{}", to, suffix);
                }
            }
        }
    }

    /// Expand delete targets into entry indices, folders recursively.
    fn expand_targets(&self, targets: &[&str]) -> Result<Vec<usize>> {
        let mut indices = Vec::new();
        for target in targets {
            if let Some(i) = self.find_file(target) {
                indices.push(i);
                continue;
            }
            if !self.folder_exists(target) {
                return Err(CofferError::NotFound(target.to_string()));
            }
            for (i, entry) in self.entries.iter().enumerate() {
                if paths::is_descendant(&entry.path, target) {
                    indices.push(i);
                }
            }
        }
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    /// Plan an add: walk the sources and map them to virtual paths under the
    /// current root folder.
    fn plan_add<P: AsRef<Path>>(&self, sources: &[P]) -> Result<AddPlan> {
        let mut plan = AddPlan::default();
        for source in sources {
            let source = source.as_ref();
            let name = source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    CofferError::InvalidName(source.display().to_string())
                })?;
            let virtual_path = paths::join(&self.root_folder, name);
            plan_source(source, &virtual_path, &mut plan)?;
        }
        Ok(plan)
    }

    /// Map extract targets to output paths. Folders expand recursively;
    /// markers become directories.
    fn plan_extract(
        &self,
        targets: &[&str],
        destination: &Path,
    ) -> Result<Vec<(usize, PathBuf, bool)>> {
        let mut outputs = Vec::new();
        for target in targets {
            if let Some(i) = self.find_file(target) {
                let name = paths::file_name(&self.entries[i].path);
                outputs.push((i, destination.join(name), false));
                continue;
            }
            let is_root = *target == paths::ROOT;
            if !is_root && !self.folder_exists(target) {
                return Err(CofferError::NotFound(target.to_string()));
            }
            let base = paths::parent(target);
            for (i, entry) in self.entries.iter().enumerate() {
                if !is_root && !paths::is_descendant(&entry.path, target) {
                    continue;
                }
                let (full, is_dir) = if entry.is_folder_marker() {
                    (paths::parent(&entry.path), true)
                } else {
                    (entry.path.clone(), false)
                };
                // The caller's casing of `base` may not byte-match the stored
                // casing, so the relative part is stripped per character.
                let relative = if base == paths::ROOT {
                    Some(full.as_str())
                } else {
                    paths::strip_prefix_ignore_case(&full, &base)
                };
                let relative = match relative.map(|r| r.trim_start_matches('/')) {
                    Some(r) if !r.is_empty() => r,
                    _ => continue,
                };
                outputs.push((i, destination.join(relative), is_dir));
            }
        }
        Ok(outputs)
    }
}

#[derive(Debug, Clone)]
struct PlannedFile {
    source: PathBuf,
    virtual_path: String,
    length: u64,
}

#[derive(Debug, Default)]
struct AddPlan {
    files: Vec<PlannedFile>,
    /// Source directories, recorded so empty ones become markers
    folders: Vec<String>,
}

fn plan_source(source: &Path, virtual_path: &str, plan: &mut AddPlan) -> Result<()> {
    let metadata = fs::metadata(source)?;
    if metadata.is_dir() {
        plan.folders.push(virtual_path.to_string());
        for child in fs::read_dir(source)? {
            let child = child?.path();
            let name = child
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| CofferError::InvalidName(child.display().to_string()))?
                .to_string();
            plan_source(&child, &paths::join(virtual_path, &name), plan)?;
        }
    } else {
        plan.files.push(PlannedFile {
            source: source.to_path_buf(),
            virtual_path: virtual_path.to_string(),
            length: metadata.len(),
        });
    }
    Ok(())
}

struct CountingReader<'a, R> {
    inner: R,
    tracker: &'a mut ProgressTracker,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.tracker.advance(n as u64);
        Ok(n)
    }
}

fn file_listing(entry: &EntryMeta) -> FileEntry {
    FileEntry {
        path: entry.path.clone(),
        name: paths::file_name(&entry.path).to_string(),
        size: entry.size,
        created_ms: entry.created_ms,
        modified_ms: entry.modified_ms,
        is_folder: false,
    }
}

fn normalize_folder(folder: &str) -> String {
    if folder == paths::ROOT {
        paths::ROOT.to_string()
    } else {
        folder.trim_end_matches('/').to_lowercase()
    }
}

fn now_ms() -> i64 {
    system_time_ms(SystemTime::now())
}

fn system_time_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Append ` (n)` before the extension until the name is free.
fn unique_output(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// salt ∥ iterations ∥ memory-KiB ∥ parallelism ∥ stamp, integers big-endian.
fn test_record(salt: &[u8], params: &Argon2Params, key: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(SALT_LENGTH + 12 + STAMP_LENGTH);
    record.extend_from_slice(salt);
    record.extend_from_slice(&params.iterations.to_be_bytes());
    record.extend_from_slice(&params.memory_kib.to_be_bytes());
    record.extend_from_slice(&params.parallelism.to_be_bytes());
    record.extend_from_slice(&stamp::verification_stamp(key));
    record
}

fn parse_test_record(record: &[u8]) -> Result<([u8; SALT_LENGTH], Argon2Params, [u8; STAMP_LENGTH])> {
    if record.len() != SALT_LENGTH + 12 + STAMP_LENGTH {
        return Err(CofferError::CorruptArchive(
            "KDF record has the wrong size".to_string(),
        ));
    }
    let mut salt = [0u8; SALT_LENGTH];
    salt.copy_from_slice(&record[..SALT_LENGTH]);
    let mut at = SALT_LENGTH;
    let mut next_u32 = |record: &[u8]| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&record[at..at + 4]);
        at += 4;
        u32::from_be_bytes(buf)
    };
    let params = Argon2Params {
        iterations: next_u32(record),
        memory_kib: next_u32(record),
        parallelism: next_u32(record),
    };
    let mut stored_stamp = [0u8; STAMP_LENGTH];
    stored_stamp.copy_from_slice(&record[at..]);
    Ok((salt, params, stored_stamp))
}

fn read_be_u32(envelope: &mut Envelope, slot: &str) -> Result<u32> {
    let data = envelope
        .read_blob(slot)
        .map_err(|_| CofferError::CorruptArchive(format!("missing {} record", slot)))?;
    let bytes: [u8; 4] = data
        .as_slice()
        .try_into()
        .map_err(|_| CofferError::CorruptArchive(format!("malformed {} record", slot)))?;
    Ok(u32::from_be_bytes(bytes))
}
