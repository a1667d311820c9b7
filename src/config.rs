//! Persistent key-value configuration.
//!
//! A small typed preference store backed by a JSON file. Values are kept as
//! strings on disk; typed getters parse on read and fall back to the supplied
//! default when the key is missing or unparsable.

use crate::crypto::Argon2Params;
use crate::error::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Preference key for the default Argon2 iteration count
pub const KEY_ARGON2_ITERATIONS: &str = "argon2.iterations";

/// Preference key for the default Argon2 memory cost in KiB
pub const KEY_ARGON2_MEMORY_KIB: &str = "argon2.memory_kib";

/// Preference key for the default Argon2 parallelism
pub const KEY_ARGON2_PARALLELISM: &str = "argon2.parallelism";

/// Typed access to persisted preferences.
pub trait ConfigStore {
    fn get_string(&self, key: &str, default: &str) -> String;
    fn set_string(&mut self, key: &str, value: &str);

    fn get_i32(&self, key: &str, default: i32) -> i32 {
        self.get_string(key, "").parse().unwrap_or(default)
    }

    fn set_i32(&mut self, key: &str, value: i32) {
        self.set_string(key, &value.to_string());
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get_string(key, "").parse().unwrap_or(default)
    }

    fn set_i64(&mut self, key: &str, value: i64) {
        self.set_string(key, &value.to_string());
    }

    fn get_f32(&self, key: &str, default: f32) -> f32 {
        self.get_string(key, "").parse().unwrap_or(default)
    }

    fn set_f32(&mut self, key: &str, value: f32) {
        self.set_string(key, &value.to_string());
    }

    fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get_string(key, "").parse().unwrap_or(default)
    }

    fn set_f64(&mut self, key: &str, value: f64) {
        self.set_string(key, &value.to_string());
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_string(key, "").parse().unwrap_or(default)
    }

    fn set_bool(&mut self, key: &str, value: bool) {
        self.set_string(key, &value.to_string());
    }

    fn get_bytes(&self, key: &str, default: &[u8]) -> Vec<u8> {
        let encoded = self.get_string(key, "");
        if encoded.is_empty() {
            return default.to_vec();
        }
        BASE64.decode(&encoded).unwrap_or_else(|_| default.to_vec())
    }

    fn set_bytes(&mut self, key: &str, value: &[u8]) {
        self.set_string(key, &BASE64.encode(value));
    }

    /// Flush pending changes to the backing store.
    fn save(&self) -> Result<()>;
}

/// File-backed [`ConfigStore`] holding a flat string map as JSON.
pub struct JsonConfigStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonConfigStore {
    /// Load the store at `path`, starting empty if the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(&self.values)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

/// Read the default Argon2 parameters for new archives.
pub fn load_argon2_defaults(store: &dyn ConfigStore) -> Argon2Params {
    let fallback = Argon2Params::default();
    Argon2Params {
        iterations: store.get_i32(KEY_ARGON2_ITERATIONS, fallback.iterations as i32) as u32,
        memory_kib: store.get_i32(KEY_ARGON2_MEMORY_KIB, fallback.memory_kib as i32) as u32,
        parallelism: store.get_i32(KEY_ARGON2_PARALLELISM, fallback.parallelism as i32) as u32,
    }
}

/// Persist the default Argon2 parameters for new archives.
pub fn save_argon2_defaults(store: &mut dyn ConfigStore, params: &Argon2Params) {
    store.set_i32(KEY_ARGON2_ITERATIONS, params.iterations as i32);
    store.set_i32(KEY_ARGON2_MEMORY_KIB, params.memory_kib as i32);
    store.set_i32(KEY_ARGON2_PARALLELISM, params.parallelism as i32);
}
