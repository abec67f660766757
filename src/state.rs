//! # Persistent Sync State
//!
//! A small hierarchical key-value file holding what must survive process
//! restarts: per-list poll schedules and error counters, the MAC key pair,
//! and per-prefix full-hash failure records. Every mutation rewrites the
//! file; a missing or corrupt file is recreated empty.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::mac::MacKeys;

/// Poll schedule and failure counter for one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSync {
    /// Unix time of the last recorded outcome.
    pub time: u64,
    /// Seconds to wait after `time` before the next poll.
    pub wait: u64,
    /// Consecutive failures since the last successful update.
    pub errors: u32,
}

/// Failure record for one full-hash prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashError {
    pub errors: u32,
    pub timestamp: u64,
}

/// The persisted key-value store. Paths use `/` as the separator, e.g.
/// `updated/<list>` or `full_hash_errors/<hex prefix>`.
#[derive(Debug)]
pub struct DataFile {
    path: PathBuf,
    root: Mutex<Value>,
}

fn empty_root() -> Value {
    json!({
        "updated": {},
        "mac_keys": { "client_key": "", "wrapped_key": "" },
        "full_hash_errors": {},
    })
}

impl DataFile {
    /// Open the file at `path`, recreating it when missing or unreadable.
    pub fn open(path: &Path) -> Result<Self> {
        let root = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(v) if v.is_object() => v,
                _ => {
                    log::warn!("data file {} is corrupt, starting fresh", path.display());
                    empty_root()
                }
            },
            Err(_) => empty_root(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            root: Mutex::new(root),
        })
    }

    /// Read the value at a `/`-separated path.
    pub fn get(&self, path: &str) -> Option<Value> {
        let root = self.lock();
        let mut cur = &*root;
        for part in path.split('/') {
            cur = cur.get(part)?;
        }
        Some(cur.clone())
    }

    /// Store a value at a `/`-separated path, creating intermediate maps,
    /// and rewrite the file.
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        {
            let mut root = self.lock();
            let mut cur = &mut *root;
            let parts: Vec<&str> = path.split('/').collect();
            for part in &parts[..parts.len() - 1] {
                if !cur.get(*part).map(Value::is_object).unwrap_or(false) {
                    cur[*part] = json!({});
                }
                cur = &mut cur[*part];
            }
            cur[parts[parts.len() - 1]] = value;
        }
        self.persist()
    }

    /// Remove the value at a path and rewrite the file. Missing paths are
    /// not an error.
    pub fn delete(&self, path: &str) -> Result<()> {
        {
            let mut root = self.lock();
            let mut cur = &mut *root;
            let parts: Vec<&str> = path.split('/').collect();
            for part in &parts[..parts.len() - 1] {
                match cur.get_mut(*part) {
                    Some(next) => cur = next,
                    None => return Ok(()),
                }
            }
            if let Some(map) = cur.as_object_mut() {
                map.remove(parts[parts.len() - 1]);
            }
        }
        self.persist()
    }

    pub fn list_sync(&self, list: &str) -> Option<ListSync> {
        let value = self.get(&format!("updated/{list}"))?;
        serde_json::from_value(value).ok()
    }

    pub fn set_list_sync(&self, list: &str, sync: &ListSync) -> Result<()> {
        self.set(
            &format!("updated/{list}"),
            serde_json::to_value(sync).unwrap_or(Value::Null),
        )
    }

    /// The stored MAC key pair, or `None` when unset. The client key lives
    /// base64-encoded in the file and decoded in memory.
    pub fn mac_keys(&self) -> Option<MacKeys> {
        let keys = self.get("mac_keys")?;
        let client_b64 = keys.get("client_key")?.as_str()?;
        let wrapped = keys.get("wrapped_key")?.as_str()?;
        if client_b64.is_empty() || wrapped.is_empty() {
            return None;
        }
        let client_key = STANDARD.decode(client_b64).ok()?;
        Some(MacKeys {
            client_key,
            wrapped_key: wrapped.to_string(),
        })
    }

    pub fn set_mac_keys(&self, keys: &MacKeys) -> Result<()> {
        self.set(
            "mac_keys",
            json!({
                "client_key": STANDARD.encode(&keys.client_key),
                "wrapped_key": keys.wrapped_key,
            }),
        )
    }

    pub fn clear_mac_keys(&self) -> Result<()> {
        self.set("mac_keys", json!({ "client_key": "", "wrapped_key": "" }))
    }

    pub fn hash_error(&self, prefix_hex: &str) -> Option<HashError> {
        let value = self.get(&format!("full_hash_errors/{prefix_hex}"))?;
        serde_json::from_value(value).ok()
    }

    pub fn set_hash_error(&self, prefix_hex: &str, record: &HashError) -> Result<()> {
        self.set(
            &format!("full_hash_errors/{prefix_hex}"),
            serde_json::to_value(record).unwrap_or(Value::Null),
        )
    }

    pub fn clear_hash_error(&self, prefix_hex: &str) -> Result<()> {
        self.delete(&format!("full_hash_errors/{prefix_hex}"))
    }

    fn persist(&self) -> Result<()> {
        let contents = {
            let root = self.lock();
            serde_json::to_string_pretty(&*root).unwrap_or_else(|_| "{}".to_string())
        };
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Value> {
        self.root.lock().unwrap_or_else(|e| e.into_inner())
    }
}
