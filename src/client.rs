//! # Engine Handle
//!
//! The `SafeBrowsing` struct ties the configuration, storage backend,
//! transport and sync-state file together. The update engine and the lookup
//! engine are implemented on this handle in their own modules.

use std::sync::atomic::AtomicU32;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::state::DataFile;
use crate::storage::Storage;

/// A Safe Browsing v2 client over a storage backend `S` and transport `T`.
pub struct SafeBrowsing<S, T> {
    pub(crate) config: Config,
    pub(crate) storage: S,
    pub(crate) transport: T,
    pub(crate) data: DataFile,
    pub(crate) in_update: AtomicU32,
}

impl<S: Storage, T: Transport> SafeBrowsing<S, T> {
    /// Build an engine. Validates the configuration and opens (or creates)
    /// the sync-state file.
    pub fn new(config: Config, storage: S, transport: T) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let data = DataFile::open(&config.data_filepath)?;
        Ok(Self {
            config,
            storage,
            transport,
            data,
            in_update: AtomicU32::new(0),
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sync-state file, exposed for embedders that schedule polls
    /// themselves.
    pub fn data(&self) -> &DataFile {
        &self.data
    }

    /// Build a protocol endpoint URL with the common query parameters.
    pub(crate) fn api_url(&self, base: &str, endpoint: &str) -> String {
        format!(
            "{}{}?client=api&apikey={}&appver={}&pver={}",
            base,
            endpoint,
            self.config.key,
            env!("CARGO_PKG_VERSION"),
            self.config.version
        )
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
