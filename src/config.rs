use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Engine configuration, loadable from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the update/gethash endpoints, with trailing slash.
    pub server: String,
    /// Base URL for key-exchange endpoints. Falls back to `server` when empty.
    pub mac_server: String,
    /// API key issued for this client.
    pub key: String,
    /// Protocol version string sent as `pver`.
    pub version: String,
    /// Enable HMAC validation of server responses.
    pub mac: bool,
    /// HTTP request timeout in seconds.
    pub http_timeout: u64,
    pub user_agent: String,
    /// Full-hash cache TTL in seconds.
    pub cache_time: u64,
    /// Fallback wait in seconds when a failure has no protocol-mandated wait.
    pub default_retry: u64,
    /// Location of the persistent sync-state file.
    pub data_filepath: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: String::new(),
            mac_server: String::new(),
            key: String::new(),
            version: "2.2".to_string(),
            mac: false,
            http_timeout: 60,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            cache_time: 2700,
            default_retry: 30,
            data_filepath: PathBuf::from("safebrowsing2-data.json"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(toml::from_str(s)?)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Validate required fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.is_empty() {
            return Err("server must be set".to_string());
        }
        if self.key.is_empty() {
            return Err("key must be set".to_string());
        }
        if self.http_timeout == 0 {
            return Err("http_timeout must be positive".to_string());
        }
        Ok(())
    }

    /// Endpoint base used for key exchange.
    pub fn mac_endpoint(&self) -> &str {
        if self.mac_server.is_empty() {
            &self.server
        } else {
            &self.mac_server
        }
    }
}
