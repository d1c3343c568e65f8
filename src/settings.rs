use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfiguratorError, Result};
use crate::fsutil;

/// Default netopeer configuration directory (`${prefix}/etc/netopeer`)
pub const DEFAULT_CONFIG_DIR: &str = "/usr/local/etc/netopeer";

/// Default libnetconf working directory holding the datastores
pub const DEFAULT_WORKING_DIR: &str = "/usr/local/var/lib/libnetconf";

/// Installation paths the configuration modules work with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Netopeer configuration directory (stunnel config and certificates)
    pub config_dir: PathBuf,
    /// libnetconf working directory (access-control datastore)
    pub working_dir: PathBuf,
    /// PID file of the NETCONF server, signalled after access-control commits
    pub server_pid_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            working_dir: PathBuf::from(DEFAULT_WORKING_DIR),
            server_pid_file: None,
        }
    }
}

impl Settings {
    /// Parse settings from the given path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fsutil::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfiguratorError::corrupt(path, e))
    }

    /// Parse settings from a JSON string; missing keys take their defaults
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Proxy (stunnel) configuration file
    pub fn proxy_config_path(&self) -> PathBuf {
        self.config_dir.join("stunnel_config")
    }

    /// Directory the installed server certificates live in
    pub fn cert_dir(&self) -> PathBuf {
        self.config_dir.join("stunnel")
    }

    /// PID file of the stunnel proxy
    pub fn proxy_pid_file(&self) -> PathBuf {
        self.cert_dir().join("stunnel.pid")
    }

    /// Access-control datastore file
    pub fn datastore_path(&self) -> PathBuf {
        self.working_dir.join("datastore-acm.xml")
    }
}

impl std::str::FromStr for Settings {
    type Err = crate::error::ConfiguratorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}
