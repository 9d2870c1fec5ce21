//! Local target inventory for the CLIs.
//!
//! Read from a YAML file, resolved in order:
//!
//! 1. `--inventory <path>`
//! 2. `HOMECTL_INVENTORY`
//! 3. `~/.homectl/config.yml`
//!
//! ```yaml
//! run_targets:
//!   - id: nas
//!     host: nas.local
//!     mac: "AA:BB:CC:DD:EE:FF"
//!     ssh:
//!       user: operator
//!       private_key:
//!         path: id_ed25519
//!     broadcast_address:
//!       - ip: 192.168.1.255
//!         port: 9
//! remote:
//!   - id: home
//!     host: https://home.example.net:8080
//!     auth_token: secret
//!     targets:
//!       - id: nas
//!         host: nas.local
//!         mac: "AA:BB:CC:DD:EE:FF"
//! ```
//!
//! The file is only parsed here; values are validated when a target is turned
//! into a dispatchable [`Target`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::address::{BroadcastTarget, HardwareAddress};
use crate::dispatch::Target;
use crate::error::ActionError;
use crate::ssh::{Credential, KeyFile, RemoteHost};

/// Default inventory location, relative to `$HOME`.
pub const DEFAULT_INVENTORY: &str = ".homectl/config.yml";

/// Parsed inventory file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Inventory {
    /// Targets acted on directly by `homectl run`.
    #[serde(default)]
    pub run_targets: Vec<TargetConfig>,
    /// `homectl serve` instances reachable by `homectl-remote`.
    #[serde(default)]
    pub remote: Vec<RemoteConfig>,
}

/// A remote `homectl serve` endpoint and the targets behind it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub id: String,
    /// Base URL, e.g. `http://10.0.0.2:8080`.
    pub host: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// One host, as written in the inventory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    pub id: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub ssh: Option<SshTargetConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub broadcast_address: Vec<AddressSpec>,
}

/// SSH login settings for a target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshTargetConfig {
    pub user: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKeySpec>,
}

/// Raw `{ip, port}` pair, shared by the inventory and the wake API body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddressSpec {
    pub ip: String,
    pub port: i64,
}

/// Raw private-key reference, shared by the inventory and the halt API body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrivateKeySpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl AddressSpec {
    pub fn validate(&self) -> Result<BroadcastTarget, ActionError> {
        BroadcastTarget::parse(&self.ip, self.port)
    }
}

impl From<&PrivateKeySpec> for KeyFile {
    fn from(spec: &PrivateKeySpec) -> Self {
        KeyFile {
            path: spec.path.clone(),
            passphrase: spec.passphrase.clone(),
        }
    }
}

/// Validate a user/host/port plus optional password and key into a [`RemoteHost`].
pub fn remote_host(
    user: &str,
    host: &str,
    port: Option<u16>,
    password: Option<&str>,
    private_key: Option<&PrivateKeySpec>,
) -> Result<RemoteHost, ActionError> {
    let credential = Credential::from_parts(password.map(String::from), private_key.map(KeyFile::from))?;
    RemoteHost::new(user, host, port, credential)
}

impl TargetConfig {
    /// Validate every field that is present. Absent fields stay `None` and
    /// only fail if a command needs them.
    pub fn to_target(&self) -> Result<Target, ActionError> {
        let in_target = |e: ActionError| match e {
            ActionError::Validation(msg) => {
                ActionError::validation(format!("target '{}': {msg}", self.id))
            }
            other => other,
        };

        let mac = self
            .mac
            .as_deref()
            .filter(|m| !m.is_empty())
            .map(str::parse::<HardwareAddress>)
            .transpose()
            .map_err(in_target)?;
        let broadcast = self
            .broadcast_address
            .iter()
            .map(AddressSpec::validate)
            .collect::<Result<Vec<_>, _>>()
            .map_err(in_target)?;
        let host = self.host.clone().filter(|h| !h.is_empty());
        let ssh = match (&self.ssh, &host) {
            (Some(ssh), Some(host)) => Some(
                remote_host(
                    &ssh.user,
                    host,
                    ssh.port,
                    ssh.password.as_deref(),
                    ssh.private_key.as_ref(),
                )
                .map_err(in_target)?,
            ),
            _ => None,
        };
        if let Some(host) = &host {
            crate::address::validate_host(host).map_err(in_target)?;
        }

        Ok(Target {
            mac,
            broadcast,
            host,
            ssh,
        })
    }
}

impl RemoteConfig {
    pub fn target(&self, id: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.id == id)
    }
}

impl Inventory {
    /// Load the inventory from `path`, `HOMECTL_INVENTORY`, or the default location.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let path = match path {
            Some(p) => PathBuf::from(crate::util::expand_tilde(p).as_ref()),
            None => Self::default_path()?,
        };
        Self::from_file(&path)
    }

    pub fn default_path() -> Result<PathBuf, String> {
        if let Ok(p) = std::env::var("HOMECTL_INVENTORY") {
            return Ok(PathBuf::from(crate::util::expand_tilde(&p).as_ref()));
        }
        crate::util::home_dir()
            .map(|home| home.join(DEFAULT_INVENTORY))
            .ok_or_else(|| "HOME is not set; pass --inventory".to_string())
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read inventory {}: {e}", path.display()))?;
        serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse inventory {}: {e}", path.display()))
    }

    pub fn run_target(&self, id: &str) -> Option<&TargetConfig> {
        self.run_targets.iter().find(|t| t.id == id)
    }

    pub fn remote(&self, id: &str) -> Option<&RemoteConfig> {
        self.remote.iter().find(|r| r.id == id)
    }
}
