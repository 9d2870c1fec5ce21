//! Server configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `HOMECTL_API_KEY`, `HOMECTL_LISTEN`
//! 2. **Config file**: path via `--config <path>`, or `homectl.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! # HTTPS runs alongside HTTP once both tls_cert and tls_key are set.
//! https_listen = "0.0.0.0:8443"
//! # tls_cert = "/etc/homectl/cert.pem"
//! # tls_key = "/etc/homectl/key.pem"
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [logging]
//! level = "info"
//!
//! [wake]
//! broadcast = "255.255.255.255"
//! ports = [7, 9]
//!
//! [ssh]
//! connect_timeout_ms = 10000
//! command_timeout_ms = 10000
//! # known_hosts = "/etc/homectl/known_hosts"
//!
//! [probe]
//! status_timeout_ms = 3000
//! echo_interval_ms = 1000
//! tick_ms = 500
//! staleness_ms = 2000
//! ```
//!
//! Target inventories (hosts, MACs, credentials) are not part of this file;
//! see [`crate::inventory`].

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// HTTPS socket address (default `0.0.0.0:8443`).
    #[serde(default = "default_https_listen")]
    pub https_listen: String,
    /// PEM certificate chain for HTTPS.
    pub tls_cert: Option<String>,
    /// PEM private key for HTTPS.
    pub tls_key: Option<String>,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token. Override with `HOMECTL_API_KEY` env var.
    /// Defaults to `"change-me"` which triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Where magic packets go when a request lists no broadcast targets.
#[derive(Debug, Clone, Deserialize)]
pub struct WakeConfig {
    /// Default broadcast address (default `255.255.255.255`).
    #[serde(default = "default_broadcast")]
    pub broadcast: IpAddr,
    /// Default UDP ports, each sent to in order (default `[7, 9]`).
    #[serde(default = "default_wake_ports")]
    pub ports: Vec<u16>,
}

/// SSH connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// TCP connect + handshake timeout in milliseconds (default 10 000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long to wait for the remote command's channel to finish (default 10 000).
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Override for the known-hosts file. Defaults to `~/.ssh/known_hosts`.
    pub known_hosts: Option<String>,
}

/// ICMP liveness probe timing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// One-shot status check window in milliseconds (default 3000).
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    /// Gap between echo requests in milliseconds (default 1000).
    #[serde(default = "default_echo_interval_ms")]
    pub echo_interval_ms: u64,
    /// Status-stream update period in milliseconds (default 500).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// A host stays online this long after its last reply (default 2000).
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl ServerConfig {
    /// Certificate and key paths when both are set. `None` leaves HTTPS off.
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        let cert = self.tls_cert.as_deref().filter(|p| !p.is_empty());
        let key = self.tls_key.as_deref().filter(|p| !p.is_empty());
        cert.zip(key)
    }
}

impl ProbeConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    /// Every probe period must be non-zero: a zero tick cannot drive a timer
    /// and a zero echo interval would send back to back.
    pub fn validate(&self) -> Result<(), String> {
        let periods = [
            ("status_timeout_ms", self.status_timeout_ms),
            ("echo_interval_ms", self.echo_interval_ms),
            ("tick_ms", self.tick_ms),
            ("staleness_ms", self.staleness_ms),
        ];
        match periods.iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(format!("[probe] {name} must be greater than zero")),
            None => Ok(()),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_https_listen() -> String {
    "0.0.0.0:8443".to_string()
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_broadcast() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}
fn default_wake_ports() -> Vec<u16> {
    vec![7, 9]
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_command_timeout_ms() -> u64 {
    10_000
}
fn default_status_timeout_ms() -> u64 {
    3000
}
fn default_echo_interval_ms() -> u64 {
    1000
}
fn default_tick_ms() -> u64 {
    500
}
fn default_staleness_ms() -> u64 {
    2000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            https_listen: default_https_listen(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            broadcast: default_broadcast(),
            ports: default_wake_ports(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            known_hosts: None,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            status_timeout_ms: default_status_timeout_ms(),
            echo_interval_ms: default_echo_interval_ms(),
            tick_ms: default_tick_ms(),
            staleness_ms: default_staleness_ms(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `homectl.toml` in
    /// the current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = if let Some(p) = path {
            Self::from_file(Path::new(p))?
        } else if Path::new("homectl.toml").exists() {
            Self::from_file(Path::new("homectl.toml"))?
        } else {
            Config::default()
        };

        if let Ok(key) = std::env::var("HOMECTL_API_KEY") {
            config.auth.api_key = key;
        }
        if let Ok(listen) = std::env::var("HOMECTL_LISTEN") {
            config.server.listen = listen;
        }

        config.probe.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.wake.ports, [7, 9]);
        assert_eq!(config.wake.broadcast, IpAddr::V4(Ipv4Addr::BROADCAST));
        assert_eq!(config.probe.status_timeout(), Duration::from_secs(3));
        assert_eq!(config.probe.tick_ms, 500);
        assert_eq!(config.probe.staleness_ms, 2000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [auth]
            api_key = "secret"

            [wake]
            ports = [9]

            [probe]
            tick_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.auth.api_key, "secret");
        assert_eq!(config.wake.ports, [9]);
        assert_eq!(config.probe.tick_ms, 250);
        assert_eq!(config.probe.staleness_ms, 2000);
        assert_eq!(config.ssh.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_probe_period_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homectl.toml");
        std::fs::write(&path, "[probe]\ntick_ms = 0\n").unwrap();
        let err = Config::load(path.to_str()).unwrap_err();
        assert_eq!(err, "[probe] tick_ms must be greater than zero");

        let mut probe = ProbeConfig::default();
        assert!(probe.validate().is_ok());
        probe.echo_interval_ms = 0;
        assert!(probe.validate().unwrap_err().contains("echo_interval_ms"));
        probe.echo_interval_ms = 1000;
        probe.staleness_ms = 0;
        assert!(probe.validate().unwrap_err().contains("staleness_ms"));
    }

    #[test]
    fn test_tls_needs_cert_and_key() {
        let config: Config = toml::from_str(
            r#"
            [server]
            tls_cert = "/etc/homectl/cert.pem"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.https_listen, "0.0.0.0:8443");
        assert!(config.server.tls_paths().is_none());

        let config: Config = toml::from_str(
            r#"
            [server]
            https_listen = "127.0.0.1:9443"
            tls_cert = "cert.pem"
            tls_key = "key.pem"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.tls_paths(), Some(("cert.pem", "key.pem")));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = Config::load(Some("/nonexistent/homectl.toml")).unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
