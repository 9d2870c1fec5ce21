//! Command-line parsing and inventory lookup for homectl-remote.
//!
//! The remote server and the target are looked up by id in the YAML
//! inventory shared with `homectl run` (see [`homectl::inventory`]):
//!
//! 1. `--inventory <path>`
//! 2. `HOMECTL_INVENTORY`
//! 3. `~/.homectl/config.yml`

use clap::Parser;
use homectl::inventory::{Inventory, TargetConfig};
use homectl::routes::{HaltPayload, WakePayload};
use homectl::Command;

/// CLI arguments parsed by `clap`.
#[derive(Parser, Debug)]
#[command(name = "homectl-remote", version, about = "Control hosts through a remote homectl server")]
pub struct Cli {
    /// Remote id from the inventory's `remote` list.
    #[arg(long)]
    pub remote: String,
    /// Target id within that remote's `targets`.
    #[arg(long)]
    pub target: String,
    /// One of `wake`, `halt`, `status`, `status-stream`.
    pub command: String,
    /// Path to the YAML inventory.
    #[arg(long)]
    pub inventory: Option<String>,
}

/// Everything needed to issue one request.
#[derive(Debug)]
pub struct Resolved {
    pub command: Command,
    pub base_url: String,
    pub auth_token: Option<String>,
    pub target: TargetConfig,
}

/// Parse the command and find the remote and target in the inventory.
pub fn resolve(cli: &Cli) -> Result<Resolved, String> {
    let command: Command = cli.command.parse().map_err(|e: homectl::ActionError| e.to_string())?;
    let inventory = Inventory::load(cli.inventory.as_deref())?;
    resolve_in(&inventory, command, &cli.remote, &cli.target)
}

fn resolve_in(
    inventory: &Inventory,
    command: Command,
    remote_id: &str,
    target_id: &str,
) -> Result<Resolved, String> {
    let remote = inventory
        .remote(remote_id)
        .ok_or_else(|| format!("Remote '{remote_id}' not found"))?;
    if remote.host.is_empty() {
        return Err(format!("Remote '{remote_id}' has empty host"));
    }
    let target = remote
        .target(target_id)
        .ok_or_else(|| format!("Target '{target_id}' not found on remote '{remote_id}'"))?;

    Ok(Resolved {
        command,
        base_url: remote.host.clone(),
        auth_token: remote.auth_token.clone().filter(|t| !t.is_empty()),
        target: target.clone(),
    })
}

/// Body for `POST /api/wake`.
pub fn wake_payload(target: &TargetConfig) -> Result<WakePayload, String> {
    let mac = target
        .mac
        .clone()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| format!("Target '{}' has no mac", target.id))?;
    Ok(WakePayload {
        mac,
        addresses: target.broadcast_address.clone(),
    })
}

/// Body for `POST /api/halt`.
pub fn halt_payload(target: &TargetConfig) -> Result<HaltPayload, String> {
    let ssh = target
        .ssh
        .as_ref()
        .ok_or_else(|| format!("Target '{}' has no ssh settings", target.id))?;
    Ok(HaltPayload {
        user: ssh.user.clone(),
        host: target_host(target)?.to_string(),
        port: ssh.port.map(i64::from),
        password: ssh.password.clone(),
        private_key: ssh.private_key.clone(),
    })
}

/// Host to probe or halt.
pub fn target_host(target: &TargetConfig) -> Result<&str, String> {
    target
        .host
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| format!("Target '{}' has no host", target.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
remote:
  - id: home
    host: http://10.0.0.2:8080/
    auth_token: secret
    targets:
      - id: nas
        host: nas.local
        mac: "AA:BB:CC:DD:EE:FF"
        ssh:
          user: operator
          port: 2222
          private_key:
            path: id_ed25519
            passphrase: hunter2
        broadcast_address:
          - ip: 192.168.1.255
            port: 9
      - id: bare
        mac: ""
  - id: open
    host: http://10.0.0.3:8080
    targets: []
"#;

    fn inventory() -> Inventory {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, INVENTORY).unwrap();
        Inventory::from_file(&path).unwrap()
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "homectl-remote",
            "--remote",
            "home",
            "--target",
            "nas",
            "status-stream",
        ])
        .unwrap();
        assert_eq!(cli.remote, "home");
        assert_eq!(cli.command, "status-stream");
        assert!(cli.inventory.is_none());
    }

    #[test]
    fn test_resolve_remote_and_target() {
        let inv = inventory();
        let resolved = resolve_in(&inv, Command::Status, "home", "nas").unwrap();
        assert_eq!(resolved.base_url, "http://10.0.0.2:8080/");
        assert_eq!(resolved.auth_token.as_deref(), Some("secret"));
        assert_eq!(resolved.target.id, "nas");

        let open = resolve_in(&inv, Command::Status, "open", "nas").unwrap_err();
        assert_eq!(open, "Target 'nas' not found on remote 'open'");
        let missing = resolve_in(&inv, Command::Wake, "office", "nas").unwrap_err();
        assert_eq!(missing, "Remote 'office' not found");
    }

    #[test]
    fn test_payloads_from_target() {
        let inv = inventory();
        let nas = inv.remote("home").unwrap().target("nas").unwrap();

        let wake = wake_payload(nas).unwrap();
        assert_eq!(wake.mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(wake.addresses.len(), 1);

        let halt = halt_payload(nas).unwrap();
        assert_eq!(halt.user, "operator");
        assert_eq!(halt.host, "nas.local");
        assert_eq!(halt.port, Some(2222));
        assert_eq!(halt.private_key.unwrap().passphrase.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let inv = inventory();
        let bare = inv.remote("home").unwrap().target("bare").unwrap();
        assert_eq!(wake_payload(bare).unwrap_err(), "Target 'bare' has no mac");
        assert_eq!(halt_payload(bare).unwrap_err(), "Target 'bare' has no ssh settings");
        assert_eq!(target_host(bare).unwrap_err(), "Target 'bare' has no host");
    }
}
