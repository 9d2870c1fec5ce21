//! Fire-and-forget remote commands over SSH.
//!
//! [`SshExecutor::run`] dials, verifies the host key, authenticates with the
//! resolved methods in order, opens one session channel and executes one
//! command. The command's output and exit status are discarded: for `halt` the
//! host is expected to drop the connection, so there is nothing to report.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::address::validate_host;
use crate::config::SshConfig;
use crate::error::{ActionError, HostKeyProblem};
use crate::ssh::auth::{AuthMethod, Credential, KnownHosts, PassphrasePrompt, SshAuthResolver};

/// Port used when a target does not specify one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Where and as whom to run a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub credential: Credential,
}

impl RemoteHost {
    pub fn new(
        user: impl Into<String>,
        host: impl Into<String>,
        port: Option<u16>,
        credential: Credential,
    ) -> Result<Self, ActionError> {
        let user = user.into();
        let host = host.into();
        if user.is_empty() {
            return Err(ActionError::validation("user must not be empty"));
        }
        validate_host(&host)?;
        Ok(Self {
            user,
            host,
            port: port.unwrap_or(DEFAULT_SSH_PORT),
            credential,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The power-off command for `user`. Everyone but `root` goes through `sudo`.
pub fn halt_command(user: &str) -> &'static str {
    if user == "root" {
        "halt -p"
    } else {
        "sudo halt -p"
    }
}

/// Runs a single command on a remote host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(
        &self,
        remote: &RemoteHost,
        command: &str,
        prompt: Option<Arc<PassphrasePrompt>>,
    ) -> Result<(), ActionError>;
}

/// [`RemoteExecutor`] speaking SSH through `russh`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    resolver: SshAuthResolver,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshExecutor {
    pub fn new(resolver: SshAuthResolver, config: &SshConfig) -> Self {
        Self {
            resolver,
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        remote: &RemoteHost,
        command: &str,
        prompt: Option<Arc<PassphrasePrompt>>,
    ) -> Result<(), ActionError> {
        let addr = remote.addr();
        // Key decryption and the prompt happen before any network traffic.
        // Both block, so they run off the async workers.
        let resolver = self.resolver.clone();
        let credential = remote.credential.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            resolver.resolve(&credential, prompt.as_deref())
        })
        .await
        .map_err(|e| ActionError::Dial {
            addr: addr.clone(),
            reason: format!("credential task failed: {e}"),
        })??;

        let mut handle = connect(remote, resolved.verifier, self.connect_timeout).await?;
        let outcome = authenticate_and_exec(
            &mut handle,
            remote,
            &resolved.methods,
            command,
            self.command_timeout,
        )
        .await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect from {addr}: {e}");
        }
        outcome
    }
}

/// Failures raised while the SSH transport is being established.
#[derive(Debug)]
enum HandshakeError {
    Ssh(russh::Error),
    HostKey(HostKeyProblem),
}

impl From<russh::Error> for HandshakeError {
    fn from(e: russh::Error) -> Self {
        Self::Ssh(e)
    }
}

/// Client handler that only accepts host keys already in `known_hosts`.
struct VerifyingHandler {
    verifier: KnownHosts,
    host: String,
    port: u16,
}

impl client::Handler for VerifyingHandler {
    type Error = HandshakeError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        self.verifier
            .verify(&self.host, self.port, server_public_key)
            .map(|()| true)
            .map_err(HandshakeError::HostKey)
    }
}

async fn connect(
    remote: &RemoteHost,
    verifier: KnownHosts,
    timeout: Duration,
) -> Result<Handle<VerifyingHandler>, ActionError> {
    let addr = remote.addr();
    let dial_err = |reason: String| ActionError::Dial {
        addr: addr.clone(),
        reason,
    };

    let stream = tokio::time::timeout(timeout, TcpStream::connect((remote.host.as_str(), remote.port)))
        .await
        .map_err(|_| dial_err(format!("connect timed out after {}ms", timeout.as_millis())))?
        .map_err(|e| dial_err(e.to_string()))?;

    let handler = VerifyingHandler {
        verifier,
        host: remote.host.clone(),
        port: remote.port,
    };
    let config = Arc::new(client::Config {
        inactivity_timeout: Some(timeout),
        ..Default::default()
    });

    match tokio::time::timeout(timeout, client::connect_stream(config, stream, handler)).await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(HandshakeError::HostKey(problem))) => Err(problem.into()),
        Ok(Err(HandshakeError::Ssh(e))) => Err(dial_err(format!("SSH handshake failed: {e}"))),
        Err(_) => Err(dial_err(format!(
            "SSH handshake timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

async fn authenticate_and_exec(
    handle: &mut Handle<VerifyingHandler>,
    remote: &RemoteHost,
    methods: &[AuthMethod],
    command: &str,
    command_timeout: Duration,
) -> Result<(), ActionError> {
    let addr = remote.addr();

    let mut accepted = false;
    for method in methods {
        let result = match method {
            AuthMethod::PublicKey(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
                handle
                    .authenticate_publickey(
                        &remote.user,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await
            }
            AuthMethod::Password(password) => {
                handle.authenticate_password(&remote.user, password).await
            }
        };
        match result {
            Ok(AuthResult::Success) => {
                accepted = true;
                break;
            }
            Ok(AuthResult::Failure { .. }) => {
                debug!("SSH {} auth rejected by {addr}", method.kind());
            }
            Err(e) => {
                return Err(ActionError::Dial {
                    addr,
                    reason: format!("connection lost during authentication: {e}"),
                })
            }
        }
    }
    if !accepted {
        return Err(ActionError::AuthRejected {
            addr,
            user: remote.user.clone(),
        });
    }

    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| ActionError::Session {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

    info!("Running '{command}' on {}@{addr}", remote.user);
    if let Err(e) = channel.exec(true, command).await {
        debug!("SSH exec on {addr} failed: {e}");
        return Ok(());
    }

    // Drain until the command finishes, the host goes away, or we give up.
    let drained = tokio::time::timeout(command_timeout, async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExitStatus { exit_status } => {
                    debug!("'{command}' on {addr} exited with {exit_status}");
                }
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!("'{command}' on {addr} still running after {}ms", command_timeout.as_millis());
    }
    let _ = channel.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Password;

    fn password() -> Credential {
        Credential::Password(Password::new("pw").unwrap())
    }

    #[test]
    fn test_halt_command_uses_sudo_for_non_root() {
        assert_eq!(halt_command("operator"), "sudo halt -p");
        assert_eq!(halt_command("root"), "halt -p");
        assert_eq!(halt_command("Root"), "sudo halt -p");
    }

    #[test]
    fn test_remote_host_defaults_port() {
        let remote = RemoteHost::new("op", "nas.local", None, password()).unwrap();
        assert_eq!(remote.port, 22);
        assert_eq!(remote.addr(), "nas.local:22");
        let remote = RemoteHost::new("op", "10.0.0.5", Some(2222), password()).unwrap();
        assert_eq!(remote.addr(), "10.0.0.5:2222");
    }

    #[test]
    fn test_remote_host_validation() {
        assert!(RemoteHost::new("", "nas.local", None, password()).is_err());
        assert!(RemoteHost::new("op", "", None, password()).is_err());
        assert!(RemoteHost::new("op", "bad host", None, password()).is_err());
    }

    #[tokio::test]
    async fn test_dial_failure_is_reported_as_dial_error() {
        let home = tempfile::tempdir().unwrap();
        let executor = SshExecutor::new(
            SshAuthResolver::new(home.path().join(".ssh")),
            &SshConfig {
                connect_timeout_ms: 2000,
                ..SshConfig::default()
            },
        );
        // Bind then drop a listener so the port is very likely closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let remote = RemoteHost::new("op", "127.0.0.1", Some(port), password()).unwrap();
        let err = executor.run(&remote, "true", None).await.unwrap_err();
        assert!(matches!(err, ActionError::Dial { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_passphrase_prompt_does_not_block_runtime() {
        let home = tempfile::tempdir().unwrap();
        let ssh_dir = home.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        crate::ssh::auth::tests::write_key(&ssh_dir, "lab", Some("secret"));
        let executor = SshExecutor::new(
            SshAuthResolver::new(&ssh_dir),
            &SshConfig {
                connect_timeout_ms: 2000,
                ..SshConfig::default()
            },
        );

        // Ticks only while the single runtime thread is free.
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
        };
        tokio::task::yield_now().await;

        let ticked_during_prompt = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let prompt: Arc<PassphrasePrompt> = {
            let ticks = ticks.clone();
            let ticked = ticked_during_prompt.clone();
            Arc::new(move || {
                let before = ticks.load(std::sync::atomic::Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                let after = ticks.load(std::sync::atomic::Ordering::SeqCst);
                ticked.store(after > before, std::sync::atomic::Ordering::SeqCst);
                Some("secret".to_string())
            })
        };

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let cred = Credential::PrivateKey(crate::ssh::auth::KeyFile {
            path: "lab".into(),
            passphrase: None,
        });
        let remote = RemoteHost::new("op", "127.0.0.1", Some(port), cred).unwrap();
        let err = executor.run(&remote, "true", Some(prompt)).await.unwrap_err();
        ticker.abort();

        // The key decrypted, so the failure comes from dialing.
        assert!(matches!(err, ActionError::Dial { .. }), "got {err:?}");
        assert!(ticked_during_prompt.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_auth_resolution_happens_before_dial() {
        let home = tempfile::tempdir().unwrap();
        let executor = SshExecutor::new(
            SshAuthResolver::new(home.path().join(".ssh")),
            &SshConfig::default(),
        );
        let cred = Credential::PrivateKey(crate::ssh::auth::KeyFile {
            path: "missing".into(),
            passphrase: None,
        });
        // 192.0.2.0/24 is TEST-NET-1; a dial would hang until timeout.
        let remote = RemoteHost::new("op", "192.0.2.1", None, cred).unwrap();
        let err = executor.run(&remote, "true", None).await.unwrap_err();
        assert!(matches!(err, ActionError::AuthResolution(_)), "got {err:?}");
    }
}
