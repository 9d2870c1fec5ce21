//! Command dispatch shared by the HTTP API, the WebSocket stream and the CLI.
//!
//! Callers hand a [`Command`] and a [`Target`] to [`Dispatcher::dispatch`], or
//! call the typed helpers directly when they already hold validated values.

use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::address::{validate_host, BroadcastTarget, HardwareAddress};
use crate::config::{Config, ProbeConfig, WakeConfig};
use crate::error::ActionError;
use crate::probe::{self, IcmpPinger, ObserveOptions, Pinger};
use crate::ssh::{halt_command, PassphrasePrompt, RemoteExecutor, RemoteHost, SshAuthResolver, SshExecutor};
use crate::wake::{self, PacketSender, UdpPacketSender, WakeRequest};

/// Buffered status updates per stream. When the consumer falls behind,
/// further ticks are dropped until it catches up.
const STREAM_BUFFER: usize = 16;

/// A logical host action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Wake,
    Halt,
    Status,
    StatusStream,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wake => "wake",
            Self::Halt => "halt",
            Self::Status => "status",
            Self::StatusStream => "status-stream",
        }
    }
}

impl FromStr for Command {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wake" => Ok(Self::Wake),
            "halt" => Ok(Self::Halt),
            "status" => Ok(Self::Status),
            "status-stream" => Ok(Self::StatusStream),
            other => Err(ActionError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one host. Each command uses the fields it needs.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub mac: Option<HardwareAddress>,
    pub broadcast: Vec<BroadcastTarget>,
    pub host: Option<String>,
    pub ssh: Option<RemoteHost>,
}

/// Result of a dispatched command.
#[derive(Debug)]
pub enum Outcome {
    Woke { delivered: usize },
    Halted,
    Status { online: bool },
    Stream(StatusStream),
}

/// Handle on a running continuous probe. Dropping it cancels the probe.
#[derive(Debug)]
pub struct StatusStream {
    host: String,
    updates: mpsc::Receiver<bool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), ActionError>>>,
}

impl StatusStream {
    /// Next tick's online flag. `None` once the probe has stopped.
    pub async fn next(&mut self) -> Option<bool> {
        self.updates.recv().await
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Token that stops the probe when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the probe and wait for it, returning why it ended if it failed.
    pub async fn finish(mut self) -> Result<(), ActionError> {
        self.cancel.cancel();
        self.updates.close();
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                Err(ActionError::ProbeConstruction {
                    host: self.host.clone(),
                    reason: format!("probe task failed: {e}"),
                })
            }),
            None => Ok(()),
        }
    }
}

impl Drop for StatusStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Routes commands to the wake, SSH and probe primitives.
#[derive(Clone)]
pub struct Dispatcher {
    sender: Arc<dyn PacketSender>,
    pinger: Arc<dyn Pinger>,
    executor: Arc<dyn RemoteExecutor>,
    wake: WakeConfig,
    probe: ProbeConfig,
    prompt: Option<Arc<PassphrasePrompt>>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn PacketSender>,
        pinger: Arc<dyn Pinger>,
        executor: Arc<dyn RemoteExecutor>,
        config: &Config,
    ) -> Self {
        Self {
            sender,
            pinger,
            executor,
            wake: config.wake.clone(),
            probe: config.probe.clone(),
            prompt: None,
        }
    }

    /// Dispatcher backed by real UDP, ICMP and SSH for the current user.
    pub fn system(config: &Config) -> Result<Self, ActionError> {
        let resolver = SshAuthResolver::for_current_user(config.ssh.known_hosts.as_deref())?;
        Ok(Self::new(
            Arc::new(UdpPacketSender),
            Arc::new(IcmpPinger),
            Arc::new(SshExecutor::new(resolver, &config.ssh)),
            config,
        ))
    }

    /// Ask `prompt` for a passphrase when an encrypted key has none configured.
    #[must_use]
    pub fn with_passphrase_prompt(mut self, prompt: Arc<PassphrasePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Run `command` against `target`. Missing fields fail before any I/O.
    pub async fn dispatch(&self, command: Command, target: &Target) -> Result<Outcome, ActionError> {
        debug!("Dispatching {command}");
        match command {
            Command::Wake => {
                let mac = target
                    .mac
                    .ok_or_else(|| ActionError::validation("wake requires a MAC address"))?;
                let request = WakeRequest {
                    mac,
                    targets: target.broadcast.clone(),
                };
                let delivered = self.wake(&request).await;
                Ok(Outcome::Woke { delivered })
            }
            Command::Halt => {
                let remote = target
                    .ssh
                    .as_ref()
                    .ok_or_else(|| ActionError::validation("halt requires SSH settings"))?;
                self.halt(remote).await?;
                Ok(Outcome::Halted)
            }
            Command::Status => {
                let online = self.status(required_host(target)?).await?;
                Ok(Outcome::Status { online })
            }
            Command::StatusStream => Ok(Outcome::Stream(self.status_stream(required_host(target)?)?)),
        }
    }

    /// Send the magic packet. Returns how many destinations accepted it.
    pub async fn wake(&self, request: &WakeRequest) -> usize {
        let delivered = wake::send(request, &self.wake, self.sender.as_ref()).await;
        info!("Magic packet for {} handed to {delivered} destination(s)", request.mac);
        delivered
    }

    /// Power off `remote` over SSH.
    pub async fn halt(&self, remote: &RemoteHost) -> Result<(), ActionError> {
        let command = halt_command(&remote.user);
        self.executor
            .run(remote, command, self.prompt.clone())
            .await?;
        info!("Halt sent to {}", remote.addr());
        Ok(())
    }

    /// One-shot liveness check.
    pub async fn status(&self, host: &str) -> Result<bool, ActionError> {
        probe::check_online(
            Arc::clone(&self.pinger),
            host,
            self.probe.status_timeout(),
            ObserveOptions::from(&self.probe).echo_interval,
        )
        .await
    }

    /// Start a continuous probe of `host`. Must be called within a tokio runtime.
    pub fn status_stream(&self, host: &str) -> Result<StatusStream, ActionError> {
        validate_host(host)?;
        let (tx, updates) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        let pinger = Arc::clone(&self.pinger);
        let options = ObserveOptions::from(&self.probe);
        let task_host = host.to_string();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let on_update = move |online: bool| match tx.try_send(online) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => ControlFlow::Continue(()),
                Err(mpsc::error::TrySendError::Closed(_)) => ControlFlow::Break(()),
            };
            probe::observe(pinger, &task_host, options, on_update, token).await
        });

        Ok(StatusStream {
            host: host.to_string(),
            updates,
            cancel,
            task: Some(task),
        })
    }
}

fn required_host(target: &Target) -> Result<&str, ActionError> {
    target
        .host
        .as_deref()
        .ok_or_else(|| ActionError::validation("a host is required"))
}
