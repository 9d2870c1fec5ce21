//! Remote command execution over SSH.
//!
//! - `auth`: credential resolution, private-key decryption, `known_hosts`
//! - `remote`: dialing, authenticating and running one command

pub mod auth;
pub mod remote;

pub use auth::{AuthMethod, Credential, KeyFile, KnownHosts, PassphrasePrompt, PromptRef, SshAuthResolver};
pub use remote::{halt_command, RemoteExecutor, RemoteHost, SshExecutor, DEFAULT_SSH_PORT};
