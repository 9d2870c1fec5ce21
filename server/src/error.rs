//! Error taxonomy shared by every host action.
//!
//! Each variant maps to one HTTP status and one stable `code` string so the
//! transport adapters never have to inspect messages.

use axum::http::StatusCode;
use thiserror::Error;

/// Why an SSH credential could not be turned into an auth method.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The private key is encrypted and no passphrase source was available.
    #[error("private key {0} is passphrase-protected and no passphrase was supplied")]
    PassphraseRequired(String),
    /// A passphrase was supplied but did not decrypt the key.
    #[error("passphrase does not decrypt private key {0}")]
    BadPassphrase(String),
    /// The key file could not be read or parsed.
    #[error("private key {path} is unreadable: {reason}")]
    KeyUnreadable { path: String, reason: String },
    /// Neither a usable private key nor a password was provided.
    #[error("no usable credential: specify a password or a private key")]
    NoCredential,
}

/// How a server's host key failed verification against `known_hosts`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostKeyProblem {
    #[error("host key for {host}:{port} is not in {known_hosts}")]
    Unknown {
        host: String,
        port: u16,
        known_hosts: String,
    },
    #[error("host key for {host}:{port} does not match {known_hosts} line {line}")]
    Changed {
        host: String,
        port: u16,
        known_hosts: String,
        line: usize,
    },
    #[error("cannot use known_hosts store: {0}")]
    Store(String),
}

/// Errors surfaced by the action layer to HTTP handlers and the CLI.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    AuthResolution(#[from] AuthError),
    #[error("could not reach {addr}: {reason}")]
    Dial { addr: String, reason: String },
    #[error(transparent)]
    HostKey(#[from] HostKeyProblem),
    #[error("authentication rejected by {addr} for user {user}")]
    AuthRejected { addr: String, user: String },
    #[error("connected to {addr} but could not open a session: {reason}")]
    Session { addr: String, reason: String },
    #[error("cannot start probe for {host}: {reason}")]
    ProbeConstruction { host: String, reason: String },
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

impl ActionError {
    /// Shorthand for [`ActionError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code returned in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_REQUEST",
            Self::AuthResolution(AuthError::PassphraseRequired(_)) => "PASSPHRASE_REQUIRED",
            Self::AuthResolution(AuthError::BadPassphrase(_)) => "BAD_PASSPHRASE",
            Self::AuthResolution(AuthError::KeyUnreadable { .. }) => "KEY_UNREADABLE",
            Self::AuthResolution(AuthError::NoCredential) => "NO_CREDENTIAL",
            Self::Dial { .. } => "DIAL_FAILED",
            Self::HostKey(_) => "HOST_KEY_REJECTED",
            Self::AuthRejected { .. } => "AUTH_REJECTED",
            Self::Session { .. } => "SESSION_FAILED",
            Self::ProbeConstruction { .. } => "PROBE_FAILED",
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
        }
    }

    /// HTTP status used when this error crosses the API boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AuthResolution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Dial { .. }
            | Self::HostKey(_)
            | Self::AuthRejected { .. }
            | Self::Session { .. } => StatusCode::BAD_GATEWAY,
            Self::ProbeConstruction { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnknownCommand(_) => StatusCode::NOT_FOUND,
        }
    }
}
