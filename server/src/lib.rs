#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! homectl library: host actions shared by the server and both CLIs.
//!
//! - `wake`: Wake-on-LAN magic packets
//! - `ssh`: credential resolution, host-key checks, remote commands
//! - `probe`: ICMP liveness checks and continuous observation
//! - `dispatch`: command routing used by every entry point
//! - `inventory`: YAML target inventory for the CLIs
//! - `routes` / `ws`: HTTP and WebSocket API
//! - `auth`: API key authentication middleware
//! - `config`: server configuration loading
//! - `tls`: HTTPS listener

pub mod address;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inventory;
pub mod probe;
pub mod routes;
pub mod ssh;
pub mod state;
pub mod terminal;
pub mod tls;
pub mod util;
pub mod wake;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use dispatch::{Command, Dispatcher, Outcome, StatusStream, Target};
pub use error::ActionError;
pub use inventory::Inventory;
pub use state::AppState;
