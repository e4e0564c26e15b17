//! Warden daemon assembly.
//!
//! Turns a loaded [`warden_config::Config`] into a running gate: the rule
//! store and audit log on disk, the policy evaluator, and the gate and
//! supervisor sockets. The `warden` binary is a thin layer over this crate.
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use warden_config::Config;
//! use warden_core::WardenHome;
//! use warden_daemon::Daemon;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let home = WardenHome::resolve()?;
//! let config = Config::load(None)?.config;
//! let shutdown = CancellationToken::new();
//! let running = Daemon::build(&config, &home)?.start(shutdown.clone())?;
//!
//! tokio::signal::ctrl_c().await?;
//! shutdown.cancel();
//! running.stopped().await
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config_bridge;
mod daemon;

pub use config_bridge::RuntimePaths;
pub use daemon::{Daemon, RULE_MAINTENANCE_INTERVAL, RunningDaemon};
