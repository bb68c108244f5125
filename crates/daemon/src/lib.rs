//! # prussd Daemon Library
//!
//! This crate provides the privilege broker for the PRU subsystem: a root
//! daemon that performs remoteproc and rpmsg operations on behalf of
//! unprivileged local clients.
//!
//! ## Overview
//!
//! The daemon listens on a world-accessible Unix socket. Each connection
//! carries one textual command, which is validated, executed against the
//! kernel interfaces and answered with either a payload or a status code:
//!
//! - **Lifecycle**: start/stop a PRU, single-step pause/resume
//! - **Inspection**: remoteproc state, register dump
//! - **Firmware**: stage a trusted image and point a PRU at it
//! - **Messaging**: drain, write and wait on allow-listed rpmsg channels
//! - **Driver**: attach/detach the remoteproc kernel module
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    PrussServer (ipc)                     │
//! │              one task per client connection              │
//! ├──────────────────────────────────────────────────────────┤
//! │                   Dispatcher (dispatch)                  │
//! ├──────────────┬───────────────┬─────────────┬─────────────┤
//! │ Remoteproc   │  Firmware     │  Channels   │  Module     │
//! │ Paths        │  Loader       │  (rpmsg)    │  Manager    │
//! │ (sysfs)      │  (firmware)   │  (channel)  │  (module)   │
//! └──────────────┴───────────────┴─────────────┴─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prussd::{Config, Dispatcher};
//! use prussd::ipc::PrussServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default();
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let server = PrussServer::bind(&config.daemon.socket_path).await?;
//!     server.serve(Arc::new(Dispatcher::new(&config))).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration file, defaults and validation
//! - [`sysfs`]: remoteproc attribute access
//! - [`firmware`]: Firmware containment and staging
//! - [`channel`]: rpmsg channel I/O and event waits
//! - [`module`]: Driver module attach/detach
//! - [`dispatch`]: Command execution
//! - [`ipc`]: Socket server and client library

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod firmware;
pub mod ipc;
pub mod module;
pub mod sysfs;

// Re-export protocol for convenience
pub use prussd_protocol as protocol;

pub use channel::Channels;
pub use config::{Config, ConfigError};
pub use dispatch::Dispatcher;
pub use firmware::FirmwareLoader;
pub use ipc::{ClientError, Pru, PrussClient, PrussServer};
pub use module::ModuleManager;
pub use sysfs::{Attribute, RemoteprocPaths};
