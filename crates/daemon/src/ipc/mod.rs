//! Unix Domain Socket transport between clients and the daemon.
//!
//! ## Protocol
//!
//! One request per connection. The client sends a single line of
//! whitespace-separated tokens; the daemon answers with either the literal
//! payload (attribute contents, drained messages) or a decimal status code
//! (`0` or a negative errno), without a trailing newline, and closes the
//! connection.
//!
//! ```text
//! client                         daemon
//!   | ---- "STATE_0\n" ----------> |
//!   | <--- "running\n" ----------- |
//!   |            (close)           |
//! ```
//!
//! ## Example
//!
//! ### Server (Daemon) Side
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prussd::{Config, Dispatcher};
//! use prussd::ipc::PrussServer;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = Config::load_default();
//!     let server = PrussServer::bind(&config.daemon.socket_path).await?;
//!     server.serve(Arc::new(Dispatcher::new(&config))).await
//! }
//! ```
//!
//! ### Client Side
//!
//! ```rust,no_run
//! use prussd::ipc::{default_socket_path, PrussClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pruss = PrussClient::new(default_socket_path());
//!     pruss.boot_up().await?;
//!
//!     let pru0 = pruss.pru(0);
//!     pru0.load("/lib/firmware/am335x-pru0-fw").await?;
//!     pru0.enable().await?;
//!     println!("{:?}", pru0.state().await?);
//!     Ok(())
//! }
//! ```

mod client;
mod server;

pub use client::{ClientError, Pru, PrussClient};
pub use server::{IpcError, PrussConnection, PrussServer};

use std::path::PathBuf;

/// Socket path used when none is configured.
pub fn default_socket_path() -> PathBuf {
    PathBuf::from(prussd_protocol::DEFAULT_SOCKET_PATH)
}
