//! # prussd Protocol Library
//!
//! Wire-level types shared by the `prussd` daemon and its clients.
//!
//! ## Overview
//!
//! Clients talk to the daemon over a local stream socket, one request per
//! connection:
//!
//! ```text
//! client                                   daemon
//!   │  "SENDMSG rpmsg_pru 30 hello\n"  ──►   │  parse → dispatch
//!   │  ◄──  "0"                              │  close
//! ```
//!
//! - **Commands**: [`Command`] parses and renders request lines
//! - **Responses**: [`Response`] renders and interprets replies
//! - **Errors**: [`ErrorCode`] maps failures onto negative errno values
//!
//! ## Example
//!
//! ```rust
//! use prussd_protocol::{Command, ErrorCode, Response, UnitIndex};
//!
//! let command: Command = "ENABLE_0".parse().unwrap();
//! assert_eq!(command, Command::Enable(UnitIndex(0)));
//!
//! assert_eq!(Command::parse("FOO"), Err(ErrorCode::InvalidArgument));
//! assert_eq!(Response::Error(ErrorCode::NotFound).to_string(), "-2");
//! ```

pub mod command;
pub mod error;
pub mod response;

pub use command::{ChannelAddress, Command, UnitIndex};
pub use error::{ErrorCode, Result};
pub use response::{Response, RprocState, NO_MESSAGE};

/// Default path of the daemon's socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/prussd.sock";

/// Upper bound on the length of a request line, not counting the newline.
pub const MAX_REQUEST_LEN: usize = 4096;
