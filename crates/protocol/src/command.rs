//! Request commands.
//!
//! A request is one line of whitespace-separated tokens. The first token names
//! the command and the rest are its arguments. [`Command::parse`] turns a line
//! into a typed [`Command`], rejecting unknown names and bad arity up front, and
//! the [`Display`](fmt::Display) impl renders a command back into its line form
//! for clients.

use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorCode, Result};

/// Index of a PRU instance (0 and 1 on the reference board).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitIndex(pub u32);

impl UnitIndex {
    /// Parse the numeric suffix of a per-unit command name.
    ///
    /// Only the canonical decimal form is accepted: plain ASCII digits with no
    /// sign, whitespace or leading zero (`0` itself excepted).
    fn parse_suffix(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ErrorCode::InvalidArgument);
        }
        if s.len() > 1 && s.starts_with('0') {
            return Err(ErrorCode::InvalidArgument);
        }
        s.parse()
            .map(UnitIndex)
            .map_err(|_| ErrorCode::InvalidArgument)
    }
}

impl fmt::Display for UnitIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An rpmsg channel endpoint: a channel name plus a port number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    /// Channel name, checked against the daemon's allow-list.
    pub name: String,
    /// Port number appended to the name to form the device node.
    pub port: u32,
}

impl ChannelAddress {
    /// Create a new channel address.
    pub fn new(name: impl Into<String>, port: u32) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// The device node file name, e.g. `rpmsg_pru30`.
    pub fn node_name(&self) -> String {
        format!("{}{}", self.name, self.port)
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load the remoteproc driver module.
    ProbeRproc,
    /// Unload the remoteproc driver module.
    UnprobeRproc,
    /// Start a unit.
    Enable(UnitIndex),
    /// Stop a unit.
    Disable(UnitIndex),
    /// Put a unit into single-step mode.
    Pause(UnitIndex),
    /// Take a unit out of single-step mode.
    Resume(UnitIndex),
    /// Read a unit's remoteproc state.
    State(UnitIndex),
    /// Read a unit's register dump.
    GetRegs(UnitIndex),
    /// Stage a firmware image and point the unit at it.
    Load {
        /// Target unit.
        unit: UnitIndex,
        /// Path to the firmware image on the daemon's filesystem.
        path: String,
    },
    /// Drain pending messages from a channel without blocking.
    GetMsg(ChannelAddress),
    /// Write one message to a channel.
    SendMsg {
        /// Target channel.
        channel: ChannelAddress,
        /// Message words, joined with single spaces on the wire.
        message: Vec<String>,
    },
    /// Wait for a channel to become readable.
    EventWait {
        /// Watched channel.
        channel: ChannelAddress,
        /// Timeout in seconds; `None` waits forever.
        timeout: Option<u64>,
    },
}

impl Command {
    /// Parse one request line.
    ///
    /// Empty lines, unknown command names, wrong argument counts and
    /// non-numeric index/port/timeout values all yield
    /// [`ErrorCode::InvalidArgument`].
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(ErrorCode::InvalidArgument)?;
        let args: Vec<&str> = tokens.collect();

        match name {
            "PROBE_RPROC" => no_args(&args, Command::ProbeRproc),
            "UNPROBE_RPROC" => no_args(&args, Command::UnprobeRproc),
            "GETMSG" => match args.as_slice() {
                [name, port] => Ok(Command::GetMsg(channel(name, port)?)),
                _ => Err(ErrorCode::InvalidArgument),
            },
            "SENDMSG" => match args.as_slice() {
                [name, port, message @ ..] if !message.is_empty() => Ok(Command::SendMsg {
                    channel: channel(name, port)?,
                    message: message.iter().map(|word| word.to_string()).collect(),
                }),
                _ => Err(ErrorCode::InvalidArgument),
            },
            "EVENTWAIT" => match args.as_slice() {
                [name, port] => Ok(Command::EventWait {
                    channel: channel(name, port)?,
                    timeout: None,
                }),
                [name, port, timeout] => Ok(Command::EventWait {
                    channel: channel(name, port)?,
                    timeout: Some(number(timeout)?),
                }),
                _ => Err(ErrorCode::InvalidArgument),
            },
            _ => Self::parse_unit_command(name, &args),
        }
    }

    fn parse_unit_command(name: &str, args: &[&str]) -> Result<Self> {
        let (verb, suffix) = name.rsplit_once('_').ok_or(ErrorCode::InvalidArgument)?;
        let unit = UnitIndex::parse_suffix(suffix)?;

        match verb {
            "ENABLE" => no_args(args, Command::Enable(unit)),
            "DISABLE" => no_args(args, Command::Disable(unit)),
            "PAUSE" => no_args(args, Command::Pause(unit)),
            "RESUME" => no_args(args, Command::Resume(unit)),
            "STATE" => no_args(args, Command::State(unit)),
            "GETREGS" => no_args(args, Command::GetRegs(unit)),
            "LOAD" => match args {
                [path] => Ok(Command::Load {
                    unit,
                    path: path.to_string(),
                }),
                _ => Err(ErrorCode::InvalidArgument),
            },
            _ => Err(ErrorCode::InvalidArgument),
        }
    }

    /// The command name as it appears on the wire.
    pub fn name(&self) -> String {
        match self {
            Command::ProbeRproc => "PROBE_RPROC".to_string(),
            Command::UnprobeRproc => "UNPROBE_RPROC".to_string(),
            Command::Enable(unit) => format!("ENABLE_{unit}"),
            Command::Disable(unit) => format!("DISABLE_{unit}"),
            Command::Pause(unit) => format!("PAUSE_{unit}"),
            Command::Resume(unit) => format!("RESUME_{unit}"),
            Command::State(unit) => format!("STATE_{unit}"),
            Command::GetRegs(unit) => format!("GETREGS_{unit}"),
            Command::Load { unit, .. } => format!("LOAD_{unit}"),
            Command::GetMsg(_) => "GETMSG".to_string(),
            Command::SendMsg { .. } => "SENDMSG".to_string(),
            Command::EventWait { .. } => "EVENTWAIT".to_string(),
        }
    }

    /// The channel this command addresses, if any.
    pub fn channel(&self) -> Option<&ChannelAddress> {
        match self {
            Command::GetMsg(channel)
            | Command::SendMsg { channel, .. }
            | Command::EventWait { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

impl FromStr for Command {
    type Err = ErrorCode;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())?;
        match self {
            Command::Load { path, .. } => write!(f, " {path}"),
            Command::GetMsg(channel) => write!(f, " {} {}", channel.name, channel.port),
            Command::SendMsg { channel, message } => {
                write!(f, " {} {} {}", channel.name, channel.port, message.join(" "))
            }
            Command::EventWait { channel, timeout } => {
                write!(f, " {} {}", channel.name, channel.port)?;
                if let Some(timeout) = timeout {
                    write!(f, " {timeout}")?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn no_args(args: &[&str], command: Command) -> Result<Command> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(ErrorCode::InvalidArgument)
    }
}

fn number<T: FromStr>(token: &str) -> Result<T> {
    token.parse().map_err(|_| ErrorCode::InvalidArgument)
}

fn channel(name: &str, port: &str) -> Result<ChannelAddress> {
    Ok(ChannelAddress::new(name, number(port)?))
}
