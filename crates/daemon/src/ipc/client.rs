//! Client library for talking to the daemon.
//!
//! [`PrussClient`] covers the subsystem as a whole (driver attach/detach) and
//! hands out [`Pru`] handles for per-unit control and messaging. Every call
//! opens a fresh connection, sends one request line and reads the response
//! until the daemon closes the connection.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use prussd_protocol::{ChannelAddress, Command, ErrorCode, Response, RprocState, UnitIndex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default rpmsg channel name used by PRU firmware.
const DEFAULT_CHANNEL: &str = "rpmsg_pru";

/// Port of PRU 0's default channel; PRU 1 uses the next one.
const DEFAULT_CHANNEL_PORT: u32 = 30;

/// Errors returned by the client library.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An I/O error occurred talking to the socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The daemon answered with an error code.
    #[error("daemon returned error: {0}")]
    Daemon(ErrorCode),

    /// The daemon did not answer within the timeout.
    #[error("request timed out")]
    Timeout,

    /// The daemon closed the connection without answering.
    #[error("daemon closed connection without a response")]
    Closed,

    /// The daemon answered with a payload where none was expected.
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// The daemon error code, if the daemon rejected the request.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Daemon(code) => Some(*code),
            _ => None,
        }
    }
}

/// A client for the daemon socket.
#[derive(Debug, Clone)]
pub struct PrussClient {
    socket_path: PathBuf,
    timeout: Option<Duration>,
}

impl PrussClient {
    /// Create a client for the socket at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    /// Set the per-request timeout; `None` disables it.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Path of the daemon socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one command and wait for its response.
    ///
    /// An event wait is allowed its own timeout on top of the client's, and an
    /// indefinite event wait is never timed out by the client.
    pub async fn request(&self, command: &Command) -> Result<Response, ClientError> {
        let timeout = match command {
            Command::EventWait { timeout: None, .. } => None,
            Command::EventWait {
                timeout: Some(secs),
                ..
            } => self
                .timeout
                .map(|t| t.saturating_add(Duration::from_secs(*secs))),
            _ => self.timeout,
        };

        let line = command.to_string();
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(&line))
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => self.exchange(&line).await,
        }
    }

    /// Send a raw request line and wait for its response.
    pub async fn request_line(&self, line: &str) -> Result<Response, ClientError> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(line))
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => self.exchange(line).await,
        }
    }

    async fn exchange(&self, line: &str) -> Result<Response, ClientError> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let mut request = line.to_string();
        request.push('\n');
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await?;
        if raw.is_empty() {
            return Err(ClientError::Closed);
        }

        Ok(Response::parse(&raw))
    }

    /// Send a command that answers with a status code.
    async fn status(&self, command: Command) -> Result<(), ClientError> {
        match self.request(&command).await? {
            Response::Done => Ok(()),
            Response::Error(code) => Err(ClientError::Daemon(code)),
            Response::Text(text) => Err(ClientError::UnexpectedResponse(text)),
        }
    }

    /// Send a command that answers with a text payload.
    ///
    /// A payload of `0` is indistinguishable from success and comes back as
    /// the text `"0"`.
    async fn text(&self, command: Command) -> Result<String, ClientError> {
        match self.request(&command).await? {
            Response::Text(text) => Ok(text),
            Response::Done => Ok("0".to_string()),
            Response::Error(code) => Err(ClientError::Daemon(code)),
        }
    }

    /// Attach the remoteproc driver.
    pub async fn boot_up(&self) -> Result<(), ClientError> {
        self.status(Command::ProbeRproc).await
    }

    /// Detach the remoteproc driver.
    pub async fn shut_down(&self) -> Result<(), ClientError> {
        self.status(Command::UnprobeRproc).await
    }

    /// Detach and re-attach the remoteproc driver.
    pub async fn restart(&self) -> Result<(), ClientError> {
        self.shut_down().await?;
        self.boot_up().await
    }

    /// Handle for PRU `unit`, talking on its default channel.
    pub fn pru(&self, unit: u32) -> Pru {
        Pru {
            client: self.clone(),
            unit: UnitIndex(unit),
            channel: ChannelAddress::new(
                DEFAULT_CHANNEL,
                DEFAULT_CHANNEL_PORT.saturating_add(unit),
            ),
        }
    }
}

/// A single PRU and the rpmsg channel used to talk to its firmware.
#[derive(Debug, Clone)]
pub struct Pru {
    client: PrussClient,
    unit: UnitIndex,
    channel: ChannelAddress,
}

impl Pru {
    /// Index of this PRU.
    pub fn unit(&self) -> UnitIndex {
        self.unit
    }

    /// Channel used for messaging.
    pub fn channel(&self) -> &ChannelAddress {
        &self.channel
    }

    /// Use `name<port>` for messaging instead of the default channel.
    pub fn set_channel(&mut self, name: impl Into<String>, port: u32) {
        self.channel = ChannelAddress::new(name, port);
    }

    /// Start the PRU.
    pub async fn enable(&self) -> Result<(), ClientError> {
        self.client.status(Command::Enable(self.unit)).await
    }

    /// Stop the PRU.
    pub async fn disable(&self) -> Result<(), ClientError> {
        self.client.status(Command::Disable(self.unit)).await
    }

    /// Stop and restart the PRU.
    pub async fn reset(&self) -> Result<(), ClientError> {
        self.disable().await?;
        self.enable().await
    }

    /// Enter single-step mode.
    pub async fn pause(&self) -> Result<(), ClientError> {
        self.client.status(Command::Pause(self.unit)).await
    }

    /// Leave single-step mode.
    pub async fn resume(&self) -> Result<(), ClientError> {
        self.client.status(Command::Resume(self.unit)).await
    }

    /// Current remoteproc state.
    pub async fn state(&self) -> Result<RprocState, ClientError> {
        let raw = self.client.text(Command::State(self.unit)).await?;
        Ok(RprocState::parse(&raw))
    }

    /// Register dump.
    pub async fn show_regs(&self) -> Result<String, ClientError> {
        self.client.text(Command::GetRegs(self.unit)).await
    }

    /// Load the firmware image at `path` (a path on the daemon's host).
    pub async fn load(&self, path: impl Into<String>) -> Result<(), ClientError> {
        self.client
            .status(Command::Load {
                unit: self.unit,
                path: path.into(),
            })
            .await
    }

    /// Send a message to the firmware.
    pub async fn send_msg(&self, message: &str) -> Result<(), ClientError> {
        let words: Vec<String> = message.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            return Err(ClientError::Daemon(ErrorCode::InvalidArgument));
        }

        self.client
            .status(Command::SendMsg {
                channel: self.channel.clone(),
                message: words,
            })
            .await
    }

    /// Collect pending messages; an empty string when nothing was pending.
    pub async fn get_msg(&self) -> Result<String, ClientError> {
        let raw = self
            .client
            .text(Command::GetMsg(self.channel.clone()))
            .await?;

        if raw == prussd_protocol::NO_MESSAGE {
            Ok(String::new())
        } else {
            Ok(raw)
        }
    }

    /// Wait until the firmware has something to say.
    ///
    /// With `timeout_secs` the daemon gives up after that many seconds and
    /// this fails with [`ErrorCode::Timeout`].
    pub async fn wait_for_event(&self, timeout_secs: Option<u64>) -> Result<(), ClientError> {
        self.client
            .status(Command::EventWait {
                channel: self.channel.clone(),
                timeout: timeout_secs,
            })
            .await
    }
}
