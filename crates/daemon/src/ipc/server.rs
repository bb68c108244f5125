//! Request server on a Unix Domain Socket.
//!
//! Each connection carries exactly one request line and one response; the
//! server closes the connection after answering. A client that hangs up while
//! its request is still pending abandons it, which releases any event wait
//! held on its behalf.

use std::fs;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use prussd_protocol::{ErrorCode, Response, MAX_REQUEST_LEN};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

use crate::dispatch::Dispatcher;

/// Socket mode: any local process may connect.
const SOCKET_MODE: u32 = 0o777;

/// Pause before accepting again after running out of descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A server that listens for requests on a Unix Domain Socket.
pub struct PrussServer {
    listener: UnixListener,
    path: PathBuf,
}

impl PrussServer {
    /// Bind the server to the specified socket path.
    ///
    /// Missing parent directories are created and a stale socket file left at
    /// the path is removed first. The socket is made world-accessible.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parent directories cannot be created
    /// - The existing socket cannot be removed
    /// - The socket cannot be bound or its mode cannot be set
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Path the server is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<PrussConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(PrussConnection::new(stream))
    }

    /// Accept connections forever, answering each on its own task.
    ///
    /// Resource exhaustion while accepting is retried after a short pause.
    /// Any other accept failure ends the loop. Failures while serving a single
    /// connection stay within that connection's task.
    pub async fn serve(&self, dispatcher: Arc<Dispatcher>) -> Result<(), io::Error> {
        tracing::info!("Listening on {}", self.path.display());

        loop {
            let conn = match self.accept().await {
                Ok(conn) => conn,
                Err(e) if is_transient_accept_error(&e) => {
                    tracing::warn!("Failed to accept connection, retrying: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                    return Err(e);
                }
            };

            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                if let Err(e) = conn.handle(&dispatcher).await {
                    tracing::debug!("Connection ended with error: {}", e);
                }
            });
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::ConnectionAborted {
        return true;
    }
    matches!(
        e.raw_os_error().map(Errno::from_raw),
        Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM)
    )
}

/// A connection to a client.
pub struct PrussConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl PrussConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the request line from the client.
    ///
    /// Returns `None` if the client disconnected without sending anything. A
    /// final line without a newline is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be read, is longer than
    /// [`MAX_REQUEST_LEN`] or is not valid UTF-8.
    pub async fn read_request(&mut self) -> Result<Option<String>, IpcError> {
        let mut buf = Vec::new();
        let limit = MAX_REQUEST_LEN as u64 + 1;
        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
        } else if buf.len() > MAX_REQUEST_LEN {
            return Err(IpcError::RequestTooLong);
        }

        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| IpcError::InvalidUtf8)
    }

    /// Send the response and close the write side.
    ///
    /// The response is written without a trailing newline.
    pub async fn send_response(&mut self, response: &Response) -> Result<(), IpcError> {
        self.writer.write_all(response.to_string().as_bytes()).await?;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Resolve once the client has closed its end of the connection.
    ///
    /// Anything sent after the request line is discarded. A client that only
    /// shut down its write side is still waiting for the response, so that
    /// does not count as a hang-up.
    async fn hung_up(&mut self) {
        let mut buf = [0u8; 256];
        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) if peer_closed(self.writer.as_ref()) => return,
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return,
            }
        }
        std::future::pending().await
    }

    /// Answer the single request carried by this connection.
    ///
    /// If the client hangs up first, the pending request is dropped and
    /// nothing is sent.
    pub async fn handle(mut self, dispatcher: &Dispatcher) -> Result<(), IpcError> {
        let line = match self.read_request().await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(IpcError::Io(e)) => return Err(IpcError::Io(e)),
            Err(e) => {
                tracing::debug!("Rejected request: {}", e);
                let response = Response::Error(ErrorCode::InvalidArgument);
                return self.send_response(&response).await;
            }
        };

        let response = tokio::select! {
            biased;
            response = dispatcher.dispatch_line(&line) => response,
            () = self.hung_up() => {
                tracing::debug!("Client hung up, abandoning {:?}", line);
                return Ok(());
            }
        };

        self.send_response(&response).await
    }
}

/// Whether both directions of `stream` are shut down, i.e. the peer closed
/// its socket rather than just its write side.
fn peer_closed(stream: &UnixStream) -> bool {
    let mut fds = [PollFd::new(stream.as_fd(), PollFlags::empty())];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(_) => fds[0]
            .revents()
            .is_some_and(|revents| revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR)),
        Err(_) => false,
    }
}

/// Errors that can occur while serving a connection.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request line exceeded the length cap.
    #[error("request exceeds {} bytes", MAX_REQUEST_LEN)]
    RequestTooLong,

    /// The request line was not valid UTF-8.
    #[error("request is not valid UTF-8")]
    InvalidUtf8,
}
