//! rpmsg channel I/O.
//!
//! Each rpmsg endpoint is a character device named `<channel><port>` (for
//! example `/dev/rpmsg_pru30`). Only channels on the operator's allow-list can
//! be touched, and the allow-list check always happens before the filesystem
//! is consulted.
//!
//! Three operations are offered:
//! - [`Channels::drain`] collects whatever is pending without blocking
//! - [`Channels::write`] sends one message
//! - [`Channels::wait_for_event`] waits for the channel to become readable
//!
//! A wait without a timeout can block forever. It is an async readiness
//! future, so any number of pending waits hold no threads.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use prussd_protocol::{ChannelAddress, ErrorCode, Result, NO_MESSAGE};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::config::RpmsgConfig;

/// Read buffer size; rpmsg messages never exceed 512 bytes including header.
const MESSAGE_BUF_LEN: usize = 512;

/// Access to the allow-listed rpmsg channels.
#[derive(Debug, Clone)]
pub struct Channels {
    dev_dir: PathBuf,
    allowed: BTreeSet<String>,
}

impl Channels {
    /// Create channel access from the rpmsg configuration.
    pub fn new(config: &RpmsgConfig) -> Self {
        Self {
            dev_dir: config.dev_dir.clone(),
            allowed: config.channels.clone(),
        }
    }

    /// Whether `name` is on the allow-list.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }

    /// Resolve a channel address to its device node.
    ///
    /// Fails with Permission for channels off the allow-list, without touching
    /// the filesystem, and with NoSuchDevice when the node is absent.
    pub fn resolve(&self, address: &ChannelAddress) -> Result<PathBuf> {
        if !self.is_allowed(&address.name) {
            tracing::warn!("Rejected access to channel {:?}", address.name);
            return Err(ErrorCode::Permission);
        }

        let node = self.dev_dir.join(address.node_name());
        if !node.exists() {
            return Err(ErrorCode::NoSuchDevice);
        }
        Ok(node)
    }

    /// Read everything that is immediately available on the channel.
    ///
    /// Returns [`NO_MESSAGE`] when nothing was pending, never an empty string.
    pub fn drain(&self, address: &ChannelAddress) -> Result<String> {
        let node = self.resolve(address)?;
        let mut file = open_for_reading(&node)?;
        let mut buf = [0u8; MESSAGE_BUF_LEN];
        let mut reply = String::new();

        // One message per readiness signal, until nothing more is ready.
        while is_ready(&file, PollTimeout::ZERO)? {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => reply.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if reply.is_empty() {
            Ok(NO_MESSAGE.to_string())
        } else {
            Ok(reply)
        }
    }

    /// Send one message made of `words` joined by single spaces.
    pub fn write(&self, address: &ChannelAddress, words: &[String]) -> Result<()> {
        let node = self.resolve(address)?;
        let mut file = OpenOptions::new().write(true).truncate(true).open(node)?;

        let mut message = words.join(" ");
        message.push('\n');
        file.write_all(message.as_bytes())?;
        Ok(())
    }

    /// Wait for the channel to become readable.
    ///
    /// With no timeout this waits indefinitely. With a timeout it fails with
    /// Timeout once the window has elapsed without readiness.
    pub async fn wait_for_event(
        &self,
        address: &ChannelAddress,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let node = self.resolve(address)?;
        let file = open_for_reading(&node)?;

        if is_ready(&file, PollTimeout::ZERO)? {
            return Ok(());
        }

        let fd = match AsyncFd::with_interest(file, Interest::READABLE) {
            Ok(fd) => fd,
            // epoll refuses files without readiness support; those always poll readable.
            Err(e) if e.raw_os_error() == Some(Errno::EPERM as i32) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match timeout {
            None => {
                fd.readable().await?;
                Ok(())
            }
            Some(window) => match tokio::time::timeout(window, fd.readable()).await {
                Ok(ready) => {
                    ready?;
                    Ok(())
                }
                Err(_) => Err(ErrorCode::Timeout),
            },
        }
    }
}

fn open_for_reading(node: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(node)
}

/// Poll `file` for readability. Hang-up and error conditions count as ready,
/// matching `select(2)`.
fn is_ready(file: &File, timeout: PollTimeout) -> Result<bool> {
    let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
    loop {
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(false),
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }

    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
    Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    fn channels(dev_dir: &Path) -> Channels {
        Channels {
            dev_dir: dev_dir.to_path_buf(),
            allowed: BTreeSet::from(["rpmsg_pru".to_string()]),
        }
    }

    fn rpmsg(port: u32) -> ChannelAddress {
        ChannelAddress::new("rpmsg_pru", port)
    }

    fn make_fifo(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        path
    }

    #[test]
    fn test_resolve_rejects_unlisted_channel_even_if_node_exists() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("ttyS0"), "").unwrap();
        let channels = channels(temp_dir.path());

        let address = ChannelAddress::new("ttyS", 0);
        assert_eq!(channels.resolve(&address), Err(ErrorCode::Permission));
        assert_eq!(channels.drain(&address), Err(ErrorCode::Permission));
        assert_eq!(
            channels.write(&address, &["x".to_string()]),
            Err(ErrorCode::Permission)
        );
    }

    #[test]
    fn test_resolve_missing_node() {
        let temp_dir = TempDir::new().unwrap();
        let channels = channels(temp_dir.path());

        assert_eq!(channels.resolve(&rpmsg(30)), Err(ErrorCode::NoSuchDevice));
        assert_eq!(channels.drain(&rpmsg(30)), Err(ErrorCode::NoSuchDevice));
    }

    #[test]
    fn test_drain_returns_pending_text() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("rpmsg_pru30"), "first\nsecond\n").unwrap();
        let channels = channels(temp_dir.path());

        assert_eq!(channels.drain(&rpmsg(30)), Ok("first\nsecond\n".to_string()));
    }

    #[test]
    fn test_drain_empty_returns_sentinel() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("rpmsg_pru30"), "").unwrap();
        let channels = channels(temp_dir.path());

        assert_eq!(channels.drain(&rpmsg(30)), Ok("\n".to_string()));
    }

    #[test]
    fn test_drain_idle_fifo_returns_sentinel() {
        let temp_dir = TempDir::new().unwrap();
        make_fifo(temp_dir.path(), "rpmsg_pru31");
        let channels = channels(temp_dir.path());

        assert_eq!(channels.drain(&rpmsg(31)), Ok(NO_MESSAGE.to_string()));
    }

    #[test]
    fn test_write_joins_words() {
        let temp_dir = TempDir::new().unwrap();
        let node = temp_dir.path().join("rpmsg_pru30");
        fs::write(&node, "").unwrap();
        let channels = channels(temp_dir.path());

        let words = vec!["hello".to_string(), "world".to_string()];
        assert_eq!(channels.write(&rpmsg(30), &words), Ok(()));
        assert_eq!(fs::read(&node).unwrap(), b"hello world\n");
    }

    #[tokio::test]
    async fn test_wait_on_always_ready_node() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("rpmsg_pru30"), "").unwrap();
        let channels = channels(temp_dir.path());

        assert_eq!(
            channels
                .wait_for_event(&rpmsg(30), Some(Duration::from_secs(5)))
                .await,
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_after_window() {
        let temp_dir = TempDir::new().unwrap();
        make_fifo(temp_dir.path(), "rpmsg_pru30");
        let channels = channels(temp_dir.path());

        let window = Duration::from_millis(300);
        let start = Instant::now();
        let result = channels.wait_for_event(&rpmsg(30), Some(window)).await;

        assert_eq!(result, Err(ErrorCode::Timeout));
        assert!(start.elapsed() >= window);
    }

    #[tokio::test]
    async fn test_wait_without_timeout_returns_on_readiness() {
        let temp_dir = TempDir::new().unwrap();
        let node = make_fifo(temp_dir.path(), "rpmsg_pru31");
        let channels = channels(temp_dir.path());

        let waiter = tokio::spawn(async move { channels.wait_for_event(&rpmsg(31), None).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished());

        let mut writer = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&node)
            .unwrap();
        writer.write_all(b"event\n").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait did not observe readiness")
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_wait_rejects_unlisted_channel() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("other0"), "").unwrap();
        let channels = channels(temp_dir.path());

        assert_eq!(
            channels
                .wait_for_event(&ChannelAddress::new("other", 0), None)
                .await,
            Err(ErrorCode::Permission)
        );
    }
}
