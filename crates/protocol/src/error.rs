//! Error codes returned by the daemon.
//!
//! Every failure crosses the wire as a negative integer that mirrors the
//! kernel's errno numbering, so clients can interpret the result of a proxied
//! filesystem operation exactly as if they had performed it themselves.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Error code taxonomy for daemon operations.
///
/// The common failure classes get their own variant; anything else the
/// operating system reports is carried verbatim in [`ErrorCode::Os`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCode {
    /// Malformed command, wrong arity, or a non-numeric index/port/timeout.
    #[error("invalid argument")]
    InvalidArgument,

    /// The target attribute file or path does not exist.
    #[error("no such file or directory")]
    NotFound,

    /// A channel name or firmware path failed its allow-list check.
    #[error("operation not permitted")]
    Permission,

    /// An allow-listed channel has no device node.
    #[error("no such device")]
    NoSuchDevice,

    /// A bounded event wait elapsed without a readiness signal.
    #[error("timer expired")]
    Timeout,

    /// Any other OS-level failure, holding the positive errno value.
    #[error("os error {0}")]
    Os(i32),
}

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, ErrorCode>;

impl ErrorCode {
    /// The positive errno value for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument => Errno::EINVAL as i32,
            Self::NotFound => Errno::ENOENT as i32,
            Self::Permission => Errno::EPERM as i32,
            Self::NoSuchDevice => Errno::ENODEV as i32,
            Self::Timeout => Errno::ETIME as i32,
            Self::Os(errno) => *errno,
        }
    }

    /// The negative wire code for this error.
    pub fn code(&self) -> i32 {
        -self.errno()
    }

    /// Build an error from a positive errno value.
    ///
    /// Values with a dedicated variant are normalised to it, so
    /// `from_errno(ENOENT)` compares equal to [`ErrorCode::NotFound`].
    pub fn from_errno(errno: i32) -> Self {
        match Errno::from_raw(errno) {
            Errno::EINVAL => Self::InvalidArgument,
            Errno::ENOENT => Self::NotFound,
            Errno::EPERM => Self::Permission,
            Errno::ENODEV => Self::NoSuchDevice,
            Errno::ETIME => Self::Timeout,
            _ => Self::Os(errno),
        }
    }

    /// Build an error from a negative wire code.
    ///
    /// Returns `None` for codes that are not negative.
    pub fn from_code(code: i32) -> Option<Self> {
        if code < 0 {
            code.checked_neg().map(Self::from_errno)
        } else {
            None
        }
    }

    /// Human-readable description of the underlying errno.
    pub fn description(&self) -> &'static str {
        Errno::from_raw(self.errno()).desc()
    }
}

impl From<Errno> for ErrorCode {
    fn from(errno: Errno) -> Self {
        Self::from_errno(errno as i32)
    }
}

impl From<io::Error> for ErrorCode {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            None => match err.kind() {
                io::ErrorKind::NotFound => Self::NotFound,
                io::ErrorKind::PermissionDenied => Self::Os(Errno::EACCES as i32),
                io::ErrorKind::InvalidInput => Self::InvalidArgument,
                io::ErrorKind::TimedOut => Self::Timeout,
                _ => Self::Os(Errno::EIO as i32),
            },
        }
    }
}
