//! Responses.
//!
//! The daemon answers every request with exactly one response and then closes
//! the connection. A response is either a text payload, written verbatim, or an
//! integer: `0` for success and a negative errno for failure. No trailing
//! newline is added.

use std::fmt;

use crate::error::{ErrorCode, Result};

/// Payload returned by a channel drain when nothing was pending.
pub const NO_MESSAGE: &str = "\n";

/// A single response to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Text payload (attribute contents, drained messages).
    Text(String),
    /// The operation completed; rendered as `0`.
    Done,
    /// The operation failed; rendered as the negative errno.
    Error(ErrorCode),
}

impl Response {
    /// Interpret a raw response received by a client.
    ///
    /// Integer responses of zero or below are read as status codes, everything
    /// else as text. A text payload that happens to be a non-positive integer
    /// is indistinguishable from a status code on the wire.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i32>() {
            Ok(0) => Response::Done,
            Ok(code) => match ErrorCode::from_code(code) {
                Some(error) => Response::Error(error),
                None => Response::Text(raw.to_string()),
            },
            Err(_) => Response::Text(raw.to_string()),
        }
    }

    /// Whether this response reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Convert into a result, keeping text payloads and dropping `Done`.
    pub fn into_result(self) -> Result<Option<String>> {
        match self {
            Response::Text(text) => Ok(Some(text)),
            Response::Done => Ok(None),
            Response::Error(error) => Err(error),
        }
    }
}

impl From<Result<Response>> for Response {
    fn from(result: Result<Response>) -> Self {
        result.unwrap_or_else(Response::Error)
    }
}

impl From<ErrorCode> for Response {
    fn from(error: ErrorCode) -> Self {
        Response::Error(error)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Text(text) => f.write_str(text),
            Response::Done => f.write_str("0"),
            Response::Error(error) => write!(f, "{}", error.code()),
        }
    }
}

/// Remoteproc lifecycle state as reported by the `state` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RprocState {
    /// Powered off, no firmware running.
    Offline,
    /// Suspended by runtime power management.
    Suspended,
    /// Firmware is running.
    Running,
    /// The remote processor crashed.
    Crashed,
    /// The kernel reports an invalid state.
    Invalid,
    /// Anything the kernel reports that this crate does not know about.
    Other(String),
}

impl RprocState {
    /// Parse the contents of a `state` attribute.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "offline" => RprocState::Offline,
            "suspended" => RprocState::Suspended,
            "running" => RprocState::Running,
            "crashed" => RprocState::Crashed,
            "invalid" => RprocState::Invalid,
            other => RprocState::Other(other.to_string()),
        }
    }

    /// Whether the unit is executing firmware.
    pub fn is_running(&self) -> bool {
        matches!(self, RprocState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(Response::Text("running\n".into()).to_string(), "running\n");
        assert_eq!(Response::Done.to_string(), "0");
        assert_eq!(Response::Error(ErrorCode::InvalidArgument).to_string(), "-22");
        assert_eq!(Response::Error(ErrorCode::Os(16)).to_string(), "-16");
    }

    #[test]
    fn test_render_sentinel_is_not_empty() {
        let rendered = Response::Text(NO_MESSAGE.to_string()).to_string();
        assert_eq!(rendered, "\n");
        assert!(!rendered.is_empty());
    }

    #[test]
    fn test_parse_status_codes() {
        assert_eq!(Response::parse("0"), Response::Done);
        assert_eq!(Response::parse("-1"), Response::Error(ErrorCode::Permission));
        assert_eq!(Response::parse("-62"), Response::Error(ErrorCode::Timeout));
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(Response::parse("offline\n"), Response::Text("offline\n".into()));
        assert_eq!(Response::parse("\n"), Response::Text("\n".into()));
        assert_eq!(Response::parse("42"), Response::Text("42".into()));
    }

    #[test]
    fn test_from_result() {
        let ok: Result<Response> = Ok(Response::Done);
        assert_eq!(Response::from(ok), Response::Done);

        let err: Result<Response> = Err(ErrorCode::NotFound);
        assert_eq!(Response::from(err), Response::Error(ErrorCode::NotFound));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Response::Done.into_result(), Ok(None));
        assert_eq!(
            Response::Text("x".into()).into_result(),
            Ok(Some("x".to_string()))
        );
        assert_eq!(
            Response::Error(ErrorCode::NoSuchDevice).into_result(),
            Err(ErrorCode::NoSuchDevice)
        );
    }

    #[test]
    fn test_rproc_state_parse() {
        assert_eq!(RprocState::parse("offline\n"), RprocState::Offline);
        assert_eq!(RprocState::parse("running\n"), RprocState::Running);
        assert_eq!(RprocState::parse("crashed"), RprocState::Crashed);
        assert_eq!(
            RprocState::parse("attached\n"),
            RprocState::Other("attached".to_string())
        );
        assert!(RprocState::parse("running").is_running());
        assert!(!RprocState::parse("suspended").is_running());
    }
}
