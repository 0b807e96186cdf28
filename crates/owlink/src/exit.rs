use std::fmt;
use std::io;

use owlink_frame::FrameError;
use owlink_hub::{CaptureError, CommandError, HubError};
use owlink_transport::TransportError;

// Process exit codes shared by every subcommand.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const REJECTED: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::InvalidAddress { .. } | TransportError::Unsupported(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::InvalidDeviceId(_) => CliError::new(USAGE, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn hub_error(context: &str, err: HubError) -> CliError {
    match err {
        HubError::Transport(err) => transport_error(context, err),
        HubError::Frame(err) => frame_error(context, err),
        HubError::Message(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        HubError::InvalidDeviceId(_) => CliError::new(USAGE, format!("{context}: {err}")),
        HubError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn command_error(context: &str, err: CommandError) -> CliError {
    let code = match err {
        CommandError::Rejected => REJECTED,
        CommandError::TimedOut { .. } => TIMEOUT,
        CommandError::Superseded => FAILURE,
        CommandError::Link(_) | CommandError::Shutdown => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn capture_error(context: &str, err: CaptureError) -> CliError {
    let code = match err {
        CaptureError::Rejected { .. } => REJECTED,
        CaptureError::TimedOut => TIMEOUT,
        CaptureError::Link(_) | CaptureError::Shutdown => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn rejection_and_timeout_are_distinct() {
        let rejected = command_error("send", CommandError::Rejected);
        let timed_out = command_error(
            "send",
            CommandError::TimedOut {
                attempts: 3,
                elapsed: Duration::from_secs(5),
            },
        );
        assert_eq!(rejected.code, REJECTED);
        assert_eq!(timed_out.code, TIMEOUT);
        assert!(timed_out.message.starts_with("send: "));
    }

    #[test]
    fn bad_device_id_is_usage() {
        assert_eq!(hub_error("open", HubError::InvalidDeviceId(20)).code, USAGE);
    }

    #[test]
    fn refused_connection_is_transport() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(io_error("connect", err).code, TRANSPORT_ERROR);
    }
}
