use std::time::Duration;

/// Errors raised by the hub and its endpoints.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] owlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] owlink_frame::FrameError),

    /// Message encoding error.
    #[error("message error: {0}")]
    Message(#[from] owlink_message::MessageError),

    /// The device id does not fit the 0-15 address space.
    #[error("invalid device id {0} (expected 0-15)")]
    InvalidDeviceId(u8),

    /// The hub has been shut down.
    #[error("hub is shut down")]
    Closed,

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HubError>;

/// Why a submitted command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The device answered with an ERROR ack.
    #[error("command rejected by device")]
    Rejected,

    /// No acceptable ack arrived within the retry or time budget.
    #[error("command timed out after {attempts} attempt(s) in {elapsed:?}")]
    TimedOut { attempts: u32, elapsed: Duration },

    /// A newer command on the same device replaced this one.
    #[error("command superseded by a newer command")]
    Superseded,

    /// Writing the command to the link failed.
    #[error("link error: {0}")]
    Link(String),

    /// The hub shut down while the command was in flight.
    #[error("hub shut down before the command completed")]
    Shutdown,
}

/// Why a capture trigger did not yield a transfer id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// No capture ack arrived before the request expired.
    #[error("capture timed out")]
    TimedOut,

    /// The device reported a failed capture.
    #[error("capture rejected by device (result {result})")]
    Rejected { result: u8 },

    /// Writing the trigger to the link failed.
    #[error("link error: {0}")]
    Link(String),

    /// The hub shut down while waiting.
    #[error("hub shut down before the capture completed")]
    Shutdown,
}
