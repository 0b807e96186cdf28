use std::path::PathBuf;

/// Errors that can occur while opening or driving a link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open a serial device.
    #[error("failed to open serial port {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// Failed to connect to a network or socket endpoint.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link address could not be parsed.
    #[error("invalid link address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    /// The requested link kind was not compiled in.
    #[error("{0} links are not supported by this build")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
