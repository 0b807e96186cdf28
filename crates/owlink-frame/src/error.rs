/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The device id does not fit the 0-15 address space.
    #[error("invalid device id {0} (expected 0-15)")]
    InvalidDeviceId(u8),

    /// The payload exceeds the per-frame maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The byte after the checksum is not the end marker.
    #[error("invalid end marker 0x{0:02X} (expected 0xCC)")]
    BadEndMarker(u8),

    /// The frame checksum does not match its contents.
    #[error("checksum mismatch (computed 0x{expected:02X}, frame carried 0x{actual:02X})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed.
    #[error("link closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors caused by corrupt or desynchronized input, which the
    /// decoder recovers from by resuming its scan.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidDeviceId(_)
                | Self::PayloadTooLarge { .. }
                | Self::BadEndMarker(_)
                | Self::ChecksumMismatch { .. }
        )
    }
}

impl From<owlink_transport::TransportError> for FrameError {
    fn from(err: owlink_transport::TransportError) -> Self {
        match err {
            owlink_transport::TransportError::Io(io) => Self::Io(io),
            owlink_transport::TransportError::Connect { source, .. } => Self::Io(source),
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
