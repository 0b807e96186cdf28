/// Errors that can occur while encoding or decoding application messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The encoded body would not fit the length field.
    #[error("message {id} body too large ({size} bytes, max {max})")]
    BodyTooLarge { id: u16, size: usize, max: usize },

    /// The message checksum does not match its contents.
    #[error("message checksum mismatch (computed 0x{expected:02X}, message carried 0x{actual:02X})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// A known message id arrived with a body of the wrong shape.
    #[error("malformed message {id}: {reason}")]
    Malformed { id: u16, reason: String },
}

pub type Result<T> = std::result::Result<T, MessageError>;
