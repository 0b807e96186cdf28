//! Application messages exchanged with owlink devices.
//!
//! The link layer only moves opaque bytes; this crate gives them meaning.
//! [`MessageCodec`] is the seam between the two, and [`PackedCodec`] is the
//! compact encoding used by the stock firmware.

pub mod codec;
pub mod command;
pub mod error;
pub mod message;

pub use codec::{MessageCodec, PackedCodec, MAX_BODY, MESSAGE_STX};
pub use command::CommandKind;
pub use error::{MessageError, Result};
pub use message::{
    Attitude, AutopilotVersion, BatteryStatus, CommandAck, CommandLong, ExtendedSysState,
    GlobalPosition, Heartbeat, Message, PhotoAck, PhotoChunk, PhotoInfo, StatusText,
    PHOTO_CHUNK_SIZE,
};
