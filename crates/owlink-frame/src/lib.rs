//! Device-addressed framing for a shared, unreliable serial link.
//!
//! Up to 16 remote devices share one physical link. Every frame carries:
//! - A 2-byte start marker (`0xAA 0xBB`) for stream synchronization
//! - The device id (0-15) the payload belongs to
//! - A 1-byte payload length (at most 58)
//! - A 1-byte additive checksum and a 1-byte end marker (`0xCC`)
//!
//! The decoder tolerates partial reads and resynchronizes past corrupted
//! frames on its own; callers only ever see complete, verified frames.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::{is_valid_device_id, DEVICE_COUNT, MAX_DEVICE_ID};
pub use codec::{
    decode_frame, encode_frame, frame_checksum, Frame, FrameConfig, FrameDecoder, END_MARKER,
    HEADER_SIZE, MAX_PAYLOAD, START_MARKER, TRAILER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
