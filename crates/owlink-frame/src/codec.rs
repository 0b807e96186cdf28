use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::channel::is_valid_device_id;
use crate::error::{FrameError, Result};

/// Frame header: start marker (2) + device id (1) + length (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Frame trailer: checksum (1) + end marker (1) = 2 bytes.
pub const TRAILER_SIZE: usize = 2;

/// Start marker bytes.
pub const START_MARKER: [u8; 2] = [0xAA, 0xBB];

/// End marker byte.
pub const END_MARKER: u8 = 0xCC;

/// Maximum payload carried by one frame.
pub const MAX_PAYLOAD: usize = 58;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// A verified frame addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The device (channel) this frame belongs to.
    pub device_id: u8,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(device_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            device_id,
            payload: payload.into(),
        }
    }

    /// The checksum this frame carries on the wire.
    pub fn checksum(&self) -> u8 {
        // Only valid frames fit the u8 length field.
        frame_checksum(self.device_id, self.payload.len() as u8, &self.payload)
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    /// Encode this frame into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_frame(self.device_id, &self.payload, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Low byte of the sum of the start marker, device id, length and payload.
pub fn frame_checksum(device_id: u8, length: u8, payload: &[u8]) -> u8 {
    START_MARKER
        .iter()
        .chain([device_id, length].iter())
        .chain(payload.iter())
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┬──────────┬──────┐
/// │ Start (2B)   │ Device    │ Length   │ Payload         │ Checksum │ End  │
/// │ 0xAA 0xBB    │ (0..15)   │ (0..58)  │ (Length bytes)  │ (sum&FF) │ 0xCC │
/// └──────────────┴───────────┴──────────┴─────────────────┴──────────┴──────┘
/// ```
pub fn encode_frame(device_id: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if !is_valid_device_id(device_id) {
        return Err(FrameError::InvalidDeviceId(device_id));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let length = payload.len() as u8;
    dst.reserve(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    dst.put_slice(&START_MARKER);
    dst.put_u8(device_id);
    dst.put_u8(length);
    dst.put_slice(payload);
    dst.put_u8(frame_checksum(device_id, length, payload));
    dst.put_u8(END_MARKER);
    Ok(())
}

/// Decode one frame from the front of a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Bytes ahead of the first start marker are discarded. On success the frame
/// bytes are consumed. On a corrupt frame only the start marker is consumed,
/// so that the next call resumes scanning right after it and a damaged frame
/// cannot swallow the valid frames that follow.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    let Some(start) = src.windows(2).position(|w| w == START_MARKER) else {
        // Keep a trailing first marker byte; its partner may still be in flight.
        let keep = usize::from(src.last() == Some(&START_MARKER[0]));
        src.advance(src.len() - keep);
        return Ok(None);
    };
    src.advance(start);

    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let device_id = src[2];
    let length = src[3] as usize;

    if !is_valid_device_id(device_id) {
        src.advance(START_MARKER.len());
        return Err(FrameError::InvalidDeviceId(device_id));
    }
    if length > MAX_PAYLOAD {
        src.advance(START_MARKER.len());
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: MAX_PAYLOAD,
        });
    }

    let total = HEADER_SIZE + length + TRAILER_SIZE;
    if src.len() < total {
        return Ok(None);
    }

    let end = src[total - 1];
    if end != END_MARKER {
        src.advance(START_MARKER.len());
        return Err(FrameError::BadEndMarker(end));
    }

    let carried = src[HEADER_SIZE + length];
    let computed = frame_checksum(
        device_id,
        length as u8,
        &src[HEADER_SIZE..HEADER_SIZE + length],
    );
    if carried != computed {
        src.advance(START_MARKER.len());
        return Err(FrameError::ChecksumMismatch {
            expected: computed,
            actual: carried,
        });
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(length).freeze();
    src.advance(TRAILER_SIZE);

    Ok(Some(Frame { device_id, payload }))
}

/// Stateful stream parser: feed it raw link bytes, drain verified frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    corrupt_frames: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            corrupt_frames: 0,
        }
    }

    /// Append bytes read from the link.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, or `None` until more bytes are fed.
    ///
    /// Corrupt frames are skipped and counted; they never surface here.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match decode_frame(&mut self.buf) {
                Ok(frame) => return frame,
                Err(err) => {
                    self.corrupt_frames = self.corrupt_frames.saturating_add(1);
                    debug!(error = %err, buffered = self.buf.len(), "dropping corrupt frame");
                }
            }
        }
    }

    /// Every complete frame currently buffered, in wire order.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Number of corrupt frames skipped so far.
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }
}

/// Configuration for link I/O around the codec.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}
