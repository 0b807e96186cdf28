use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use owlink_transport::LinkStream;

use crate::codec::{encode_frame, Frame, FrameConfig, HEADER_SIZE, MAX_PAYLOAD, TRAILER_SIZE};
use crate::error::{FrameError, Result};

/// Puts frames on a byte stream.
///
/// Every call encodes all of its frames before the first byte is written,
/// so an invalid device id or oversized payload never leaves a partial frame
/// on the shared link.
pub struct FrameWriter<T> {
    inner: T,
    wire: BytesMut,
    frames_written: u64,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            wire: BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD + TRAILER_SIZE),
            frames_written: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.device_id, &frame.payload)
    }

    /// Send one frame carrying `payload` (at most 58 bytes) to `device_id`.
    pub fn send(&mut self, device_id: u8, payload: &[u8]) -> Result<()> {
        self.wire.clear();
        encode_frame(device_id, payload, &mut self.wire)?;
        self.flush_wire(1)
    }

    /// Send `bytes` of any length to `device_id`, split over as many
    /// consecutive frames as needed. Returns the number of frames sent.
    pub fn send_split(&mut self, device_id: u8, bytes: &[u8]) -> Result<usize> {
        self.wire.clear();
        let mut frames = 0;
        for piece in bytes.chunks(MAX_PAYLOAD) {
            encode_frame(device_id, piece, &mut self.wire)?;
            frames += 1;
        }
        self.flush_wire(frames as u64)?;
        Ok(frames)
    }

    fn flush_wire(&mut self, frames: u64) -> Result<()> {
        self.inner.write_all(&self.wire).map_err(|err| match err.kind() {
            ErrorKind::WriteZero => FrameError::ConnectionClosed,
            _ => FrameError::Io(err),
        })?;
        self.inner.flush()?;
        self.frames_written += frames;
        Ok(())
    }

    /// Frames written since the writer was created.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Raw access to the stream, bypassing framing.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<LinkStream> {
    /// Writer over a link, with the link's write timeout taken from `config`.
    pub fn with_config_link(mut link: LinkStream, config: FrameConfig) -> Result<Self> {
        link.set_write_timeout(config.write_timeout)?;
        Ok(Self::new(link))
    }
}
