use std::io::{ErrorKind, Read};

use owlink_transport::LinkStream;

use crate::codec::{Frame, FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};

/// Bytes pulled from the link per read call. A serial port rarely returns
/// more than a few frames at once.
const READ_CHUNK_SIZE: usize = 256;

/// Pulls verified frames off a byte stream.
///
/// Frames may arrive split across reads or glued together, and line noise
/// may sit between them; the reader buffers and resynchronizes on its own.
/// A read timeout surfaces as `FrameError::Io` with `WouldBlock` or
/// `TimedOut` and keeps whatever partial frame is buffered.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    scratch: Box<[u8]>,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            scratch: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// Block until the next complete frame. EOF is `ConnectionClosed`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(frame);
            }
            match self.inner.read(&mut self.scratch) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(read) => self.decoder.feed(&self.scratch[..read]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Corrupt frames dropped since the reader was created.
    pub fn corrupt_frames(&self) -> u64 {
        self.decoder.corrupt_frames()
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.decoder.buffered_len()
    }
}

impl FrameReader<LinkStream> {
    /// Reader over a link, with the link's read timeout taken from `config`.
    pub fn with_config_link(mut link: LinkStream, config: FrameConfig) -> Result<Self> {
        link.set_read_timeout(config.read_timeout)?;
        Ok(Self::new(link))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_frame;

    fn wire(frames: &[(u8, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (device_id, payload) in frames {
            encode_frame(*device_id, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_multiple_frames() {
        let bytes = wire(&[(1, b"one"), (2, b"two"), (3, b"three")]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.device_id, f1.payload.as_ref()), (1, b"one".as_ref()));
        assert_eq!((f2.device_id, f2.payload.as_ref()), (2, b"two".as_ref()));
        assert_eq!((f3.device_id, f3.payload.as_ref()), (3, b"three".as_ref()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[(4, b"slow")]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.device_id, 4);
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn corrupt_frame_in_stream_is_skipped() {
        let mut bytes = wire(&[(1, b"bad")]);
        bytes[5] ^= 0x20;
        bytes.extend(wire(&[(2, b"good")]));

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.device_id, 2);
        assert_eq!(reader.corrupt_frames(), 1);
    }

    #[test]
    fn connection_closed_mid_frame() {
        let bytes = wire(&[(2, b"only-part")]);
        let mut reader = FrameReader::new(Cursor::new(bytes[..6].to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            bytes: wire(&[(8, b"ok")]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.device_id, 8);
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    #[test]
    #[cfg(unix)]
    fn timeout_keeps_partial_frame() {
        let (hub, mut device) = LinkStream::pair().unwrap();
        let config = FrameConfig {
            read_timeout: Some(std::time::Duration::from_millis(20)),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_link(hub, config).unwrap();

        let bytes = wire(&[(6, b"split")]);
        std::io::Write::write_all(&mut device, &bytes[..5]).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        ));
        assert_eq!(reader.buffered_len(), 5);

        std::io::Write::write_all(&mut device, &bytes[5..]).unwrap();
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.device_id, 6);
        assert_eq!(frame.payload.as_ref(), b"split");
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let remaining = &self.bytes[self.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.pos += n;
            Ok(n)
        }
    }
}
