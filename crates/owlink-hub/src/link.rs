use std::io::Write;
use std::sync::{Mutex, PoisonError};

use owlink_frame::FrameWriter;

/// Write side of the shared link.
///
/// Implementations serialize callers: the frames of one `send` call reach
/// the wire back to back, never interleaved with another call's frames.
pub trait FrameSink: Send + Sync {
    /// Send `bytes` to a device, split over as many frames as needed.
    fn send(&self, device_id: u8, bytes: &[u8]) -> owlink_frame::Result<()>;
}

impl<T: Write + Send> FrameSink for Mutex<FrameWriter<T>> {
    fn send(&self, device_id: u8, bytes: &[u8]) -> owlink_frame::Result<()> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send_split(device_id, bytes)
            .map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::RwLock;

    use bytes::BytesMut;
    use owlink_message::{Message, MessageCodec, PackedCodec};

    use super::*;

    /// Records every sent message per device instead of touching a link.
    ///
    /// Holding `gate` for writing makes every `send` block, like a link
    /// that has stopped draining.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        sent: Mutex<Vec<(u8, Message)>>,
        pub(crate) fail: AtomicBool,
        pub(crate) gate: RwLock<()>,
    }

    impl RecordingSink {
        pub(crate) fn messages(&self) -> Vec<(u8, Message)> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub(crate) fn clear(&self) {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl FrameSink for RecordingSink {
        fn send(&self, device_id: u8, bytes: &[u8]) -> owlink_frame::Result<()> {
            let _open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            if self.fail.load(Ordering::SeqCst) {
                return Err(owlink_frame::FrameError::ConnectionClosed);
            }
            let mut buf = BytesMut::from(bytes);
            let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
            while let Ok(Some(message)) = PackedCodec.decode(&mut buf) {
                sent.push((device_id, message));
            }
            Ok(())
        }
    }
}
