//! Chunked photo retrieval.
//!
//! A capture trigger is answered by a capture ack carrying a transfer id,
//! then the device announces how many chunks the photo spans. We ask for
//! all of them, fill gaps as they show up, and reassemble once every chunk
//! is in. Two timeouts keep a transfer moving: a short stall timeout that
//! re-requests whatever is missing, and a total timeout after which the
//! transfer is completed with whatever arrived.
//!
//! [`TransferReceiver`] is a plain state machine. Every entry point takes
//! the current time and returns the [`TransferAction`]s the caller has to
//! carry out (send a request, arm a timer, notify a subscriber).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::CaptureError;

/// Transfer id that addresses every stored photo in a clear.
pub const CLEAR_ALL: u8 = 0;

pub type CaptureResult = std::result::Result<u8, CaptureError>;

/// Published when a transfer completes, fully or by timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub device_id: u8,
    pub transfer_id: u8,
    pub payload: Bytes,
    /// False when the total timeout forced completion with chunks missing.
    pub complete: bool,
    /// Chunk indices absent from `payload`.
    pub missing: Vec<u32>,
    /// Chunks kept even though their byte sum disagreed with the device's
    /// checksum.
    pub checksum_mismatches: u32,
}

/// What is known locally about a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    NotFound,
    InProgress,
    Ready { payload: Bytes, complete: bool },
}

/// Side effects requested by [`TransferReceiver`].
#[derive(Debug)]
pub enum TransferAction {
    /// Ask the device for one chunk, or for all of them with the start index.
    Request { transfer_id: u8, index: u8 },
    /// Tell the device to drop a stored photo ([`CLEAR_ALL`] for every one).
    Clear { transfer_id: u8 },
    /// (Re)arm the stall timer; it should call `on_stall` with `generation`.
    ArmStall {
        transfer_id: u8,
        generation: u64,
        delay: Duration,
    },
    CancelStall { transfer_id: u8 },
    /// Arm the capture expiry check; it should call `on_capture_check`.
    ArmCaptureCheck { delay: Duration },
    Completed(TransferEvent),
    ResolveCapture {
        reply: Sender<CaptureResult>,
        result: CaptureResult,
    },
}

/// Completion handle for a capture trigger; resolves to the transfer id.
#[derive(Debug)]
pub struct CaptureHandle {
    receiver: Receiver<CaptureResult>,
}

impl CaptureHandle {
    pub(crate) fn new(receiver: Receiver<CaptureResult>) -> Self {
        Self { receiver }
    }

    /// Block until the capture is acknowledged, rejected or expires.
    pub fn wait(self) -> CaptureResult {
        self.receiver.recv().unwrap_or(Err(CaptureError::Shutdown))
    }

    /// Block for at most `timeout`; `None` if still waiting.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CaptureResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CaptureError::Shutdown)),
        }
    }

    /// Non-blocking check; `None` if still waiting.
    pub fn try_result(&self) -> Option<CaptureResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CaptureError::Shutdown)),
        }
    }
}

/// Fan-out of [`TransferEvent`]s to every live subscriber.
#[derive(Debug, Default)]
pub struct TransferListeners {
    senders: Mutex<Vec<Sender<TransferEvent>>>,
}

impl TransferListeners {
    pub fn subscribe(&self) -> Receiver<TransferEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event`, dropping subscribers whose receiver is gone.
    pub fn publish(&self, event: &TransferEvent) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Finished {
    payload: Bytes,
    complete: bool,
}

#[derive(Debug)]
struct TransferSession {
    total_chunks: u32,
    chunks: BTreeMap<u32, Bytes>,
    requested: BTreeSet<u32>,
    max_received: Option<u32>,
    started_at: Instant,
    last_chunk_at: Option<Instant>,
    stall_generation: u64,
    /// Chunks whose byte sum disagreed with the checksum the device sent.
    checksum_mismatches: u32,
    finished: Option<Finished>,
}

impl TransferSession {
    fn new(now: Instant) -> Self {
        Self {
            total_chunks: 0,
            chunks: BTreeMap::new(),
            requested: BTreeSet::new(),
            max_received: None,
            started_at: now,
            last_chunk_at: None,
            stall_generation: 0,
            checksum_mismatches: 0,
            finished: None,
        }
    }

    fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|index| !self.chunks.contains_key(index))
            .collect()
    }
}

#[derive(Debug)]
struct PendingCapture {
    reply: Sender<CaptureResult>,
    expires_at: Instant,
}

/// Transfer bookkeeping for one device.
#[derive(Debug)]
pub struct TransferReceiver {
    device_id: u8,
    config: TransferConfig,
    sessions: HashMap<u8, TransferSession>,
    pending: VecDeque<PendingCapture>,
    capture_check_armed: bool,
}

impl TransferReceiver {
    pub fn new(device_id: u8, config: TransferConfig) -> Self {
        Self {
            device_id,
            config,
            sessions: HashMap::new(),
            pending: VecDeque::new(),
            capture_check_armed: false,
        }
    }

    /// Queue a capture waiting for its ack. The trigger itself is sent by
    /// the caller, exactly once.
    pub fn begin_capture(&mut self, reply: Sender<CaptureResult>, now: Instant) -> Vec<TransferAction> {
        self.pending.push_back(PendingCapture {
            reply,
            expires_at: now + self.config.capture_timeout,
        });
        self.arm_capture_check(now).into_iter().collect()
    }

    /// Withdraw the most recent capture, used when its trigger never left.
    pub fn abandon_last_capture(&mut self) -> Option<Sender<CaptureResult>> {
        self.pending.pop_back().map(|pending| pending.reply)
    }

    /// Capture expiry timer fired.
    pub fn on_capture_check(&mut self, now: Instant) -> Vec<TransferAction> {
        self.capture_check_armed = false;
        let mut actions = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|pending| pending.expires_at <= now)
        {
            if let Some(expired) = self.pending.pop_front() {
                warn!(device = self.device_id, "capture request expired without ack");
                actions.push(TransferAction::ResolveCapture {
                    reply: expired.reply,
                    result: Err(CaptureError::TimedOut),
                });
            }
        }
        actions.extend(self.arm_capture_check(now));
        actions
    }

    /// Capture ack: matched against the oldest waiting capture.
    pub fn on_capture_ack(&mut self, transfer_id: u8, result: u8, now: Instant) -> Vec<TransferAction> {
        let Some(pending) = self.pending.pop_front() else {
            warn!(
                device = self.device_id,
                transfer = transfer_id,
                "capture ack with no waiting request, clearing device storage"
            );
            return vec![TransferAction::Clear {
                transfer_id: CLEAR_ALL,
            }];
        };

        let result = if result == 0 {
            self.open_session(transfer_id, now);
            info!(device = self.device_id, transfer = transfer_id, "capture acknowledged");
            Ok(transfer_id)
        } else {
            warn!(device = self.device_id, result, "capture rejected");
            Err(CaptureError::Rejected { result })
        };
        vec![TransferAction::ResolveCapture {
            reply: pending.reply,
            result,
        }]
    }

    /// Transfer info: record the chunk count, ask for every chunk and arm
    /// the stall timer in case none of them arrive.
    pub fn on_info(&mut self, transfer_id: u8, total_chunks: u32, now: Instant) -> Vec<TransferAction> {
        let device = self.device_id;
        let start_index = self.config.start_index;
        let stall_timeout = self.config.stall_timeout;
        let session = self.open_session(transfer_id, now);
        session.total_chunks = total_chunks;
        session.stall_generation += 1;
        debug!(device, transfer = transfer_id, total_chunks, "transfer announced");
        vec![
            TransferAction::Request {
                transfer_id,
                index: start_index,
            },
            TransferAction::ArmStall {
                transfer_id,
                generation: session.stall_generation,
                delay: stall_timeout,
            },
        ]
    }

    /// One chunk arrived.
    pub fn on_chunk(
        &mut self,
        transfer_id: u8,
        index: u32,
        data: Bytes,
        checksum: u8,
        now: Instant,
    ) -> Vec<TransferAction> {
        let device = self.device_id;
        let Some(session) = self.sessions.get_mut(&transfer_id) else {
            debug!(device, transfer = transfer_id, index, "chunk for unknown transfer");
            return vec![TransferAction::Clear { transfer_id }];
        };
        if data.len() != self.config.chunk_size {
            debug!(device, transfer = transfer_id, index, len = data.len(), "dropping chunk of wrong size");
            return Vec::new();
        }
        if session.finished.is_some() {
            debug!(device, transfer = transfer_id, index, "chunk after completion");
            return Vec::new();
        }
        if session.total_chunks > 0 && index >= session.total_chunks {
            debug!(device, transfer = transfer_id, index, "chunk index out of range");
            return Vec::new();
        }

        let sum = data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
        if sum != checksum {
            session.checksum_mismatches += 1;
            debug!(device, transfer = transfer_id, index, expected = checksum, actual = sum, "chunk checksum mismatch");
        }
        session.chunks.insert(index, data);
        session.last_chunk_at = Some(now);
        session.requested.remove(&index);
        debug!(device, transfer = transfer_id, index, "chunk received");

        let mut actions = Vec::new();
        let expected = session.max_received.map_or(0, |max| max + 1);
        if index > expected + self.config.gap_threshold {
            for missing in expected..index {
                if !session.chunks.contains_key(&missing) && session.requested.insert(missing) {
                    if let Ok(index) = u8::try_from(missing) {
                        actions.push(TransferAction::Request { transfer_id, index });
                    }
                }
            }
            debug!(device, transfer = transfer_id, from = expected, to = index, "gap detected");
        }
        if session.max_received.is_none_or(|max| index > max) {
            session.max_received = Some(index);
        }

        if session.total_chunks > 0 && session.chunks.len() as u32 == session.total_chunks {
            actions.extend(self.complete(transfer_id, false));
        } else {
            session.stall_generation += 1;
            actions.push(TransferAction::ArmStall {
                transfer_id,
                generation: session.stall_generation,
                delay: self.config.stall_timeout,
            });
        }
        actions
    }

    /// Stall timer fired.
    pub fn on_stall(&mut self, transfer_id: u8, generation: u64, now: Instant) -> Vec<TransferAction> {
        let Some(session) = self.sessions.get_mut(&transfer_id) else {
            return Vec::new();
        };
        if session.finished.is_some()
            || session.stall_generation != generation
            || session.total_chunks == 0
        {
            return Vec::new();
        }

        if now.saturating_duration_since(session.started_at) > self.config.total_timeout {
            return self.complete(transfer_id, true);
        }

        session.requested.clear();
        let missing = session.missing();
        if missing.is_empty() {
            return self.complete(transfer_id, false);
        }

        if session.chunks.is_empty() {
            warn!(
                device = self.device_id,
                transfer = transfer_id,
                "no chunks yet, repeating the start request"
            );
            session.stall_generation += 1;
            return vec![
                TransferAction::Request {
                    transfer_id,
                    index: self.config.start_index,
                },
                TransferAction::ArmStall {
                    transfer_id,
                    generation: session.stall_generation,
                    delay: self.config.stall_timeout,
                },
            ];
        }

        warn!(
            device = self.device_id,
            transfer = transfer_id,
            missing = missing.len(),
            "transfer stalled, re-requesting missing chunks"
        );
        let mut actions = Vec::with_capacity(missing.len() + 1);
        for index in missing {
            session.requested.insert(index);
            if let Ok(index) = u8::try_from(index) {
                actions.push(TransferAction::Request { transfer_id, index });
            }
        }
        session.stall_generation += 1;
        actions.push(TransferAction::ArmStall {
            transfer_id,
            generation: session.stall_generation,
            delay: self.config.stall_timeout,
        });
        actions
    }

    /// Local view of a transfer.
    pub fn result(&self, transfer_id: u8) -> TransferResult {
        match self.sessions.get(&transfer_id) {
            None => TransferResult::NotFound,
            Some(TransferSession {
                finished: Some(finished),
                ..
            }) => TransferResult::Ready {
                payload: finished.payload.clone(),
                complete: finished.complete,
            },
            Some(_) => TransferResult::InProgress,
        }
    }

    /// Drop local state for a transfer ([`CLEAR_ALL`] for every one) and
    /// ask the device to do the same.
    pub fn clear(&mut self, transfer_id: u8) -> Vec<TransferAction> {
        let removed: Vec<u8> = if transfer_id == CLEAR_ALL {
            self.sessions.drain().map(|(id, _)| id).collect()
        } else {
            self.sessions.remove(&transfer_id).map(|_| transfer_id).into_iter().collect()
        };
        let mut actions: Vec<_> = removed
            .into_iter()
            .map(|transfer_id| TransferAction::CancelStall { transfer_id })
            .collect();
        actions.push(TransferAction::Clear { transfer_id });
        actions
    }

    /// Fail every waiting capture, e.g. on shutdown.
    pub fn fail_pending(&mut self, error: CaptureError) -> Vec<TransferAction> {
        self.capture_check_armed = false;
        self.pending
            .drain(..)
            .map(|pending| TransferAction::ResolveCapture {
                reply: pending.reply,
                result: Err(error.clone()),
            })
            .collect()
    }

    /// Transfers still receiving chunks.
    pub fn active_transfers(&self) -> usize {
        self.sessions
            .values()
            .filter(|session| session.finished.is_none())
            .count()
    }

    /// Captures still waiting for their ack.
    pub fn pending_captures(&self) -> usize {
        self.pending.len()
    }

    /// When the last chunk of a transfer arrived.
    pub fn last_chunk_at(&self, transfer_id: u8) -> Option<Instant> {
        self.sessions.get(&transfer_id)?.last_chunk_at
    }

    fn arm_capture_check(&mut self, now: Instant) -> Option<TransferAction> {
        if self.capture_check_armed {
            return None;
        }
        let next = self.pending.front()?;
        self.capture_check_armed = true;
        let delay = next
            .expires_at
            .saturating_duration_since(now)
            .max(self.config.capture_recheck_floor);
        Some(TransferAction::ArmCaptureCheck { delay })
    }

    fn open_session(&mut self, transfer_id: u8, now: Instant) -> &mut TransferSession {
        let session = self
            .sessions
            .entry(transfer_id)
            .or_insert_with(|| TransferSession::new(now));
        // Device ids are recycled; a finished transfer under the same id is stale.
        if session.finished.is_some() {
            *session = TransferSession::new(now);
        }
        session
    }

    fn complete(&mut self, transfer_id: u8, forced: bool) -> Vec<TransferAction> {
        let device_id = self.device_id;
        let Some(session) = self.sessions.get_mut(&transfer_id) else {
            return Vec::new();
        };

        let missing = session.missing();
        if !forced && !missing.is_empty() {
            return Vec::new();
        }

        let mut payload = BytesMut::with_capacity(session.chunks.len() * self.config.chunk_size);
        for data in session.chunks.values() {
            payload.extend_from_slice(data);
        }
        let payload = payload.freeze();
        let complete = missing.is_empty();
        let checksum_mismatches = session.checksum_mismatches;

        session.stall_generation += 1;
        session.finished = Some(Finished {
            payload: payload.clone(),
            complete,
        });

        if complete {
            info!(
                device = device_id,
                transfer = transfer_id,
                bytes = payload.len(),
                checksum_mismatches,
                "transfer complete"
            );
        } else {
            warn!(
                device = device_id,
                transfer = transfer_id,
                missing = missing.len(),
                "transfer timed out, completing with missing chunks"
            );
        }

        vec![
            TransferAction::CancelStall { transfer_id },
            TransferAction::Completed(TransferEvent {
                device_id,
                transfer_id,
                payload,
                complete,
                missing,
                checksum_mismatches,
            }),
            TransferAction::Clear { transfer_id },
        ]
    }
}
