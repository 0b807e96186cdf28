//! One remote device: command lifecycle, device state and photo transfers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant, SystemTime};

use bytes::BytesMut;
use owlink_message::{CommandAck, CommandKind, CommandLong, Heartbeat, Message, MessageCodec};
use tracing::{debug, error, info, warn};

use crate::command::{
    timestamp_tag, CommandHandle, CommandOutcome, CommandRecord, CommandRequest, CommandResult,
    CommandStatus, TAG_MASK,
};
use crate::config::{EndpointConfig, RetryPolicy, TransferConfig};
use crate::error::{CaptureError, CommandError, Result};
use crate::link::FrameSink;
use crate::pool::WorkerPool;
use crate::scheduler::{Scheduler, TimerId};
use crate::state::{CachedMessage, DeviceState, LandedState, MessageCache, Position};
use crate::transfer::{
    CaptureHandle, TransferAction, TransferListeners, TransferReceiver, TransferResult,
};

/// Threads and fan-out shared by every endpoint of a hub.
pub(crate) struct Runtime {
    pub(crate) scheduler: Scheduler,
    pub(crate) pool: WorkerPool,
    /// Writes queued from the reader thread and timers.
    pub(crate) outbox: WorkerPool,
    pub(crate) listeners: TransferListeners,
}

impl Runtime {
    pub(crate) fn new(worker_threads: usize) -> Result<Self> {
        Ok(Self {
            scheduler: Scheduler::new()?,
            pool: WorkerPool::new(worker_threads)?,
            outbox: WorkerPool::named("outbox", 1)?,
            listeners: TransferListeners::default(),
        })
    }

    pub(crate) fn shutdown(&self) {
        self.scheduler.shutdown();
        self.pool.shutdown();
        self.outbox.shutdown();
    }
}

struct EndpointState {
    records: HashMap<u32, CommandRecord>,
    last_tag: u32,
    device: DeviceState,
    cache: MessageCache,
    inbound: BytesMut,
    transfers: TransferReceiver,
    stall_timers: HashMap<u8, TimerId>,
    capture_timer: Option<TimerId>,
}

/// Everything the hub knows about one device.
///
/// Inbound payloads arrive through [`Endpoint::ingest`] from the reader
/// thread, which never writes to the link: chunk requests, clears and
/// heartbeats it triggers go to the hub's outbox thread. Commands are
/// retried on the hub's worker pool and transfer timers run on the hub's
/// scheduler. All mutable state sits behind one lock per endpoint, so
/// devices never contend with each other.
pub struct Endpoint {
    me: Weak<Endpoint>,
    device_id: u8,
    config: EndpointConfig,
    codec: Arc<dyn MessageCodec>,
    sink: Arc<dyn FrameSink>,
    runtime: Arc<Runtime>,
    state: Mutex<EndpointState>,
    changed: Condvar,
    next_sequence: AtomicU32,
    decode_errors: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("device_id", &self.device_id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub(crate) fn new(
        device_id: u8,
        config: EndpointConfig,
        transfer: TransferConfig,
        codec: Arc<dyn MessageCodec>,
        sink: Arc<dyn FrameSink>,
        runtime: Arc<Runtime>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            device_id,
            config,
            codec,
            sink,
            runtime,
            state: Mutex::new(EndpointState {
                records: HashMap::new(),
                last_tag: 0,
                device: DeviceState::default(),
                cache: MessageCache::default(),
                inbound: BytesMut::new(),
                transfers: TransferReceiver::new(device_id, transfer),
                stall_timers: HashMap::new(),
                capture_timer: None,
            }),
            changed: Condvar::new(),
            next_sequence: AtomicU32::new(1),
            decode_errors: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- commands ---

    /// Submit a command. Returns immediately; the retry loop runs on the
    /// worker pool and resolves the handle.
    pub fn submit(&self, request: CommandRequest) -> CommandHandle {
        let now = Instant::now();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let policy = self.effective_policy(request.policy.unwrap_or(self.config.retry));
        let (reply, receiver) = mpsc::channel();

        if self.is_closed() {
            let tag = request.tag.unwrap_or_default() & TAG_MASK;
            let _ = reply.send(Err(CommandError::Shutdown));
            return CommandHandle::new(request.kind, sequence, tag, receiver);
        }

        let tag = {
            let mut state = self.lock();
            let tag = match request.tag {
                Some(tag) => tag & TAG_MASK,
                None => Self::next_tag(&mut state, timestamp_tag(SystemTime::now())),
            };
            if self.config.queue_mode {
                for record in state
                    .records
                    .values_mut()
                    .filter(|record| record.status == CommandStatus::Pending)
                {
                    record.status = CommandStatus::Superseded;
                    record.last_update_at = now;
                    warn!(
                        device = self.device_id,
                        command = %record.kind,
                        seq = record.sequence,
                        superseded_by = sequence,
                        "command superseded"
                    );
                }
            }
            state
                .records
                .insert(sequence, CommandRecord::new(request.kind, sequence, tag, now));
            Self::sweep_locked(&mut state, now, self.config.record_ttl);
            tag
        };
        self.changed.notify_all();
        let handle = CommandHandle::new(request.kind, sequence, tag, receiver);

        let Some(me) = self.me.upgrade() else {
            let _ = reply.send(Err(CommandError::Shutdown));
            return handle;
        };
        let job = move || {
            let result = me.drive(sequence, tag, &request, policy);
            let _ = reply.send(result);
        };
        if self.runtime.pool.execute(job).is_err() {
            // The job and its reply sender were dropped; the handle reports shutdown.
            debug!(device = self.device_id, seq = sequence, "worker pool closed");
        }
        handle
    }

    /// Records are swept once they reach `record_ttl`, so no retry loop may
    /// wait longer than that.
    fn effective_policy(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if policy.timeout > self.config.record_ttl {
            debug!(
                device = self.device_id,
                requested = ?policy.timeout,
                ttl = ?self.config.record_ttl,
                "command timeout capped at record ttl"
            );
            policy.timeout = self.config.record_ttl;
        }
        policy
    }

    /// A tag newer than the last one handed out and not held by any kept
    /// record, so a late ack for an older command cannot match a newer one.
    fn next_tag(state: &mut EndpointState, clock_tag: u32) -> u32 {
        let mut tag = clock_tag.max(state.last_tag.wrapping_add(1)) & TAG_MASK;
        while state.records.values().any(|record| record.tag == tag) {
            tag = tag.wrapping_add(1) & TAG_MASK;
        }
        state.last_tag = tag;
        tag
    }

    fn drive(
        &self,
        sequence: u32,
        tag: u32,
        request: &CommandRequest,
        policy: RetryPolicy,
    ) -> CommandResult {
        let started = Instant::now();
        let attempts = policy.attempts();

        for attempt in 1..=attempts {
            if attempt > 1 {
                warn!(
                    device = self.device_id,
                    command = %request.kind,
                    seq = sequence,
                    attempt,
                    "no ack, retrying"
                );
            }
            debug!(device = self.device_id, command = %request.kind, seq = sequence, tag, attempt, "sending command");

            if let Err(err) = self.send_command(request, tag, attempt) {
                self.lock().records.remove(&sequence);
                error!(device = self.device_id, command = %request.kind, seq = sequence, error = %err, "command send failed");
                return Err(CommandError::Link(err.to_string()));
            }

            let attempt_started = Instant::now();
            let mut state = self.lock();
            loop {
                if let Some(result) =
                    self.evaluate(&state, sequence, request, attempt, started)
                {
                    drop(state);
                    self.report(request.kind, sequence, &result);
                    return result;
                }

                let elapsed = started.elapsed();
                if elapsed >= policy.timeout {
                    Self::mark_timed_out(&mut state, sequence);
                    drop(state);
                    let result = Err(CommandError::TimedOut { attempts: attempt, elapsed });
                    self.report(request.kind, sequence, &result);
                    return result;
                }

                let waited = attempt_started.elapsed();
                if waited >= policy.retry_interval {
                    break;
                }
                let step = policy
                    .poll_interval
                    .min(policy.retry_interval - waited)
                    .min(policy.timeout - elapsed);
                state = self
                    .changed
                    .wait_timeout(state, step)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }

        Self::mark_timed_out(&mut self.lock(), sequence);
        let result = Err(CommandError::TimedOut {
            attempts,
            elapsed: started.elapsed(),
        });
        self.report(request.kind, sequence, &result);
        result
    }

    fn evaluate(
        &self,
        state: &EndpointState,
        sequence: u32,
        request: &CommandRequest,
        attempts: u32,
        started: Instant,
    ) -> Option<CommandResult> {
        if self.is_closed() {
            return Some(Err(CommandError::Shutdown));
        }
        let Some(record) = state.records.get(&sequence) else {
            return Some(Err(CommandError::TimedOut {
                attempts,
                elapsed: started.elapsed(),
            }));
        };
        let outcome = || CommandOutcome {
            kind: record.kind,
            sequence,
            tag: record.tag,
            status: record.status,
            attempts,
            elapsed: started.elapsed(),
        };
        match record.status {
            CommandStatus::Pending => None,
            CommandStatus::Received if request.wait_for_finish => None,
            CommandStatus::Received | CommandStatus::Finished => Some(Ok(outcome())),
            CommandStatus::Error => Some(Err(CommandError::Rejected)),
            CommandStatus::Superseded => Some(Err(CommandError::Superseded)),
            CommandStatus::TimedOut => Some(Err(CommandError::TimedOut {
                attempts,
                elapsed: started.elapsed(),
            })),
        }
    }

    fn report(&self, kind: CommandKind, sequence: u32, result: &CommandResult) {
        let device = self.device_id;
        match result {
            Ok(outcome) => info!(
                device,
                command = %kind,
                seq = sequence,
                status = ?outcome.status,
                attempts = outcome.attempts,
                "command acknowledged"
            ),
            Err(CommandError::Superseded) => {
                debug!(device, command = %kind, seq = sequence, "stopped waiting on superseded command")
            }
            Err(err) => error!(device, command = %kind, seq = sequence, error = %err, "command failed"),
        }
    }

    fn mark_timed_out(state: &mut EndpointState, sequence: u32) {
        if let Some(record) = state.records.get_mut(&sequence) {
            if record.status.accepts_acks() {
                record.status = CommandStatus::TimedOut;
                record.last_update_at = Instant::now();
            }
        }
    }

    fn send_command(&self, request: &CommandRequest, tag: u32, attempt: u32) -> Result<()> {
        let mut params = [0.0; 7];
        params[..6].copy_from_slice(&request.params);
        params[6] = tag as f32;
        self.send_message(&Message::CommandLong(CommandLong {
            command: request.kind.id(),
            target_system: self.device_id,
            target_component: 1,
            confirmation: u8::try_from(attempt - 1).unwrap_or(u8::MAX),
            params,
        }))
    }

    /// Apply a command ack. Returns how many records changed status.
    pub fn on_ack(&self, ack: &CommandAck) -> usize {
        let transitions = {
            let mut state = self.lock();
            let now = Instant::now();
            let transitions = Self::apply_ack_locked(self.device_id, &mut state, ack, now);
            Self::sweep_locked(&mut state, now, self.config.record_ttl);
            transitions
        };
        self.changed.notify_all();
        transitions
    }

    fn apply_ack_locked(
        device: u8,
        state: &mut EndpointState,
        ack: &CommandAck,
        now: Instant,
    ) -> usize {
        let tag = ack.result_param2.map(|param| (param as u32) & TAG_MASK);
        let mut matched = 0;
        let mut transitions = 0;
        for record in state
            .records
            .values_mut()
            .filter(|record| record.matches(ack.command, tag))
        {
            matched += 1;
            if record.apply_ack(ack.result, now) {
                transitions += 1;
                debug!(
                    device,
                    command = %record.kind,
                    seq = record.sequence,
                    status = ?record.status,
                    "command status changed"
                );
            }
        }
        if matched == 0 {
            debug!(device, command = ack.command, ?tag, result = ack.result, "ack matched no waiting command");
        }
        transitions
    }

    /// Send a command exactly once, with a fresh tag and no record.
    pub fn send_once(&self, kind: CommandKind, params: [f32; 6]) -> Result<u32> {
        let tag = timestamp_tag(SystemTime::now());
        let mut all = [0.0; 7];
        all[..6].copy_from_slice(&params);
        all[6] = tag as f32;
        self.send_message(&Message::CommandLong(CommandLong {
            command: kind.id(),
            target_system: self.device_id,
            target_component: 1,
            confirmation: 0,
            params: all,
        }))?;
        debug!(device = self.device_id, command = %kind, tag, "sent once");
        Ok(tag)
    }

    /// Encode and send any message to this device.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        let mut buf = BytesMut::new();
        self.codec.encode(message, &mut buf)?;
        self.sink.send(self.device_id, &buf)?;
        Ok(())
    }

    pub fn send_heartbeat(&self) -> Result<()> {
        self.send_message(&Message::Heartbeat(Heartbeat::ground_station()))
    }

    /// Queue a heartbeat on the outbox instead of writing from this thread.
    pub(crate) fn queue_heartbeat(&self) {
        self.queue(move |endpoint| {
            if let Err(err) = endpoint.send_heartbeat() {
                warn!(device = endpoint.device_id, error = %err, "heartbeat failed");
            }
        });
    }

    fn queue(&self, job: impl FnOnce(&Endpoint) + Send + 'static) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        if self.runtime.outbox.execute(move || job(&me)).is_err() {
            debug!(device = self.device_id, "outbox closed, dropping send");
        }
    }

    /// Ask the device to report its software and board versions.
    pub fn request_autopilot_version(&self) -> Result<u32> {
        self.send_once(
            CommandKind::RequestAutopilotCapabilities,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Status of a submitted command, while its record is kept.
    pub fn record(&self, sequence: u32) -> Option<CommandRecord> {
        self.lock().records.get(&sequence).cloned()
    }

    /// Commands still waiting for an ack.
    pub fn pending_commands(&self) -> usize {
        self.lock()
            .records
            .values()
            .filter(|record| record.status.accepts_acks())
            .count()
    }

    /// Drop command records older than the configured ttl.
    pub fn sweep_records(&self, now: Instant) -> usize {
        Self::sweep_locked(&mut self.lock(), now, self.config.record_ttl)
    }

    fn sweep_locked(state: &mut EndpointState, now: Instant, ttl: Duration) -> usize {
        let before = state.records.len();
        state
            .records
            .retain(|_, record| now.saturating_duration_since(record.created_at) < ttl);
        before - state.records.len()
    }

    // --- inbound ---

    /// Feed one frame payload. Messages may span several frames.
    pub fn ingest(&self, payload: &[u8]) {
        let now = Instant::now();
        let mut state = self.lock();
        state.inbound.extend_from_slice(payload);

        let mut acked = false;
        loop {
            let message = match self.codec.decode(&mut state.inbound) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    self.decode_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(device = self.device_id, error = %err, "dropping undecodable message");
                    continue;
                }
            };
            acked |= matches!(message, Message::CommandAck(_));
            self.handle_message(&mut state, message, now);
        }
        drop(state);

        if acked {
            self.changed.notify_all();
        }
    }

    fn handle_message(&self, state: &mut EndpointState, message: Message, now: Instant) {
        let device = self.device_id;
        state.cache.insert(&message, now);

        let actions = match &message {
            Message::Heartbeat(hb) => {
                state.device.apply_heartbeat(hb);
                Vec::new()
            }
            Message::ExtendedSysState(ext) => {
                state.device.landed = LandedState::from_code(ext.landed_state);
                Vec::new()
            }
            Message::GlobalPosition(pos) => {
                state.device.position = Some(Position::from(pos));
                Vec::new()
            }
            Message::AutopilotVersion(version) => {
                state.device.apply_version(version);
                info!(device, version = ?state.device.software_version, "autopilot version");
                Vec::new()
            }
            Message::StatusText(text) => {
                info!(device, severity = text.severity, text = %text.text, "device status");
                Vec::new()
            }
            Message::BatteryStatus(battery) => {
                debug!(device, voltage_mv = battery.voltage_mv, remaining = battery.remaining, "battery");
                Vec::new()
            }
            Message::CommandAck(ack) => {
                Self::apply_ack_locked(device, state, ack, now);
                Self::sweep_locked(state, now, self.config.record_ttl);
                Vec::new()
            }
            Message::PhotoAck(ack) => state.transfers.on_capture_ack(ack.photo_id, ack.result, now),
            Message::PhotoInfo(photo) => {
                state
                    .transfers
                    .on_info(photo.photo_id, u32::from(photo.total), now)
            }
            Message::PhotoChunk(chunk) => state.transfers.on_chunk(
                chunk.photo_id,
                u32::from(chunk.index),
                chunk.data.clone(),
                chunk.checksum,
                now,
            ),
            Message::Attitude(_) | Message::CommandLong(_) | Message::Unknown { .. } => Vec::new(),
        };
        self.apply(state, actions);
    }

    /// Snapshot of the device's last reported state.
    pub fn state(&self) -> DeviceState {
        let state = self.lock();
        DeviceState {
            cached_messages: state.cache.len(),
            ..state.device.clone()
        }
    }

    /// Last message received with `id`.
    pub fn cached(&self, id: u16) -> Option<CachedMessage> {
        self.lock().cache.get(id).cloned()
    }

    /// Messages that failed to decode so far.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    // --- transfers ---

    /// Trigger a capture. The trigger is sent exactly once; the handle
    /// resolves to the transfer id once the device acknowledges it.
    pub fn trigger_capture(&self) -> CaptureHandle {
        let (reply, receiver) = mpsc::channel();
        let handle = CaptureHandle::new(receiver);
        if self.is_closed() {
            let _ = reply.send(Err(CaptureError::Shutdown));
            return handle;
        }

        let mut state = self.lock();
        let actions = state.transfers.begin_capture(reply, Instant::now());
        self.apply(&mut state, actions);

        if let Err(err) = self.send_once(CommandKind::TakePhoto, [0.0; 6]) {
            warn!(device = self.device_id, error = %err, "capture trigger send failed");
            if let Some(reply) = state.transfers.abandon_last_capture() {
                let _ = reply.send(Err(CaptureError::Link(err.to_string())));
            }
        }
        handle
    }

    pub fn transfer_result(&self, transfer_id: u8) -> TransferResult {
        self.lock().transfers.result(transfer_id)
    }

    /// Drop a transfer locally and ask the device to free it (0 for all).
    pub fn clear_transfers(&self, transfer_id: u8) {
        let mut state = self.lock();
        let actions = state.transfers.clear(transfer_id);
        self.apply(&mut state, actions);
    }

    pub fn active_transfers(&self) -> usize {
        self.lock().transfers.active_transfers()
    }

    pub fn pending_captures(&self) -> usize {
        self.lock().transfers.pending_captures()
    }

    fn on_stall_timer(&self, transfer_id: u8, generation: u64) {
        let mut state = self.lock();
        let actions = state
            .transfers
            .on_stall(transfer_id, generation, Instant::now());
        self.apply(&mut state, actions);
    }

    fn on_capture_timer(&self) {
        let mut state = self.lock();
        state.capture_timer = None;
        let actions = state.transfers.on_capture_check(Instant::now());
        self.apply(&mut state, actions);
    }

    fn apply(&self, state: &mut EndpointState, actions: Vec<TransferAction>) {
        for action in actions {
            match action {
                TransferAction::Request { transfer_id, index } => {
                    let params = [f32::from(transfer_id), f32::from(index), 0.0, 0.0, 0.0, 0.0];
                    self.queue(move |endpoint| {
                        if let Err(err) = endpoint.send_once(CommandKind::PhotoRequest, params) {
                            warn!(device = endpoint.device_id, transfer = transfer_id, index, error = %err, "chunk request failed");
                        }
                    });
                }
                TransferAction::Clear { transfer_id } => {
                    let params = [f32::from(transfer_id), 0.0, 0.0, 0.0, 0.0, 0.0];
                    self.queue(move |endpoint| {
                        if let Err(err) = endpoint.send_once(CommandKind::PhotoClear, params) {
                            warn!(device = endpoint.device_id, transfer = transfer_id, error = %err, "clear failed");
                        }
                    });
                }
                TransferAction::ArmStall {
                    transfer_id,
                    generation,
                    delay,
                } => {
                    if let Some(timer) = state.stall_timers.remove(&transfer_id) {
                        self.runtime.scheduler.cancel(timer);
                    }
                    let me = self.me.clone();
                    let timer = self.runtime.scheduler.schedule(delay, move || {
                        if let Some(endpoint) = me.upgrade() {
                            endpoint.on_stall_timer(transfer_id, generation);
                        }
                    });
                    state.stall_timers.insert(transfer_id, timer);
                }
                TransferAction::CancelStall { transfer_id } => {
                    if let Some(timer) = state.stall_timers.remove(&transfer_id) {
                        self.runtime.scheduler.cancel(timer);
                    }
                }
                TransferAction::ArmCaptureCheck { delay } => {
                    if let Some(timer) = state.capture_timer.take() {
                        self.runtime.scheduler.cancel(timer);
                    }
                    let me = self.me.clone();
                    let timer = self.runtime.scheduler.schedule(delay, move || {
                        if let Some(endpoint) = me.upgrade() {
                            endpoint.on_capture_timer();
                        }
                    });
                    state.capture_timer = Some(timer);
                }
                TransferAction::Completed(event) => self.runtime.listeners.publish(&event),
                TransferAction::ResolveCapture { reply, result } => {
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Stop the endpoint: waiting commands and captures fail with a
    /// shutdown error and timers are cancelled.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.lock();
            let actions = state.transfers.fail_pending(CaptureError::Shutdown);
            for (_, timer) in state.stall_timers.drain() {
                self.runtime.scheduler.cancel(timer);
            }
            if let Some(timer) = state.capture_timer.take() {
                self.runtime.scheduler.cancel(timer);
            }
            for action in actions {
                if let TransferAction::ResolveCapture { reply, result } = action {
                    let _ = reply.send(result);
                }
            }
        }
        self.changed.notify_all();
        debug!(device = self.device_id, "endpoint closed");
    }
}
