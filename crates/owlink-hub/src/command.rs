use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use owlink_message::CommandKind;

use crate::config::RetryPolicy;
use crate::error::CommandError;

/// Timestamp tags are 23 bits so they survive a round trip through an `f32`
/// command parameter.
pub const TAG_MASK: u32 = 0x7F_FFFF;

/// Ack result code: the device received the command.
pub const ACK_RECEIVED: u8 = 1;
/// Ack result code: the device finished executing the command.
pub const ACK_FINISHED: u8 = 2;
/// Ack result code: the device refused the command.
pub const ACK_ERROR: u8 = 3;

/// Derive a timestamp tag from wall-clock milliseconds.
pub fn timestamp_tag(now: SystemTime) -> u32 {
    let millis = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    (millis as u32) & TAG_MASK
}

/// Lifecycle of one submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Received,
    Finished,
    Error,
    Superseded,
    TimedOut,
}

impl CommandStatus {
    /// Whether acks may still change this record.
    pub fn accepts_acks(self) -> bool {
        matches!(self, Self::Pending | Self::Received)
    }
}

/// Local bookkeeping for one submitted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub kind: CommandKind,
    pub sequence: u32,
    pub tag: u32,
    pub receive_count: u32,
    pub finish_count: u32,
    pub status: CommandStatus,
    pub created_at: Instant,
    pub last_update_at: Instant,
}

impl CommandRecord {
    pub fn new(kind: CommandKind, sequence: u32, tag: u32, now: Instant) -> Self {
        Self {
            kind,
            sequence,
            tag,
            receive_count: 0,
            finish_count: 0,
            status: CommandStatus::Pending,
            created_at: now,
            last_update_at: now,
        }
    }

    /// Whether an ack for `command` carrying `tag` belongs to this record.
    ///
    /// Acks without a tag match every record of the same command id.
    pub fn matches(&self, command: u16, tag: Option<u32>) -> bool {
        self.kind.id() == command
            && self.status.accepts_acks()
            && tag.is_none_or(|tag| tag == self.tag)
    }

    /// Apply one ack result. Returns true if the status changed.
    pub fn apply_ack(&mut self, result: u8, now: Instant) -> bool {
        let before = self.status;
        self.last_update_at = now;
        match result {
            ACK_RECEIVED => {
                self.receive_count += 1;
                if self.status == CommandStatus::Pending {
                    self.status = CommandStatus::Received;
                }
            }
            ACK_FINISHED => {
                self.finish_count += 1;
                self.status = CommandStatus::Finished;
            }
            ACK_ERROR => self.status = CommandStatus::Error,
            _ => {}
        }
        self.status != before
    }
}

/// A command to submit to one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandRequest {
    pub kind: CommandKind,
    /// Parameters 1-6; parameter 7 carries the timestamp tag.
    pub params: [f32; 6],
    /// Succeed only on FINISH instead of the first RECEIVE.
    pub wait_for_finish: bool,
    /// Caller-chosen tag, masked to 23 bits. Defaults to wall-clock millis,
    /// bumped past any tag the endpoint still holds a record for.
    pub tag: Option<u32>,
    /// Overrides the endpoint's default retry policy.
    pub policy: Option<RetryPolicy>,
}

impl CommandRequest {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            params: [0.0; 6],
            wait_for_finish: false,
            tag: None,
            policy: None,
        }
    }

    /// Set parameter `index` (1-6). Out-of-range indices are ignored.
    pub fn param(mut self, index: usize, value: f32) -> Self {
        if let Some(slot) = index.checked_sub(1).and_then(|i| self.params.get_mut(i)) {
            *slot = value;
        }
        self
    }

    pub fn params(mut self, params: [f32; 6]) -> Self {
        self.params = params;
        self
    }

    pub fn wait_for_finish(mut self, wait: bool) -> Self {
        self.wait_for_finish = wait;
        self
    }

    pub fn tag(mut self, tag: u32) -> Self {
        self.tag = Some(tag & TAG_MASK);
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// How a successful command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub kind: CommandKind,
    pub sequence: u32,
    pub tag: u32,
    /// `Received` or `Finished`.
    pub status: CommandStatus,
    pub attempts: u32,
    pub elapsed: Duration,
}

pub type CommandResult = std::result::Result<CommandOutcome, CommandError>;

/// Completion handle for a submitted command.
#[derive(Debug)]
pub struct CommandHandle {
    kind: CommandKind,
    sequence: u32,
    tag: u32,
    receiver: Receiver<CommandResult>,
}

impl CommandHandle {
    pub(crate) fn new(
        kind: CommandKind,
        sequence: u32,
        tag: u32,
        receiver: Receiver<CommandResult>,
    ) -> Self {
        Self {
            kind,
            sequence,
            tag,
            receiver,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Block until the command resolves.
    pub fn wait(self) -> CommandResult {
        self.receiver.recv().unwrap_or(Err(CommandError::Shutdown))
    }

    /// Block for at most `timeout`; `None` if still in flight.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(CommandError::Shutdown)),
        }
    }

    /// Non-blocking check; `None` if still in flight.
    pub fn try_result(&self) -> Option<CommandResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CommandError::Shutdown)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn record() -> CommandRecord {
        CommandRecord::new(CommandKind::ArmDisarm, 1, 4242, Instant::now())
    }

    #[test]
    fn repeated_receive_transitions_once() {
        let mut record = record();
        let now = Instant::now();

        let transitions: Vec<_> = (0..3).map(|_| record.apply_ack(ACK_RECEIVED, now)).collect();
        assert_eq!(transitions, vec![true, false, false]);
        assert_eq!(record.status, CommandStatus::Received);
        assert_eq!(record.receive_count, 3);
    }

    #[test]
    fn finish_after_receive_and_error_wins() {
        let mut record = record();
        let now = Instant::now();
        record.apply_ack(ACK_RECEIVED, now);
        assert!(record.apply_ack(ACK_FINISHED, now));
        assert!(!record.apply_ack(ACK_FINISHED, now));
        assert_eq!(record.finish_count, 2);

        let mut rejected = self::record();
        assert!(rejected.apply_ack(ACK_ERROR, now));
        assert_eq!(rejected.status, CommandStatus::Error);
    }

    #[test]
    fn matching_uses_command_tag_and_state() {
        let mut record = record();
        assert!(record.matches(400, Some(4242)));
        assert!(record.matches(400, None));
        assert!(!record.matches(400, Some(4243)));
        assert!(!record.matches(20, Some(4242)));

        record.status = CommandStatus::Superseded;
        assert!(!record.matches(400, Some(4242)));
        record.status = CommandStatus::Received;
        assert!(record.matches(400, Some(4242)));
    }

    #[test]
    fn tags_fit_in_23_bits() {
        let tag = timestamp_tag(SystemTime::now());
        assert!(tag <= TAG_MASK);
        assert_eq!(CommandRequest::new(CommandKind::ArmDisarm).tag(u32::MAX).tag, Some(TAG_MASK));
        assert_eq!(timestamp_tag(UNIX_EPOCH + Duration::from_millis(0x80_0001)), 1);
    }

    #[test]
    fn request_builder_sets_params() {
        let request = CommandRequest::new(CommandKind::Custom(31010))
            .param(1, 3.0)
            .param(6, 9.5)
            .param(7, 1.0)
            .wait_for_finish(true);
        assert_eq!(request.params, [3.0, 0.0, 0.0, 0.0, 0.0, 9.5]);
        assert!(request.wait_for_finish);
    }

    #[test]
    fn handle_reports_shutdown_when_sender_dropped() {
        let (tx, rx) = mpsc::channel();
        let handle = CommandHandle::new(CommandKind::ArmDisarm, 1, 2, rx);
        assert!(handle.try_result().is_none());
        drop(tx);
        assert_eq!(handle.wait(), Err(CommandError::Shutdown));
    }
}
