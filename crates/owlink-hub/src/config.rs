use std::time::Duration;

/// Retry behavior for acknowledged commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of send attempts; 0 behaves like 1.
    pub max_retries: u32,
    /// How long to wait for an ack before resending.
    pub retry_interval: Duration,
    /// Total time budget since submission, across all attempts. Capped at
    /// the endpoint's `record_ttl`.
    pub timeout: Duration,
    /// Upper bound on one wait step while polling for an ack.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub(crate) fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Per-device command handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Default retry policy for submitted commands.
    pub retry: RetryPolicy,
    /// When true, a new command supersedes every still-pending one.
    pub queue_mode: bool,
    /// Age after which command records are swept regardless of state. Also
    /// the longest a command may wait for its ack.
    pub record_ttl: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            queue_mode: true,
            record_ttl: Duration::from_secs(10),
        }
    }
}

/// Chunked photo transfer timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Silence after the last chunk before missing chunks are re-requested.
    pub stall_timeout: Duration,
    /// Age after which a stalled transfer is force-completed.
    pub total_timeout: Duration,
    /// Tolerated index jump before gap-fill requests go out.
    pub gap_threshold: u32,
    /// How long a capture trigger waits for its ack.
    pub capture_timeout: Duration,
    /// Minimum delay between capture expiry checks.
    pub capture_recheck_floor: Duration,
    /// Data bytes per chunk.
    pub chunk_size: usize,
    /// Chunk index that asks the device to start sending every chunk.
    pub start_index: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_millis(300),
            total_timeout: Duration::from_secs(6),
            gap_threshold: 3,
            capture_timeout: Duration::from_secs(20),
            capture_recheck_floor: Duration::from_millis(100),
            chunk_size: owlink_message::PHOTO_CHUNK_SIZE,
            start_index: 255,
        }
    }
}

/// Hub-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub endpoint: EndpointConfig,
    pub transfer: TransferConfig,
    /// Period of the ground-station heartbeat sent to every known device.
    pub heartbeat_interval: Duration,
    /// Whether the heartbeat loop sends anything.
    pub heartbeat_enabled: bool,
    /// Threads available to run command retry loops.
    pub worker_threads: usize,
    /// Link read timeout; bounds how long shutdown waits on the reader.
    pub read_timeout: Duration,
    /// Link write timeout, if any.
    pub write_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            transfer: TransferConfig::default(),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_enabled: true,
            worker_threads: 16,
            read_timeout: Duration::from_millis(100),
            write_timeout: Some(Duration::from_secs(1)),
        }
    }
}
