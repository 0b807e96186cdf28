use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

use owlink_frame::{
    is_valid_device_id, Frame, FrameConfig, FrameError, FrameReader, FrameWriter, DEVICE_COUNT,
};
use owlink_message::{MessageCodec, PackedCodec};
use owlink_transport::{LinkAddress, LinkStream};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{CommandHandle, CommandRequest};
use crate::config::HubConfig;
use crate::endpoint::{Endpoint, Runtime};
use crate::error::{HubError, Result};
use crate::link::FrameSink;
use crate::state::{DeviceState, FlightMode, LandedState, Position};
use crate::transfer::{CaptureHandle, TransferEvent, TransferResult};

type Slots = [Option<Arc<Endpoint>>; DEVICE_COUNT];

/// Per-device line of [`HubStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStats {
    pub device_id: u8,
    pub armed: bool,
    pub flight_mode: FlightMode,
    pub landed: LandedState,
    pub position: Option<Position>,
    pub cached_messages: usize,
    pub pending_commands: usize,
    pub active_transfers: usize,
    pub pending_captures: usize,
    pub decode_errors: u64,
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStats {
    pub running: bool,
    pub link: &'static str,
    pub endpoints: usize,
    pub frames_received: u64,
    pub corrupt_frames: u64,
    pub heartbeat_enabled: bool,
    pub devices: Vec<DeviceStats>,
}

struct HubInner {
    config: HubConfig,
    codec: Arc<dyn MessageCodec>,
    sink: Arc<dyn FrameSink>,
    runtime: Arc<Runtime>,
    endpoints: RwLock<Slots>,
    link_kind: &'static str,
    running: AtomicBool,
    heartbeat_enabled: AtomicBool,
    stopped: Mutex<bool>,
    stop_signal: Condvar,
    frames_received: AtomicU64,
    corrupt_frames: AtomicU64,
}

impl HubInner {
    fn slots(&self) -> std::sync::RwLockReadGuard<'_, Slots> {
        self.endpoints.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn existing(&self, device_id: u8) -> Option<Arc<Endpoint>> {
        self.slots().get(usize::from(device_id))?.clone()
    }

    fn all(&self) -> Vec<Arc<Endpoint>> {
        self.slots().iter().flatten().cloned().collect()
    }

    fn endpoint(&self, device_id: u8) -> Result<Arc<Endpoint>> {
        if !is_valid_device_id(device_id) {
            return Err(HubError::InvalidDeviceId(device_id));
        }
        if let Some(endpoint) = self.existing(device_id) {
            return Ok(endpoint);
        }
        if !self.running.load(Ordering::SeqCst) {
            return Err(HubError::Closed);
        }

        let (endpoint, created) = {
            let mut slots = self.endpoints.write().unwrap_or_else(PoisonError::into_inner);
            let slot = &mut slots[usize::from(device_id)];
            match slot {
                Some(endpoint) => (Arc::clone(endpoint), false),
                None => {
                    let endpoint = Endpoint::new(
                        device_id,
                        self.config.endpoint,
                        self.config.transfer,
                        Arc::clone(&self.codec),
                        Arc::clone(&self.sink),
                        Arc::clone(&self.runtime),
                    );
                    *slot = Some(Arc::clone(&endpoint));
                    (endpoint, true)
                }
            }
        };

        if created {
            info!(device = device_id, "endpoint created");
            if self.heartbeat_enabled.load(Ordering::Relaxed) {
                endpoint.queue_heartbeat();
            }
        }
        Ok(endpoint)
    }

    fn route(&self, frame: Frame) {
        match self.endpoint(frame.device_id) {
            Ok(endpoint) => endpoint.ingest(&frame.payload),
            Err(err) => debug!(device = frame.device_id, error = %err, "dropping frame"),
        }
    }

    /// Returns true on the first call.
    fn stop(&self) -> bool {
        let first = self.running.swap(false, Ordering::SeqCst);
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.stop_signal.notify_all();
        first
    }
}

/// Owns the shared link and one [`Endpoint`] per device that has been
/// heard from or addressed.
///
/// Two background threads run for the hub's lifetime: a reader that
/// decodes frames and routes them to endpoints, and a heartbeat loop that
/// announces the ground station to every known device and sweeps expired
/// command records. The reader never writes to the link; replies it
/// triggers are queued on a single outbox thread.
pub struct Hub {
    inner: Arc<HubInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("link", &self.inner.link_kind)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Open the link at `address` and start the hub.
    pub fn open(address: &LinkAddress, config: HubConfig) -> Result<Self> {
        let link = LinkStream::open(address)?;
        Self::with_link(link, config)
    }

    /// Start a hub over an already open link.
    pub fn with_link(link: LinkStream, config: HubConfig) -> Result<Self> {
        Self::with_codec(link, config, Arc::new(PackedCodec::new()))
    }

    /// Start a hub with a custom message codec.
    pub fn with_codec(
        link: LinkStream,
        config: HubConfig,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<Self> {
        let link_kind = link.kind();
        let frame_config = FrameConfig {
            read_timeout: Some(config.read_timeout),
            write_timeout: config.write_timeout,
        };
        let reader = FrameReader::with_config_link(link.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_link(link, frame_config)?;
        let sink: Arc<dyn FrameSink> = Arc::new(Mutex::new(writer));

        let inner = Arc::new(HubInner {
            config,
            codec,
            sink,
            runtime: Arc::new(Runtime::new(config.worker_threads)?),
            endpoints: RwLock::new(std::array::from_fn(|_| None)),
            link_kind,
            running: AtomicBool::new(true),
            heartbeat_enabled: AtomicBool::new(config.heartbeat_enabled),
            stopped: Mutex::new(false),
            stop_signal: Condvar::new(),
            frames_received: AtomicU64::new(0),
            corrupt_frames: AtomicU64::new(0),
        });

        let hub = Self {
            inner: Arc::clone(&inner),
            threads: Mutex::new(Vec::with_capacity(2)),
        };

        let reader_inner = Arc::clone(&inner);
        hub.spawn("reader", move || read_loop(&reader_inner, reader))?;
        let heartbeat_inner = Arc::clone(&inner);
        hub.spawn("heartbeat", move || heartbeat_loop(&heartbeat_inner))?;

        info!(link = link_kind, "hub started");
        Ok(hub)
    }

    fn spawn(&self, name: &'static str, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = std::thread::Builder::new()
            .name(format!("owlink-{name}"))
            .spawn(body)
            .map_err(|source| {
                self.inner.stop();
                HubError::Spawn { name, source }
            })?;
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// The endpoint for `device_id`, created on first use.
    pub fn endpoint(&self, device_id: u8) -> Result<Arc<Endpoint>> {
        self.inner.endpoint(device_id)
    }

    pub fn endpoint_if_exists(&self, device_id: u8) -> Option<Arc<Endpoint>> {
        self.inner.existing(device_id)
    }

    /// Forget a device. Its waiting commands and captures fail with a
    /// shutdown error.
    pub fn remove_endpoint(&self, device_id: u8) -> Option<Arc<Endpoint>> {
        let removed = self
            .inner
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(usize::from(device_id))?
            .take();
        if let Some(endpoint) = &removed {
            endpoint.close();
            info!(device = device_id, "endpoint removed");
        }
        removed
    }

    /// Ids of every known device, ascending.
    pub fn device_ids(&self) -> Vec<u8> {
        self.inner
            .all()
            .iter()
            .map(|endpoint| endpoint.device_id())
            .collect()
    }

    /// Submit a command to a device; see [`Endpoint::submit`].
    pub fn submit_command(&self, device_id: u8, request: CommandRequest) -> Result<CommandHandle> {
        Ok(self.endpoint(device_id)?.submit(request))
    }

    /// Last reported state of a device, if it is known.
    pub fn last_known_state(&self, device_id: u8) -> Option<DeviceState> {
        self.endpoint_if_exists(device_id)
            .map(|endpoint| endpoint.state())
    }

    /// Trigger a photo capture; see [`Endpoint::trigger_capture`].
    pub fn trigger_capture(&self, device_id: u8) -> Result<CaptureHandle> {
        Ok(self.endpoint(device_id)?.trigger_capture())
    }

    pub fn transfer_result(&self, device_id: u8, transfer_id: u8) -> TransferResult {
        self.endpoint_if_exists(device_id)
            .map_or(TransferResult::NotFound, |endpoint| {
                endpoint.transfer_result(transfer_id)
            })
    }

    /// Receive every completed transfer from every device.
    pub fn subscribe_transfers(&self) -> Receiver<TransferEvent> {
        self.inner.runtime.listeners.subscribe()
    }

    /// Clear a transfer (0 for all) locally and on the device.
    pub fn clear_transfers(&self, device_id: u8, transfer_id: u8) -> Result<()> {
        self.endpoint(device_id)?.clear_transfers(transfer_id);
        Ok(())
    }

    pub fn request_autopilot_version(&self, device_id: u8) -> Result<u32> {
        self.endpoint(device_id)?.request_autopilot_version()
    }

    pub fn set_heartbeat_enabled(&self, enabled: bool) {
        self.inner.heartbeat_enabled.store(enabled, Ordering::Relaxed);
        debug!(enabled, "heartbeat toggled");
    }

    pub fn heartbeat_enabled(&self) -> bool {
        self.inner.heartbeat_enabled.load(Ordering::Relaxed)
    }

    /// False once the hub has been shut down or the link closed.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> HubStats {
        let devices: Vec<DeviceStats> = self
            .inner
            .all()
            .iter()
            .map(|endpoint| {
                let state = endpoint.state();
                DeviceStats {
                    device_id: endpoint.device_id(),
                    armed: state.armed,
                    flight_mode: state.flight_mode,
                    landed: state.landed,
                    position: state.position,
                    cached_messages: state.cached_messages,
                    pending_commands: endpoint.pending_commands(),
                    active_transfers: endpoint.active_transfers(),
                    pending_captures: endpoint.pending_captures(),
                    decode_errors: endpoint.decode_errors(),
                }
            })
            .collect();

        HubStats {
            running: self.is_running(),
            link: self.inner.link_kind,
            endpoints: devices.len(),
            frames_received: self.inner.frames_received.load(Ordering::Relaxed),
            corrupt_frames: self.inner.corrupt_frames.load(Ordering::Relaxed),
            heartbeat_enabled: self.heartbeat_enabled(),
            devices,
        }
    }

    /// Stop background threads, release waiting callers and drain workers.
    ///
    /// The reader notices within one read timeout. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let first = self.inner.stop();
        for endpoint in self.inner.all() {
            endpoint.close();
        }

        let threads = {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *threads)
        };
        for handle in threads {
            if handle.join().is_err() {
                warn!("hub thread panicked");
            }
        }

        self.inner.runtime.shutdown();
        if first {
            info!(link = self.inner.link_kind, "hub stopped");
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(inner: &HubInner, mut reader: FrameReader<LinkStream>) {
    while inner.running.load(Ordering::SeqCst) {
        let result = reader.read_frame();
        inner
            .corrupt_frames
            .store(reader.corrupt_frames(), Ordering::Relaxed);
        match result {
            Ok(frame) => {
                inner.frames_received.fetch_add(1, Ordering::Relaxed);
                inner.route(frame);
            }
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(FrameError::ConnectionClosed) => {
                info!(link = inner.link_kind, "link closed by peer");
                inner.stop();
            }
            Err(err) => {
                warn!(link = inner.link_kind, error = %err, "link read failed");
                inner.stop();
            }
        }
    }
    debug!("reader stopped");
}

fn heartbeat_loop(inner: &HubInner) {
    let interval = inner.config.heartbeat_interval;
    loop {
        {
            let stopped = inner.stopped.lock().unwrap_or_else(PoisonError::into_inner);
            let (stopped, _) = inner
                .stop_signal
                .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                .unwrap_or_else(PoisonError::into_inner);
            if *stopped {
                break;
            }
        }

        let now = Instant::now();
        let send = inner.heartbeat_enabled.load(Ordering::Relaxed);
        for endpoint in inner.all() {
            if send {
                if let Err(err) = endpoint.send_heartbeat() {
                    debug!(device = endpoint.device_id(), error = %err, "heartbeat failed");
                }
            }
            endpoint.sweep_records(now);
        }
    }
    debug!("heartbeat stopped");
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use owlink_message::{Message, MessageCodec, PackedCodec};

    use super::*;

    fn quiet_config() -> HubConfig {
        HubConfig {
            heartbeat_interval: Duration::from_millis(20),
            read_timeout: Duration::from_millis(20),
            worker_threads: 2,
            ..HubConfig::default()
        }
    }

    fn device_side(link: LinkStream) -> FrameReader<LinkStream> {
        FrameReader::with_config_link(
            link,
            FrameConfig {
                read_timeout: Some(Duration::from_secs(2)),
                write_timeout: None,
            },
        )
        .unwrap()
    }

    fn read_message(reader: &mut FrameReader<LinkStream>) -> (u8, Message) {
        let mut buf = BytesMut::new();
        loop {
            let frame = reader.read_frame().unwrap();
            buf.extend_from_slice(&frame.payload);
            if let Some(message) = PackedCodec.decode(&mut buf).unwrap() {
                return (frame.device_id, message);
            }
        }
    }

    #[test]
    fn rejects_out_of_range_device() {
        let (link, _device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(link, quiet_config()).unwrap();
        assert!(matches!(hub.endpoint(16), Err(HubError::InvalidDeviceId(16))));
        assert!(hub.endpoint_if_exists(3).is_none());
        assert_eq!(hub.transfer_result(3, 1), TransferResult::NotFound);
        assert!(hub.last_known_state(3).is_none());
    }

    #[test]
    fn new_endpoint_announces_ground_station() {
        let (link, device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(
            link,
            HubConfig {
                heartbeat_interval: Duration::from_secs(60),
                ..quiet_config()
            },
        )
        .unwrap();
        let mut device = device_side(device);

        hub.endpoint(5).unwrap();
        let (device_id, message) = read_message(&mut device);
        assert_eq!(device_id, 5);
        assert!(matches!(message, Message::Heartbeat(hb) if hb.kind == 6));
        assert_eq!(hub.device_ids(), vec![5]);
    }

    #[test]
    fn heartbeat_loop_reaches_every_device() {
        let (link, device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(link, quiet_config()).unwrap();
        let mut device = device_side(device);

        hub.endpoint(1).unwrap();
        hub.endpoint(2).unwrap();

        let mut seen = [false; 2];
        while !(seen[0] && seen[1]) {
            let (device_id, message) = read_message(&mut device);
            assert!(matches!(message, Message::Heartbeat(_)));
            seen[usize::from(device_id) - 1] = true;
        }
    }

    #[test]
    fn disabled_heartbeat_stays_silent() {
        let (link, device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(link, quiet_config()).unwrap();
        hub.set_heartbeat_enabled(false);
        hub.endpoint(1).unwrap();

        let mut device = FrameReader::with_config_link(
            device,
            FrameConfig {
                read_timeout: Some(Duration::from_millis(150)),
                write_timeout: None,
            },
        )
        .unwrap();
        match device.read_frame() {
            Err(FrameError::Io(err)) => {
                assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
            }
            other => panic!("expected silence, got {other:?}"),
        }
    }

    #[test]
    fn removed_endpoint_is_closed() {
        let (link, _device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(link, quiet_config()).unwrap();
        let endpoint = hub.endpoint(7).unwrap();
        let removed = hub.remove_endpoint(7).unwrap();
        assert!(Arc::ptr_eq(&endpoint, &removed));
        assert!(removed.is_closed());
        assert!(hub.device_ids().is_empty());
        assert!(hub.remove_endpoint(7).is_none());
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let (link, _device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(link, quiet_config()).unwrap();
        hub.shutdown();
        hub.shutdown();
        assert!(!hub.is_running());
        assert!(matches!(hub.endpoint(1), Err(HubError::Closed)));
    }

    #[test]
    fn peer_close_stops_hub() {
        let (link, device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(link, quiet_config()).unwrap();
        drop(device);

        let deadline = Instant::now() + Duration::from_secs(2);
        while hub.is_running() {
            assert!(Instant::now() < deadline, "hub did not notice closed link");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn statistics_serialize() {
        let (link, _device) = LinkStream::pair().unwrap();
        let hub = Hub::with_link(link, quiet_config()).unwrap();
        hub.endpoint(2).unwrap();

        let stats = hub.statistics();
        assert!(stats.running);
        assert_eq!(stats.link, "unix");
        assert_eq!(stats.endpoints, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["devices"][0]["device_id"], 2);
        assert_eq!(json["devices"][0]["flight_mode"], "unknown");
    }
}
