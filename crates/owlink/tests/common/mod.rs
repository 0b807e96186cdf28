//! A scripted stand-in for the devices on the far side of the link.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use owlink::frame::{encode_frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use owlink::message::{
    CommandAck, CommandKind, CommandLong, Heartbeat, Message, MessageCodec, PackedCodec, PhotoAck,
    PhotoChunk, PhotoInfo, PHOTO_CHUNK_SIZE,
};
use owlink::transport::LinkStream;

const ACK_RECEIVED: u8 = 1;
const ACK_FINISHED: u8 = 2;
const ACK_ERROR: u8 = 3;
const ALL_CHUNKS: u8 = 255;

/// How one simulated device answers.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Command ids answered with an ERROR ack.
    pub reject: Vec<u16>,
    /// Never acknowledge commands.
    pub silent: bool,
    /// RECEIVED acks sent before FINISHED.
    pub receive_acks: usize,
    /// Image served after a capture; a multiple of the chunk size.
    pub photo: Vec<u8>,
    pub photo_id: u8,
    /// Chunk indices withheld on the first full pass.
    pub drop_first_pass: Vec<u8>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            reject: Vec::new(),
            silent: false,
            receive_acks: 3,
            photo: sample_photo(6),
            photo_id: 7,
            drop_first_pass: Vec::new(),
        }
    }
}

pub fn sample_photo(chunks: usize) -> Vec<u8> {
    (0..chunks * PHOTO_CHUNK_SIZE)
        .map(|i| (i * 7 % 251) as u8)
        .collect()
}

/// Everything the simulated devices heard from the ground.
#[derive(Debug, Clone, Default)]
pub struct SimLog {
    pub commands: Vec<(u8, CommandLong)>,
    pub heartbeats: Vec<u8>,
    /// (device, photo id, chunk index)
    pub requests: Vec<(u8, u8, u8)>,
    /// (device, photo id)
    pub clears: Vec<(u8, u8)>,
}

impl SimLog {
    pub fn commands_for(&self, device: u8, kind: CommandKind) -> Vec<CommandLong> {
        self.commands
            .iter()
            .filter(|(id, command)| *id == device && command.command == kind.id())
            .map(|(_, command)| *command)
            .collect()
    }
}

struct Shared {
    writer: Mutex<FrameWriter<LinkStream>>,
    codec: PackedCodec,
    running: AtomicBool,
    log: Mutex<SimLog>,
}

impl Shared {
    fn send(&self, device: u8, message: &Message) {
        let mut body = BytesMut::new();
        self.codec
            .encode(message, &mut body)
            .expect("simulated message should encode");
        let mut writer = self.writer.lock().expect("sim writer lock");
        let _ = writer.send_split(device, &body);
    }

    fn ack(&self, device: u8, command: &CommandLong, result: u8) {
        let tag = command.params[6] as u32;
        self.send(
            device,
            &Message::CommandAck(CommandAck {
                command: command.command,
                result,
                result_param2: Some(tag as i32),
            }),
        );
    }
}

/// Devices behind the other end of a link, served from a background thread.
pub struct SimDevice {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl SimDevice {
    /// Serve `link`. Devices without a profile log what they hear and stay quiet.
    pub fn spawn(link: LinkStream, profiles: Vec<(u8, Profile)>) -> Self {
        let config = FrameConfig {
            read_timeout: Some(Duration::from_millis(20)),
            write_timeout: Some(Duration::from_secs(1)),
        };
        let reader_link = link.try_clone().expect("sim link should clone");
        let reader =
            FrameReader::with_config_link(reader_link, config.clone()).expect("sim reader");
        let writer = FrameWriter::with_config_link(link, config).expect("sim writer");

        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            codec: PackedCodec::new(),
            running: AtomicBool::new(true),
            log: Mutex::new(SimLog::default()),
        });
        let profiles: HashMap<u8, Profile> = profiles.into_iter().collect();
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("sim-device".into())
                .spawn(move || serve(shared, reader, profiles))
                .expect("sim thread should start")
        };

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Send one message as `device`, split across frames as needed.
    pub fn send(&self, device: u8, message: &Message) {
        self.shared.send(device, message);
    }

    pub fn send_heartbeat(&self, device: u8, armed: bool, custom_mode: u32) {
        self.send(
            device,
            &Message::Heartbeat(Heartbeat {
                custom_mode,
                kind: 2,
                base_mode: if armed { 0x80 } else { 0 },
                ..Heartbeat::ground_station()
            }),
        );
    }

    /// Write a frame for `device` whose checksum is wrong.
    pub fn send_corrupt_frame(&self, device: u8) {
        let mut wire = BytesMut::new();
        encode_frame(device, b"garbage", &mut wire).expect("frame should encode");
        let checksum = wire.len() - 2;
        wire[checksum] ^= 0x40;

        let mut writer = self.shared.writer.lock().expect("sim writer lock");
        let _ = writer.get_mut().write_all(&wire);
        let _ = writer.get_mut().flush();
    }

    /// False once the ground side has disconnected.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> SimLog {
        self.shared.log.lock().expect("sim log lock").clone()
    }

    /// Poll the log until `condition` holds or `timeout` passes.
    pub fn wait_until<F: Fn(&SimLog) -> bool>(&self, timeout: Duration, condition: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition(&self.log()) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition(&self.log())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn serve(shared: Arc<Shared>, mut reader: FrameReader<LinkStream>, profiles: HashMap<u8, Profile>) {
    let mut inbound: HashMap<u8, BytesMut> = HashMap::new();
    let mut served_full: HashSet<(u8, u8)> = HashSet::new();

    while shared.running.load(Ordering::SeqCst) {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(_) => {
                shared.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let buf = inbound.entry(frame.device_id).or_default();
        buf.extend_from_slice(&frame.payload);
        let mut messages = Vec::new();
        while let Ok(Some(message)) = shared.codec.decode(buf) {
            messages.push(message);
        }

        for message in messages {
            handle(
                &shared,
                frame.device_id,
                message,
                profiles.get(&frame.device_id),
                &mut served_full,
            );
        }
    }
}

fn handle(
    shared: &Shared,
    device: u8,
    message: Message,
    profile: Option<&Profile>,
    served_full: &mut HashSet<(u8, u8)>,
) {
    let command = match message {
        Message::Heartbeat(_) => {
            shared.log.lock().expect("sim log lock").heartbeats.push(device);
            return;
        }
        Message::CommandLong(command) => command,
        _ => return,
    };
    shared
        .log
        .lock()
        .expect("sim log lock")
        .commands
        .push((device, command));
    let Some(profile) = profile else {
        return;
    };

    match CommandKind::from_id(command.command) {
        CommandKind::TakePhoto => {
            shared.send(
                device,
                &Message::PhotoAck(PhotoAck {
                    photo_id: profile.photo_id,
                    result: 0,
                }),
            );
            let total = profile.photo.len().div_ceil(PHOTO_CHUNK_SIZE) as u8;
            shared.send(
                device,
                &Message::PhotoInfo(PhotoInfo {
                    photo_id: profile.photo_id,
                    total,
                }),
            );
        }
        CommandKind::PhotoRequest => {
            let photo_id = command.params[0] as u8;
            let index = command.params[1] as u8;
            shared
                .log
                .lock()
                .expect("sim log lock")
                .requests
                .push((device, photo_id, index));
            if photo_id != profile.photo_id {
                return;
            }
            if index == ALL_CHUNKS {
                let first_pass = served_full.insert((device, photo_id));
                for (index, _) in profile.photo.chunks(PHOTO_CHUNK_SIZE).enumerate() {
                    let index = index as u8;
                    if first_pass && profile.drop_first_pass.contains(&index) {
                        continue;
                    }
                    send_chunk(shared, device, profile, index);
                }
            } else {
                send_chunk(shared, device, profile, index);
            }
        }
        CommandKind::PhotoClear => {
            shared
                .log
                .lock()
                .expect("sim log lock")
                .clears
                .push((device, command.params[0] as u8));
        }
        _ if profile.silent => {}
        _ if profile.reject.contains(&command.command) => {
            shared.ack(device, &command, ACK_ERROR);
        }
        _ => {
            for _ in 0..profile.receive_acks {
                shared.ack(device, &command, ACK_RECEIVED);
            }
            shared.ack(device, &command, ACK_FINISHED);
        }
    }
}

fn send_chunk(shared: &Shared, device: u8, profile: &Profile, index: u8) {
    let start = usize::from(index) * PHOTO_CHUNK_SIZE;
    let Some(data) = profile.photo.get(start..start + PHOTO_CHUNK_SIZE) else {
        return;
    };
    let checksum = data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    shared.send(
        device,
        &Message::PhotoChunk(PhotoChunk {
            index,
            photo_id: profile.photo_id,
            data: bytes::Bytes::copy_from_slice(data),
            checksum,
        }),
    );
}
