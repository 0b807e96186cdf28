use bytes::Bytes;

/// Message id: liveness heartbeat.
pub const HEARTBEAT: u16 = 0;
/// Message id: vehicle attitude.
pub const ATTITUDE: u16 = 30;
/// Message id: fused global position.
pub const GLOBAL_POSITION_INT: u16 = 33;
/// Message id: command with seven numeric parameters.
pub const COMMAND_LONG: u16 = 76;
/// Message id: command acknowledgement.
pub const COMMAND_ACK: u16 = 77;
/// Message id: battery status.
pub const BATTERY_STATUS: u16 = 147;
/// Message id: autopilot software and board version.
pub const AUTOPILOT_VERSION: u16 = 148;
/// Message id: extended system state (landed state).
pub const EXTENDED_SYS_STATE: u16 = 245;
/// Message id: free-form status text.
pub const STATUSTEXT: u16 = 253;
/// Message id: photo transfer information (transfer id + chunk count).
pub const PHOTO_INFO: u16 = 804;
/// Message id: one photo data chunk.
pub const PHOTO_CHUNK: u16 = 805;
/// Message id: request for photo chunks (sent as a command).
pub const PHOTO_REQUEST: u16 = 806;
/// Message id: photo capture acknowledgement.
pub const PHOTO_ACK: u16 = 807;
/// Message id: clear stored photos (sent as a command).
pub const PHOTO_CLEAR: u16 = 808;

/// Data bytes carried by one photo chunk.
pub const PHOTO_CHUNK_SIZE: usize = 64;
/// Maximum status text length in bytes.
pub const STATUSTEXT_MAX: usize = 50;

/// Vehicle type announced by a ground control station.
pub const MAV_TYPE_GCS: u8 = 6;
/// Generic autopilot.
pub const MAV_AUTOPILOT_GENERIC: u8 = 0;
/// System state: active.
pub const MAV_STATE_ACTIVE: u8 = 4;

/// Liveness heartbeat, sent in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub kind: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub version: u8,
}

impl Heartbeat {
    /// Heartbeat announcing this host as a ground control station.
    pub fn ground_station() -> Self {
        Self {
            custom_mode: 0,
            kind: MAV_TYPE_GCS,
            autopilot: MAV_AUTOPILOT_GENERIC,
            base_mode: 0,
            system_status: MAV_STATE_ACTIVE,
            version: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    pub time_boot_ms: u32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

/// Global position; lat/lon in 1e-7 degrees, altitudes in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalPosition {
    pub time_boot_ms: u32,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub relative_alt: i32,
    pub vx: i16,
    pub vy: i16,
    pub vz: i16,
    pub hdg: u16,
}

/// A command with seven numeric parameters.
///
/// `params[6]` carries the 23-bit timestamp tag echoed back by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLong {
    pub command: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub confirmation: u8,
    pub params: [f32; 7],
}

/// Command acknowledgement.
///
/// `result_param2` carries the echoed timestamp tag; older firmware omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    pub command: u16,
    pub result: u8,
    pub result_param2: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub voltage_mv: u16,
    pub current_ca: i16,
    pub remaining: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutopilotVersion {
    pub capabilities: u64,
    pub flight_sw_version: u32,
    pub board_version: u32,
    pub uid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedSysState {
    pub vtol_state: u8,
    pub landed_state: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub severity: u8,
    pub text: String,
}

/// Announces a stored photo and how many chunks it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoInfo {
    pub photo_id: u8,
    pub total: u8,
}

/// One fixed-size block of a stored photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoChunk {
    pub index: u8,
    pub photo_id: u8,
    pub data: Bytes,
    pub checksum: u8,
}

/// Reply to a capture trigger; `result == 0` means a photo was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoAck {
    pub photo_id: u8,
    pub result: u8,
}

/// An application message exchanged with a device.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Heartbeat(Heartbeat),
    Attitude(Attitude),
    GlobalPosition(GlobalPosition),
    CommandLong(CommandLong),
    CommandAck(CommandAck),
    BatteryStatus(BatteryStatus),
    AutopilotVersion(AutopilotVersion),
    ExtendedSysState(ExtendedSysState),
    StatusText(StatusText),
    PhotoInfo(PhotoInfo),
    PhotoChunk(PhotoChunk),
    PhotoAck(PhotoAck),
    /// A message this crate has no typed form for; the body is kept as-is.
    Unknown { id: u16, body: Bytes },
}

impl Message {
    /// Numeric message id.
    pub fn id(&self) -> u16 {
        match self {
            Self::Heartbeat(_) => HEARTBEAT,
            Self::Attitude(_) => ATTITUDE,
            Self::GlobalPosition(_) => GLOBAL_POSITION_INT,
            Self::CommandLong(_) => COMMAND_LONG,
            Self::CommandAck(_) => COMMAND_ACK,
            Self::BatteryStatus(_) => BATTERY_STATUS,
            Self::AutopilotVersion(_) => AUTOPILOT_VERSION,
            Self::ExtendedSysState(_) => EXTENDED_SYS_STATE,
            Self::StatusText(_) => STATUSTEXT,
            Self::PhotoInfo(_) => PHOTO_INFO,
            Self::PhotoChunk(_) => PHOTO_CHUNK,
            Self::PhotoAck(_) => PHOTO_ACK,
            Self::Unknown { id, .. } => *id,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::Attitude(_) => "attitude",
            Self::GlobalPosition(_) => "global_position",
            Self::CommandLong(_) => "command_long",
            Self::CommandAck(_) => "command_ack",
            Self::BatteryStatus(_) => "battery_status",
            Self::AutopilotVersion(_) => "autopilot_version",
            Self::ExtendedSysState(_) => "extended_sys_state",
            Self::StatusText(_) => "statustext",
            Self::PhotoInfo(_) => "photo_info",
            Self::PhotoChunk(_) => "photo_chunk",
            Self::PhotoAck(_) => "photo_ack",
            Self::Unknown { .. } => "unknown",
        }
    }
}
