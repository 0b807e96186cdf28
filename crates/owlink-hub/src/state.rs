use std::collections::HashMap;
use std::time::Instant;

use owlink_message::{AutopilotVersion, GlobalPosition, Heartbeat, Message};
use serde::Serialize;

/// Main flight mode, from byte 3 of the heartbeat custom mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightMode {
    #[default]
    Unknown,
    Hold,
    Position,
    Auto,
}

/// Sub mode while in [`FlightMode::Auto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoMode {
    Takeoff,
    Follow,
    Mission,
    ReturnToLaunch,
    Land,
}

/// Sub mode while in [`FlightMode::Position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StableMode {
    Normal,
    ObstacleAvoidance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "mode")]
pub enum SubMode {
    #[default]
    None,
    Auto(AutoMode),
    Stable(StableMode),
}

/// Landed state reported in the extended system state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LandedState {
    #[default]
    Undefined,
    OnGround,
    InAir,
    Takeoff,
    Landing,
}

impl LandedState {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::OnGround,
            2 => Self::InAir,
            3 => Self::Takeoff,
            4 => Self::Landing,
            _ => Self::Undefined,
        }
    }
}

/// Last reported position in degrees and meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub relative_alt: f64,
    /// Heading in centidegrees.
    pub hdg: u16,
}

impl From<&GlobalPosition> for Position {
    fn from(pos: &GlobalPosition) -> Self {
        Self {
            lat: f64::from(pos.lat) / 1e7,
            lon: f64::from(pos.lon) / 1e7,
            alt: f64::from(pos.alt) / 1e3,
            relative_alt: f64::from(pos.relative_alt) / 1e3,
            hdg: pos.hdg,
        }
    }
}

/// Snapshot of what a device last told us about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub armed: bool,
    pub flight_mode: FlightMode,
    pub sub_mode: SubMode,
    pub landed: LandedState,
    pub position: Option<Position>,
    pub software_version: Option<String>,
    pub board_version: Option<u32>,
    pub serial_number: Option<String>,
    /// Number of distinct message kinds in the last-value cache.
    pub cached_messages: usize,
}

impl DeviceState {
    pub(crate) fn apply_heartbeat(&mut self, hb: &Heartbeat) {
        self.armed = hb.base_mode & 0x80 == 0x80;

        let main = (hb.custom_mode >> 24) & 0xFF;
        let sub = (hb.custom_mode >> 16) & 0xFF;
        self.flight_mode = match main {
            2 => FlightMode::Hold,
            3 => FlightMode::Position,
            4 => FlightMode::Auto,
            _ => FlightMode::Unknown,
        };
        self.sub_mode = match self.flight_mode {
            FlightMode::Auto => match sub {
                2 => SubMode::Auto(AutoMode::Takeoff),
                3 => SubMode::Auto(AutoMode::Follow),
                4 => SubMode::Auto(AutoMode::Mission),
                5 => SubMode::Auto(AutoMode::ReturnToLaunch),
                6 => SubMode::Auto(AutoMode::Land),
                _ => SubMode::None,
            },
            FlightMode::Position => match sub {
                0 => SubMode::Stable(StableMode::Normal),
                2 => SubMode::Stable(StableMode::ObstacleAvoidance),
                _ => SubMode::None,
            },
            _ => SubMode::None,
        };
    }

    pub(crate) fn apply_version(&mut self, version: &AutopilotVersion) {
        let sw = version.flight_sw_version;
        self.software_version = Some(format!(
            "{}.{}.{}",
            (sw >> 16) & 0xFF,
            (sw >> 8) & 0xFF,
            sw & 0xFF
        ));
        self.board_version = Some(version.board_version);
        self.serial_number = Some(format!("{:016x}", version.uid));
    }
}

/// A cached message and when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMessage {
    pub message: Message,
    pub received_at: Instant,
}

/// Last value seen per message id.
#[derive(Debug, Default)]
pub(crate) struct MessageCache {
    entries: HashMap<u16, CachedMessage>,
}

impl MessageCache {
    pub(crate) fn insert(&mut self, message: &Message, now: Instant) {
        self.entries.insert(
            message.id(),
            CachedMessage {
                message: message.clone(),
                received_at: now,
            },
        );
    }

    pub(crate) fn get(&self, id: u16) -> Option<&CachedMessage> {
        self.entries.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
