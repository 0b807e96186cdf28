use std::fmt;
use std::str::FromStr;

use crate::message::{PHOTO_CLEAR, PHOTO_REQUEST};

/// Command ids understood by the devices.
///
/// Anything not named here travels as [`CommandKind::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ReturnToLaunch,
    TakePhoto,
    ArmDisarm,
    RequestAutopilotCapabilities,
    PhotoRequest,
    PhotoClear,
    Custom(u16),
}

impl CommandKind {
    /// Numeric command id carried in the command message.
    pub fn id(self) -> u16 {
        match self {
            Self::ReturnToLaunch => 20,
            Self::TakePhoto => 286,
            Self::ArmDisarm => 400,
            Self::RequestAutopilotCapabilities => 520,
            Self::PhotoRequest => PHOTO_REQUEST,
            Self::PhotoClear => PHOTO_CLEAR,
            Self::Custom(id) => id,
        }
    }

    /// Map a numeric id back to its kind.
    pub fn from_id(id: u16) -> Self {
        match id {
            20 => Self::ReturnToLaunch,
            286 => Self::TakePhoto,
            400 => Self::ArmDisarm,
            520 => Self::RequestAutopilotCapabilities,
            PHOTO_REQUEST => Self::PhotoRequest,
            PHOTO_CLEAR => Self::PhotoClear,
            other => Self::Custom(other),
        }
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Self::ReturnToLaunch => Some("return-to-launch"),
            Self::TakePhoto => Some("take-photo"),
            Self::ArmDisarm => Some("arm-disarm"),
            Self::RequestAutopilotCapabilities => Some("request-autopilot-capabilities"),
            Self::PhotoRequest => Some("photo-request"),
            Self::PhotoClear => Some("photo-clear"),
            Self::Custom(_) => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.id()),
        }
    }
}

/// Parses a kebab-case name (`arm-disarm`) or a numeric id (`400`).
impl FromStr for CommandKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if let Ok(id) = trimmed.parse::<u16>() {
            return Ok(Self::from_id(id));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "return-to-launch" | "rtl" => Ok(Self::ReturnToLaunch),
            "take-photo" => Ok(Self::TakePhoto),
            "arm-disarm" | "arm" => Ok(Self::ArmDisarm),
            "request-autopilot-capabilities" => Ok(Self::RequestAutopilotCapabilities),
            "photo-request" => Ok(Self::PhotoRequest),
            "photo-clear" => Ok(Self::PhotoClear),
            _ => Err(format!(
                "unknown command '{trimmed}' (expected a name like arm-disarm or a numeric id)"
            )),
        }
    }
}
