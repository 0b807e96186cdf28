use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Default baud rate for radio modules when the address omits one.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Where to find the physical link.
///
/// Textual forms:
/// - `serial:/dev/ttyUSB0@115200` (baud rate optional)
/// - `tcp:192.168.4.1:8899`
/// - `unix:/tmp/owlink-sim.sock`
///
/// A bare path such as `/dev/ttyUSB0` or `COM3` is read as a serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddress {
    Serial { path: PathBuf, baud_rate: u32 },
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for LinkAddress {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "address must not be empty"));
        }

        if let Some(rest) = trimmed.strip_prefix("tcp:") {
            if rest.rsplit_once(':').is_none_or(|(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            }) {
                return Err(invalid(input, "expected tcp:<host>:<port>"));
            }
            return Ok(Self::Tcp(rest.to_string()));
        }

        if let Some(rest) = trimmed.strip_prefix("unix:") {
            if rest.is_empty() {
                return Err(invalid(input, "expected unix:<path>"));
            }
            return Ok(Self::Unix(PathBuf::from(rest)));
        }

        let rest = trimmed.strip_prefix("serial:").unwrap_or(trimmed);
        let (path, baud_rate) = match rest.rsplit_once('@') {
            Some((path, baud)) => {
                let baud_rate = baud
                    .parse::<u32>()
                    .ok()
                    .filter(|rate| *rate > 0)
                    .ok_or_else(|| invalid(input, "baud rate must be a positive integer"))?;
                (path, baud_rate)
            }
            None => (rest, DEFAULT_BAUD_RATE),
        };
        if path.is_empty() {
            return Err(invalid(input, "expected serial:<path>[@baud]"));
        }

        Ok(Self::Serial {
            path: PathBuf::from(path),
            baud_rate,
        })
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path, baud_rate } => write!(f, "serial:{}@{baud_rate}", path.display()),
            Self::Tcp(target) => write!(f, "tcp:{target}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

fn invalid(input: &str, reason: &str) -> TransportError {
    TransportError::InvalidAddress {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}
