//! Ground-side command and transfer handling for up to 16 devices sharing
//! one half-duplex link.
//!
//! - [`Hub`] owns the link, routes inbound frames by device id and keeps
//!   every known device alive with a periodic heartbeat.
//! - [`Endpoint`] tracks one device: acknowledged commands with retry,
//!   timestamp tags and supersession, its last reported state, and chunked
//!   photo transfers.
//! - [`TransferReceiver`] is the transfer state machine on its own, driven
//!   by explicit timestamps.
//!
//! ```no_run
//! use owlink_hub::{CommandRequest, Hub, HubConfig};
//! use owlink_message::CommandKind;
//! use owlink_transport::LinkAddress;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let address: LinkAddress = "tcp:127.0.0.1:5760".parse()?;
//! let hub = Hub::open(&address, HubConfig::default())?;
//! let outcome = hub
//!     .submit_command(1, CommandRequest::new(CommandKind::ArmDisarm).param(1, 1.0))?
//!     .wait()?;
//! println!("armed after {} attempt(s)", outcome.attempts);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod hub;
mod link;
mod pool;
mod scheduler;
pub mod state;
pub mod transfer;

pub use command::{
    timestamp_tag, CommandHandle, CommandOutcome, CommandRecord, CommandRequest, CommandResult,
    CommandStatus, ACK_ERROR, ACK_FINISHED, ACK_RECEIVED, TAG_MASK,
};
pub use config::{EndpointConfig, HubConfig, RetryPolicy, TransferConfig};
pub use endpoint::Endpoint;
pub use error::{CaptureError, CommandError, HubError, Result};
pub use hub::{DeviceStats, Hub, HubStats};
pub use link::FrameSink;
pub use state::{
    AutoMode, CachedMessage, DeviceState, FlightMode, LandedState, Position, StableMode, SubMode,
};
pub use transfer::{
    CaptureHandle, CaptureResult, TransferAction, TransferEvent, TransferListeners,
    TransferReceiver, TransferResult, CLEAR_ALL,
};
