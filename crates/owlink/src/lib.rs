//! Ground-station link for up to 16 devices sharing one half-duplex serial
//! channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex byte streams (serial behind `serial`, TCP, Unix sockets)
//! - [`frame`]: device-addressed, checksummed framing with stream resync
//! - [`message`]: application messages and the codec seam
//! - [`hub`]: command/ack handling, photo transfers and the link hub (behind `hub`)

/// Re-export transport types.
pub mod transport {
    pub use owlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use owlink_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use owlink_message::*;
}

/// Re-export hub types (requires `hub` feature).
#[cfg(feature = "hub")]
pub mod hub {
    pub use owlink_hub::*;
}
