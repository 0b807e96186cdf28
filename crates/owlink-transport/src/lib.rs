//! Duplex byte-stream links for owlink.
//!
//! Provides a unified interface over the physical links a ground station can
//! talk through:
//! - Serial ports (behind the `serial` feature)
//! - TCP streams (serial-over-network bridges)
//! - Unix domain sockets (local simulators, loopback testing)
//!
//! This is the lowest layer of owlink. Everything else builds on top of the
//! [`LinkStream`] type provided here.

pub mod address;
pub mod error;
pub mod stream;

pub use address::LinkAddress;
pub use error::{Result, TransportError};
pub use stream::LinkStream;
