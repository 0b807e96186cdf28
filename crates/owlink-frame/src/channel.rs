//! Device (channel) addressing.
//!
//! The device id occupies one byte on the wire but only 0-15 are valid:
//! sixteen independent remote channels multiplexed over one link.

/// Number of addressable devices on one link.
pub const DEVICE_COUNT: usize = 16;

/// Highest valid device id.
pub const MAX_DEVICE_ID: u8 = (DEVICE_COUNT - 1) as u8;

/// Returns true if `id` addresses one of the 16 channels.
pub fn is_valid_device_id(id: u8) -> bool {
    id <= MAX_DEVICE_ID
}
