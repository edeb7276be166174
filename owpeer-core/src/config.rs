//! Build-time capacities
//!
//! Pools never grow, so every capacity is fixed when the firmware is built.
//! Stages and pools take these as const generic defaults; a board with more
//! RAM can instantiate [`crate::Bus`] with larger values.

/// Frames per link-facing pool (receive and transmit each have one)
pub const FRAME_POOL_CAPACITY: usize = 64;

/// Protocol objects per application-facing pool (inbound and outbound)
pub const OBJECT_POOL_CAPACITY: usize = 16;

/// Payload arena budget for Data objects
pub use owpeer_protocol::PAYLOAD_ARENA_SIZE;

/// Longest Message text
pub use owpeer_protocol::MAX_MESSAGE_LEN;
