//! Error types for the tracker.
//!
//! Only structurally invalid input is reported as an error. Protocol anomalies
//! (unexpected flags, missed handshakes) are logged by the processor and never
//! surface here.

use thiserror::Error;

use crate::{conn::Family, packet::types::PacketError};

/// Errors returned for a single packet handed to the tracker.
///
/// A packet that fails with one of these leaves all flow state untouched.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The capture layer reported a packet type that is neither outgoing nor
    /// destined to this host.
    #[error("invalid packet type {0}: expected PACKET_OUTGOING or PACKET_HOST")]
    InvalidDirection(u8),

    /// The IP header does not belong to the connection's address family.
    #[error("ip header family {actual} does not match connection family {expected}")]
    FamilyMismatch { expected: Family, actual: Family },

    /// The headers could not produce a payload length.
    #[error(transparent)]
    Packet(#[from] PacketError),
}
