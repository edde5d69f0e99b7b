//! Packet header decoding for the tracker.
//!
//! The capture layer hands over raw frames; this module turns the network and
//! transport headers into the small decoded structures the TCP processor
//! consumes, and derives the TCP payload length from them.

pub mod parser;
pub mod types;

pub use parser::{parse_packet, tcp_payload_len};
pub use types::{IpHeader, Ipv4Header, Ipv6Header, PacketError, TcpHeader};
