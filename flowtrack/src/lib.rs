//! Connectionless TCP state tracking.
//!
//! `flowtrack` follows TCP connections from the headers of captured packets
//! alone, without access to the kernel's socket table. For each flow it infers
//! the RFC 9293 state of the local endpoint and maintains byte, packet,
//! handshake and teardown counters, and records refused or reset connections.
//!
//! The entry point is [`TcpProcessor`]: hand it the caller-owned
//! [`ConnectionStats`] of a flow together with the direction and decoded
//! headers of each packet, in capture order.

pub mod conn;
pub mod error;
pub mod flow_table;
pub mod packet;
pub mod replay;
pub mod runtime;
pub mod seq;
pub mod tcp;

pub use conn::{ConnectionStats, ConnectionTuple, Direction, FailureKind, Family, Monotonic};
pub use error::TrackerError;
pub use flow_table::{ExpiredFlow, FlowTable};
pub use tcp::{ConnectionState, TcpProcessor, TcpState};
