//! Connection identity and the caller-owned per-connection statistics that the
//! TCP processor mutates.

use std::{
    collections::HashMap,
    fmt,
    net::{IpAddr, SocketAddr},
};

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Address family of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Inet,
    Inet6,
}

impl Family {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Family::Inet => "inet",
            Family::Inet6 => "inet6",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a flow from the local host's point of view.
///
/// `source` is always the local endpoint and `dest` the remote one, regardless
/// of which side a given packet travels from. `pid` and `netns` disambiguate
/// identical address tuples owned by different processes or network namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionTuple {
    pub source: IpAddr,
    pub dest: IpAddr,
    pub sport: u16,
    pub dport: u16,
    pub family: Family,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub netns: u32,
}

impl ConnectionTuple {
    /// Builds a tuple from the local and remote socket addresses.
    ///
    /// The family is taken from the local address.
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        let family = if local.is_ipv4() {
            Family::Inet
        } else {
            Family::Inet6
        };
        Self {
            source: local.ip(),
            dest: remote.ip(),
            sport: local.port(),
            dport: remote.port(),
            family,
            pid: 0,
            netns: 0,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_netns(mut self, netns: u32) -> Self {
        self.netns = netns;
        self
    }
}

impl fmt::Display for ConnectionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (pid={}, netns={})",
            SocketAddr::new(self.source, self.sport),
            SocketAddr::new(self.dest, self.dport),
            self.pid,
            self.netns
        )
    }
}

/// Which way a captured packet travelled relative to the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Originated on this host.
    Outgoing,
    /// Destined to this host.
    Incoming,
}

impl Direction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts an `AF_PACKET` `sll_pkttype` value into a [`Direction`].
///
/// Only `PACKET_OUTGOING` and `PACKET_HOST` describe traffic of this host;
/// anything else (broadcast, multicast, other-host) is rejected.
impl TryFrom<u8> for Direction {
    type Error = TrackerError;

    fn try_from(pkt_type: u8) -> Result<Self, Self::Error> {
        match pkt_type {
            t if t == libc::PACKET_OUTGOING as u8 => Ok(Direction::Outgoing),
            t if t == libc::PACKET_HOST as u8 => Ok(Direction::Incoming),
            _ => Err(TrackerError::InvalidDirection(pkt_type)),
        }
    }
}

/// Reason a TCP connection failed, as inferred from an RST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// RST during the handshake.
    ConnectionRefused,
    /// RST on an open or closing connection.
    ConnectionReset,
}

impl FailureKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectionRefused => "connection-refused",
            FailureKind::ConnectionReset => "connection-reset",
        }
    }

    /// The errno a socket would have reported for this failure.
    pub const fn errno(&self) -> i32 {
        match self {
            FailureKind::ConnectionRefused => libc::ECONNREFUSED,
            FailureKind::ConnectionReset => libc::ECONNRESET,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters that only ever increase for the lifetime of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Monotonic {
    pub sent_bytes: u64,
    pub recv_bytes: u64,
    pub sent_packets: u64,
    pub recv_packets: u64,
    pub tcp_established: u32,
    pub tcp_closed: u32,
}

/// Per-connection statistics owned by the caller.
///
/// The tracker mutates `monotonic` and `tcp_failures` but never creates,
/// stores or drops these objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub tuple: ConnectionTuple,
    pub monotonic: Monotonic,
    pub tcp_failures: HashMap<FailureKind, u32>,
}

impl ConnectionStats {
    pub fn new(tuple: ConnectionTuple) -> Self {
        Self {
            tuple,
            monotonic: Monotonic::default(),
            tcp_failures: HashMap::new(),
        }
    }

    pub(crate) fn record_failure(&mut self, kind: FailureKind) {
        *self.tcp_failures.entry(kind).or_insert(0) += 1;
    }

    /// Number of times `kind` was recorded for this connection.
    pub fn failures(&self, kind: FailureKind) -> u32 {
        self.tcp_failures.get(&kind).copied().unwrap_or(0)
    }
}
