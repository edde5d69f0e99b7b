//! Decoded header types handed to the TCP processor.
//!
//! Only the fields the tracker needs are kept: lengths for computing the TCP
//! payload size, addresses for diagnostics, and the TCP sequence space.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::{conn::Family, tcp::flags::TcpFlags};

/// The length of the IPv4 header without options.
pub const IPV4_LEN: usize = 20;
/// The length of the fixed IPv6 header.
pub const IPV6_LEN: usize = 40;
/// The length of the TCP header without options.
pub const TCP_LEN: usize = 20;

/// IANA protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL * 4).
    pub ihl: u8,
    /// Total length of the datagram, header included.
    pub total_len: u16,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    /// Length of everything after the fixed 40 byte header.
    pub payload_len: u16,
    pub next_header: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

/// A decoded network layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

impl IpHeader {
    pub fn family(&self) -> Family {
        match self {
            IpHeader::V4(_) => Family::Inet,
            IpHeader::V6(_) => Family::Inet6,
        }
    }

    pub fn src(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.src),
            IpHeader::V6(h) => IpAddr::V6(h.src),
        }
    }

    pub fn dst(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.dst),
            IpHeader::V6(h) => IpAddr::V6(h.dst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Header length in 32-bit words.
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
}

impl TcpHeader {
    /// Returns the header length in bytes, options included.
    #[inline]
    pub fn hdr_len(&self) -> usize {
        usize::from(self.data_offset) * 4
    }
}

/// Errors raised while decoding headers or deriving the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet too short: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("unsupported ip version {0}")]
    InvalidVersion(u8),

    #[error("invalid ipv4 header length {0} bytes")]
    InvalidIhl(u8),

    #[error("not a tcp packet (protocol {0})")]
    UnsupportedProtocol(u8),

    #[error("invalid tcp data offset {0} (minimum is 5)")]
    InvalidDataOffset(u8),

    #[error("headers ({header_len} bytes) exceed the ip length ({ip_len} bytes)")]
    HeaderExceedsLength { header_len: usize, ip_len: usize },
}
