//! Header decoding for raw L3 packets and TCP payload length derivation.
//!
//! The parser handles a single network layer header (IPv4 without fragments
//! reassembly, IPv6 without extension headers) followed by TCP. Anything else
//! is rejected with a [`PacketError`].

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::{
    packet::types::{
        IPPROTO_TCP, IPV4_LEN, IPV6_LEN, IpHeader, Ipv4Header, Ipv6Header, PacketError, TCP_LEN,
        TcpHeader,
    },
    tcp::flags::TcpFlags,
};

/// Decodes a raw packet starting at the IP header.
pub fn parse_packet(data: &[u8]) -> Result<(IpHeader, TcpHeader), PacketError> {
    let first = *data.first().ok_or(PacketError::TooShort {
        needed: 1,
        available: 0,
    })?;

    let mut offset = 0;
    let ip = match first >> 4 {
        4 => IpHeader::V4(parse_ipv4(data, &mut offset)?),
        6 => IpHeader::V6(parse_ipv6(data, &mut offset)?),
        version => return Err(PacketError::InvalidVersion(version)),
    };
    let tcp = parse_tcp(data, offset)?;

    Ok((ip, tcp))
}

/// Computes the number of TCP payload bytes carried by a segment.
///
/// IPv4 uses the total length minus the IP and TCP header lengths; IPv6 uses
/// the payload length minus the TCP header length. The captured buffer may be
/// truncated, so the lengths from the headers are trusted over the buffer size.
pub fn tcp_payload_len(ip: &IpHeader, tcp: &TcpHeader) -> Result<u16, PacketError> {
    if tcp.hdr_len() < TCP_LEN {
        return Err(PacketError::InvalidDataOffset(tcp.data_offset));
    }

    let (ip_len, header_len) = match ip {
        IpHeader::V4(h) => (
            usize::from(h.total_len),
            usize::from(h.ihl) + tcp.hdr_len(),
        ),
        IpHeader::V6(h) => (usize::from(h.payload_len), tcp.hdr_len()),
    };

    ip_len
        .checked_sub(header_len)
        .and_then(|len| u16::try_from(len).ok())
        .ok_or(PacketError::HeaderExceedsLength { header_len, ip_len })
}

fn ensure_len(data: &[u8], needed: usize) -> Result<(), PacketError> {
    if data.len() < needed {
        return Err(PacketError::TooShort {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

fn parse_ipv4(data: &[u8], offset: &mut usize) -> Result<Ipv4Header, PacketError> {
    ensure_len(data, *offset + IPV4_LEN)?;
    let base = *offset;

    let ihl = (data[base] & 0x0F) << 2;
    if usize::from(ihl) < IPV4_LEN {
        return Err(PacketError::InvalidIhl(ihl));
    }
    ensure_len(data, base + usize::from(ihl))?;

    let protocol = data[base + 9];
    if protocol != IPPROTO_TCP {
        return Err(PacketError::UnsupportedProtocol(protocol));
    }

    let header = Ipv4Header {
        ihl,
        total_len: u16::from_be_bytes([data[base + 2], data[base + 3]]),
        protocol,
        src: Ipv4Addr::new(
            data[base + 12],
            data[base + 13],
            data[base + 14],
            data[base + 15],
        ),
        dst: Ipv4Addr::new(
            data[base + 16],
            data[base + 17],
            data[base + 18],
            data[base + 19],
        ),
    };

    *offset += usize::from(ihl);
    Ok(header)
}

fn parse_ipv6(data: &[u8], offset: &mut usize) -> Result<Ipv6Header, PacketError> {
    ensure_len(data, *offset + IPV6_LEN)?;
    let base = *offset;

    let next_header = data[base + 6];
    if next_header != IPPROTO_TCP {
        return Err(PacketError::UnsupportedProtocol(next_header));
    }

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&data[base + 8..base + 24]);
    dst.copy_from_slice(&data[base + 24..base + 40]);

    let header = Ipv6Header {
        payload_len: u16::from_be_bytes([data[base + 4], data[base + 5]]),
        next_header,
        src: Ipv6Addr::from(src),
        dst: Ipv6Addr::from(dst),
    };

    *offset += IPV6_LEN;
    Ok(header)
}

fn parse_tcp(data: &[u8], offset: usize) -> Result<TcpHeader, PacketError> {
    ensure_len(data, offset + TCP_LEN)?;
    let d = &data[offset..];

    let data_offset = (d[12] >> 4) & 0x0F;
    if usize::from(data_offset) * 4 < TCP_LEN {
        return Err(PacketError::InvalidDataOffset(data_offset));
    }

    Ok(TcpHeader {
        src_port: u16::from_be_bytes([d[0], d[1]]),
        dst_port: u16::from_be_bytes([d[2], d[3]]),
        seq: u32::from_be_bytes([d[4], d[5], d[6], d[7]]),
        ack: u32::from_be_bytes([d[8], d[9], d[10], d[11]]),
        data_offset,
        flags: TcpFlags::from_bits(d[13]),
        window: u16::from_be_bytes([d[14], d[15]]),
    })
}
