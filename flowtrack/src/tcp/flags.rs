use std::fmt;

use serde::{Deserialize, Serialize};

/// TCP flag masks, as laid out in the 14th byte of the TCP header.
pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;
pub const TCP_FLAG_PSH: u8 = 0x08;
pub const TCP_FLAG_ACK: u8 = 0x10;
pub const TCP_FLAG_URG: u8 = 0x20;
pub const TCP_FLAG_ECE: u8 = 0x40;
pub const TCP_FLAG_CWR: u8 = 0x80;

/// Individual TCP flag as specified in the TCP header
/// Based on IANA "TCP Header Flags" registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpFlag {
    /// FIN: No more data from sender
    Fin,
    /// SYN: Synchronize sequence numbers
    Syn,
    /// RST: Reset the connection
    Rst,
    /// PSH: Push function
    Psh,
    /// ACK: Acknowledgment field is significant
    Ack,
    /// URG: Urgent pointer field is significant
    Urg,
    /// ECE: ECN-Echo
    Ece,
    /// CWR: Congestion Window Reduced
    Cwr,
}

const ALL_FLAGS: [TcpFlag; 8] = [
    TcpFlag::Fin,
    TcpFlag::Syn,
    TcpFlag::Rst,
    TcpFlag::Psh,
    TcpFlag::Ack,
    TcpFlag::Urg,
    TcpFlag::Ece,
    TcpFlag::Cwr,
];

impl TcpFlag {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TcpFlag::Fin => "fin",
            TcpFlag::Syn => "syn",
            TcpFlag::Rst => "rst",
            TcpFlag::Psh => "psh",
            TcpFlag::Ack => "ack",
            TcpFlag::Urg => "urg",
            TcpFlag::Ece => "ece",
            TcpFlag::Cwr => "cwr",
        }
    }

    /// Bit mask of this flag within the flags byte.
    pub const fn mask(&self) -> u8 {
        match self {
            TcpFlag::Fin => TCP_FLAG_FIN,
            TcpFlag::Syn => TCP_FLAG_SYN,
            TcpFlag::Rst => TCP_FLAG_RST,
            TcpFlag::Psh => TCP_FLAG_PSH,
            TcpFlag::Ack => TCP_FLAG_ACK,
            TcpFlag::Urg => TCP_FLAG_URG,
            TcpFlag::Ece => TCP_FLAG_ECE,
            TcpFlag::Cwr => TCP_FLAG_CWR,
        }
    }
}

impl fmt::Display for TcpFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The flags byte of a TCP header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags {
    bits: u8,
}

impl TcpFlags {
    pub const fn from_bits(bits: u8) -> Self {
        Self { bits }
    }

    pub const fn bits(&self) -> u8 {
        self.bits
    }

    pub const fn fin(&self) -> bool {
        self.bits & TCP_FLAG_FIN != 0
    }

    pub const fn syn(&self) -> bool {
        self.bits & TCP_FLAG_SYN != 0
    }

    pub const fn rst(&self) -> bool {
        self.bits & TCP_FLAG_RST != 0
    }

    pub const fn psh(&self) -> bool {
        self.bits & TCP_FLAG_PSH != 0
    }

    pub const fn ack(&self) -> bool {
        self.bits & TCP_FLAG_ACK != 0
    }

    /// Get only the flags that are set, in header bit order.
    pub fn active_flags(&self) -> Vec<TcpFlag> {
        ALL_FLAGS
            .iter()
            .filter(|flag| self.bits & flag.mask() != 0)
            .copied()
            .collect()
    }
}

impl FromIterator<TcpFlag> for TcpFlags {
    fn from_iter<I: IntoIterator<Item = TcpFlag>>(iter: I) -> Self {
        let bits = iter.into_iter().fold(0, |bits, flag| bits | flag.mask());
        Self { bits }
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.active_flags();
        if active.is_empty() {
            return f.write_str("none");
        }
        for (i, flag) in active.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(flag.as_str())?;
        }
        Ok(())
    }
}
