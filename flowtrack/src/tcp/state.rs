use std::fmt;

use serde::{Serialize, Serializer};

/// TCP connection state based on RFC 9293 section 3.3.2:
/// https://datatracker.ietf.org/doc/html/rfc9293#section-3.3.2
///
/// The tracker only ever sees headers, so these are the states the local
/// endpoint is *inferred* to be in, not the kernel's own view of the socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TcpState {
    /// No connection observed, or the connection was torn down
    #[default]
    Closed,
    /// A SYN went out and we are waiting for the peer's SYN-ACK
    SynSent,
    /// A SYN came in (or a SYN-ACK was seen without the SYN) and the final ACK is pending
    SynRecv,
    /// Handshake completed, data transfer phase
    Established,
    /// We sent a FIN that the peer has not acknowledged yet
    FinWait1,
    /// Our FIN was acknowledged, waiting for the peer's FIN
    FinWait2,
    /// The peer's FIN was acknowledged, waiting for the local side to close
    CloseWait,
    /// Both sides sent a FIN before either was acknowledged
    Closing,
    /// Passive close: our FIN is out, waiting for its acknowledgment
    LastAck,
    /// Active close finished; the peer's FIN was acknowledged
    TimeWait,
}

impl TcpState {
    /// Convert the state to a string representation matching OpenTelemetry
    /// semantic conventions
    pub const fn as_str(&self) -> &'static str {
        match self {
            TcpState::Closed => "closed",
            TcpState::SynSent => "syn_sent",
            TcpState::SynRecv => "syn_received",
            TcpState::Established => "established",
            TcpState::FinWait1 => "fin_wait_1",
            TcpState::FinWait2 => "fin_wait_2",
            TcpState::CloseWait => "close_wait",
            TcpState::Closing => "closing",
            TcpState::LastAck => "last_ack",
            TcpState::TimeWait => "time_wait",
        }
    }

    /// True for the states a connection rests in once it is over. An RST seen
    /// in one of these is a duplicate and is not counted again.
    pub const fn is_closed(&self) -> bool {
        matches!(self, TcpState::Closed | TcpState::TimeWait)
    }

    /// True while the three-way handshake is still in progress.
    pub const fn is_handshake(&self) -> bool {
        matches!(self, TcpState::SynSent | TcpState::SynRecv)
    }

    /// True once either side has started tearing the connection down.
    pub const fn is_closing(&self) -> bool {
        matches!(
            self,
            TcpState::FinWait1
                | TcpState::FinWait2
                | TcpState::CloseWait
                | TcpState::Closing
                | TcpState::LastAck
                | TcpState::TimeWait
        )
    }
}

impl Serialize for TcpState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_closed() {
        assert_eq!(TcpState::default(), TcpState::Closed);
    }

    #[test]
    fn test_as_str() {
        assert_eq!(TcpState::Closed.as_str(), "closed");
        assert_eq!(TcpState::SynSent.as_str(), "syn_sent");
        assert_eq!(TcpState::SynRecv.as_str(), "syn_received");
        assert_eq!(TcpState::Established.as_str(), "established");
        assert_eq!(TcpState::FinWait1.as_str(), "fin_wait_1");
        assert_eq!(TcpState::FinWait2.as_str(), "fin_wait_2");
        assert_eq!(TcpState::CloseWait.as_str(), "close_wait");
        assert_eq!(TcpState::Closing.as_str(), "closing");
        assert_eq!(TcpState::LastAck.as_str(), "last_ack");
        assert_eq!(TcpState::TimeWait.as_str(), "time_wait");
    }

    #[test]
    fn test_state_classes() {
        assert!(TcpState::Closed.is_closed());
        assert!(TcpState::TimeWait.is_closed());
        assert!(!TcpState::LastAck.is_closed());

        assert!(TcpState::SynSent.is_handshake());
        assert!(TcpState::SynRecv.is_handshake());
        assert!(!TcpState::Established.is_handshake());

        assert!(TcpState::CloseWait.is_closing());
        assert!(!TcpState::Established.is_closing());
        assert!(!TcpState::Closed.is_closing());
    }

    #[test]
    fn test_serialize_uses_semconv_name() {
        let json = serde_json::to_string(&TcpState::FinWait1).unwrap();
        assert_eq!(json, "\"fin_wait_1\"");
    }
}
