//! Per-flow TCP state record and the header-driven state machine.
//!
//! The record only ever sees headers, in capture order, from the local host's
//! point of view. Received byte counts are inferred from the local host's own
//! acknowledgment numbers, since outbound headers are the only ones guaranteed
//! to be observable in every capture mode.
//!
//! Each segment goes through the same ordered steps:
//!
//! 1. validation of the flag combination
//! 2. byte/packet accounting
//! 3. plain ACK progression (does not stop processing)
//! 4. RST
//! 5. bare SYN
//! 6. SYN-ACK
//! 7. FIN
//!
//! ACK progression runs first so that a combined FIN+ACK or RST+ACK still has
//! its acknowledgment applied; RST is checked before SYN and FIN.

use tracing::{trace, warn};

use crate::{
    conn::{ConnectionStats, Direction, FailureKind},
    packet::types::TcpHeader,
    seq,
    tcp::{flags::TcpFlags, state::TcpState},
};

/// Tracked state of a single TCP flow.
///
/// Every optional field is `None` until the corresponding event is observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    tcp_state: TcpState,

    /// First outbound sequence number.
    local_start_seq: Option<u32>,
    /// Highest outbound `seq + payload_len`; only moves forward.
    max_seq_sent: Option<u32>,
    /// Most recent outbound acknowledgment number; only moves forward.
    last_ack: Option<u32>,

    /// First inbound sequence number.
    remote_start_seq: Option<u32>,

    /// A SYN-ACK was seen; required before the final handshake ACK counts.
    has_syn_acked: bool,

    /// `seq + payload_len` of the first outbound FIN.
    local_fin_seq: Option<u32>,
    /// `seq + payload_len` of the first inbound FIN.
    remote_fin_seq: Option<u32>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tcp_state(&self) -> TcpState {
        self.tcp_state
    }

    pub fn has_syn_acked(&self) -> bool {
        self.has_syn_acked
    }

    pub fn local_start_seq(&self) -> Option<u32> {
        self.local_start_seq
    }

    pub fn max_seq_sent(&self) -> Option<u32> {
        self.max_seq_sent
    }

    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    pub fn remote_start_seq(&self) -> Option<u32> {
        self.remote_start_seq
    }

    pub fn local_fin_seq(&self) -> Option<u32> {
        self.local_fin_seq
    }

    pub fn remote_fin_seq(&self) -> Option<u32> {
        self.remote_fin_seq
    }

    /// Outbound sequence number relative to the first one seen, for logging.
    pub fn relative_local_seq(&self, seq: u32) -> Option<u32> {
        self.local_start_seq.map(|start| seq::distance(start, seq))
    }

    /// Inbound sequence number relative to the first one seen, for logging.
    pub fn relative_remote_seq(&self, seq: u32) -> Option<u32> {
        self.remote_start_seq.map(|start| seq::distance(start, seq))
    }

    /// Applies one segment to this flow, updating `stats` as a side effect.
    ///
    /// Anomalies are logged and otherwise ignored; a single odd segment never
    /// stops tracking of the flow.
    pub fn on_segment(
        &mut self,
        stats: &mut ConnectionStats,
        direction: Direction,
        tcp: &TcpHeader,
        payload_len: u16,
    ) {
        let flags = tcp.flags;

        if !is_valid_combo(flags) {
            warn!(
                event.name = "tcp.invalid_flags",
                tcp.flags = %flags,
                tcp.state = %self.tcp_state,
                network.direction = %direction,
                "ignoring segment with invalid flag combination"
            );
            return;
        }

        let payload_seq = tcp.seq.wrapping_add(u32::from(payload_len));
        self.account(stats, direction, tcp, payload_seq, payload_len);

        trace!(
            event.name = "tcp.segment",
            network.direction = %direction,
            tcp.flags = %flags,
            tcp.seq = tcp.seq,
            tcp.ack = tcp.ack,
            tcp.payload_len = payload_len,
            tcp.relative_seq = ?match direction {
                Direction::Outgoing => self.relative_local_seq(tcp.seq),
                Direction::Incoming => self.relative_remote_seq(tcp.seq),
            },
            tcp.state = %self.tcp_state,
            "processing segment"
        );

        if flags.ack() && !flags.syn() {
            self.on_ack(stats, direction, tcp.ack);
        }

        if flags.rst() {
            self.on_rst(stats);
            return;
        }

        if flags.syn() && !flags.ack() {
            self.on_syn(direction);
            return;
        }

        if flags.syn() && flags.ack() {
            self.on_syn_ack();
            return;
        }

        if flags.fin() {
            self.on_fin(direction, payload_seq);
        }
    }

    fn account(
        &mut self,
        stats: &mut ConnectionStats,
        direction: Direction,
        tcp: &TcpHeader,
        payload_seq: u32,
        payload_len: u16,
    ) {
        match direction {
            Direction::Outgoing => {
                stats.monotonic.sent_packets += 1;
                self.local_start_seq.get_or_insert(tcp.seq);

                match self.max_seq_sent {
                    Some(max) if !seq::is_before(max, payload_seq) => {
                        trace!(
                            event.name = "tcp.retransmit",
                            tcp.seq = tcp.seq,
                            tcp.max_seq_sent = max,
                            "outbound segment does not advance the sequence space"
                        );
                    }
                    _ => {
                        stats.monotonic.sent_bytes += u64::from(payload_len);
                        self.max_seq_sent = Some(payload_seq);
                    }
                }

                if tcp.flags.ack() {
                    self.account_ack(stats, tcp.ack);
                }
            }
            Direction::Incoming => {
                stats.monotonic.recv_packets += 1;
                self.remote_start_seq.get_or_insert(tcp.seq);
            }
        }
    }

    /// Infers received bytes from the advance of our own acknowledgment number.
    fn account_ack(&mut self, stats: &mut ConnectionStats, ack: u32) {
        let Some(last) = self.last_ack else {
            self.last_ack = Some(ack);
            return;
        };
        if !seq::is_before(last, ack) {
            return;
        }

        let mut acked = seq::distance(last, ack);
        // The remote FIN occupies one sequence number but carries no data.
        if self
            .remote_fin_seq
            .is_some_and(|fin| ack == fin.wrapping_add(1))
        {
            acked -= 1;
        }
        stats.monotonic.recv_bytes += u64::from(acked);
        self.last_ack = Some(ack);
    }

    fn on_ack(&mut self, stats: &mut ConnectionStats, direction: Direction, ack: u32) {
        match self.tcp_state {
            TcpState::Closed => {
                trace!(
                    event.name = "tcp.ack_without_handshake",
                    network.direction = %direction,
                    "ack on a flow whose handshake was not observed"
                );
            }
            TcpState::SynSent => {
                if direction == Direction::Outgoing {
                    self.complete_handshake(stats);
                }
            }
            TcpState::SynRecv => {
                if direction == Direction::Incoming {
                    self.complete_handshake(stats);
                }
            }
            TcpState::Established => {
                // passive close: the remote FIN has been acknowledged
                if self.remote_fin_acked_by(ack) {
                    self.tcp_state = TcpState::CloseWait;
                }
            }
            TcpState::FinWait1 => {
                if direction == Direction::Incoming && self.local_fin_acked_by(ack) {
                    self.tcp_state = TcpState::FinWait2;
                }
            }
            TcpState::FinWait2 => {
                if direction == Direction::Outgoing && self.remote_fin_acked_by(ack) {
                    self.tcp_state = TcpState::TimeWait;
                    stats.monotonic.tcp_closed += 1;
                }
            }
            TcpState::Closing | TcpState::LastAck => {
                if direction == Direction::Incoming && self.local_fin_acked_by(ack) {
                    // simultaneous close ends in TIME-WAIT like an active close
                    self.tcp_state = if self.tcp_state == TcpState::Closing {
                        TcpState::TimeWait
                    } else {
                        TcpState::Closed
                    };
                    stats.monotonic.tcp_closed += 1;
                }
            }
            TcpState::CloseWait | TcpState::TimeWait => {}
        }
    }

    fn complete_handshake(&mut self, stats: &mut ConnectionStats) {
        if self.has_syn_acked {
            self.tcp_state = TcpState::Established;
            stats.monotonic.tcp_established += 1;
        } else {
            warn!(
                event.name = "tcp.missed_syn_ack",
                tcp.state = %self.tcp_state,
                "handshake ack without an observed syn-ack"
            );
        }
    }

    fn remote_fin_acked_by(&self, ack: u32) -> bool {
        self.remote_fin_seq
            .is_some_and(|fin| seq::is_before(fin, ack))
    }

    fn local_fin_acked_by(&self, ack: u32) -> bool {
        match self.local_fin_seq {
            Some(fin) => seq::is_before(fin, ack),
            None => {
                warn!(
                    event.name = "tcp.missing_local_fin",
                    tcp.state = %self.tcp_state,
                    "closing state entered without an outbound fin"
                );
                false
            }
        }
    }

    fn on_rst(&mut self, stats: &mut ConnectionStats) {
        if self.tcp_state.is_closed() {
            trace!(
                event.name = "tcp.duplicate_rst",
                tcp.state = %self.tcp_state,
                "rst on an already closed flow"
            );
            return;
        }

        let kind = if self.tcp_state.is_handshake() {
            FailureKind::ConnectionRefused
        } else {
            FailureKind::ConnectionReset
        };
        stats.record_failure(kind);

        stats.monotonic.tcp_closed += 1;
        self.tcp_state = TcpState::Closed;
    }

    fn on_syn(&mut self, direction: Direction) {
        match self.tcp_state {
            TcpState::Closed | TcpState::TimeWait => {
                self.tcp_state = match direction {
                    Direction::Outgoing => TcpState::SynSent,
                    Direction::Incoming => TcpState::SynRecv,
                };
            }
            TcpState::SynSent if direction == Direction::Incoming => {
                // simultaneous open
                self.tcp_state = TcpState::SynRecv;
            }
            TcpState::SynSent | TcpState::SynRecv => {
                trace!(
                    event.name = "tcp.syn_retransmit",
                    network.direction = %direction,
                    "retransmitted syn"
                );
            }
            state => {
                warn!(
                    event.name = "tcp.unexpected_syn",
                    tcp.state = %state,
                    network.direction = %direction,
                    "syn on a connection past the handshake"
                );
            }
        }
    }

    fn on_syn_ack(&mut self) {
        match self.tcp_state {
            TcpState::Closed => {
                // The initial SYN was missed; assume the handshake started normally.
                trace!(
                    event.name = "tcp.missed_syn",
                    "syn-ack without an observed syn"
                );
                self.tcp_state = TcpState::SynRecv;
                self.has_syn_acked = true;
            }
            TcpState::SynSent | TcpState::SynRecv => {
                self.has_syn_acked = true;
            }
            TcpState::Established => {
                trace!(event.name = "tcp.syn_ack_retransmit", "retransmitted syn-ack");
            }
            state => {
                warn!(
                    event.name = "tcp.unexpected_syn_ack",
                    tcp.state = %state,
                    "syn-ack on a connection past the handshake"
                );
            }
        }
    }

    fn on_fin(&mut self, direction: Direction, payload_seq: u32) {
        let fin_seq = match direction {
            Direction::Outgoing => &mut self.local_fin_seq,
            Direction::Incoming => &mut self.remote_fin_seq,
        };
        if fin_seq.is_none() {
            *fin_seq = Some(payload_seq);
        } else {
            trace!(
                event.name = "tcp.fin_retransmit",
                network.direction = %direction,
                "retransmitted fin"
            );
        }

        match self.tcp_state {
            // SYN-RECV is possible when the listener never accept()ed the connection.
            TcpState::SynRecv | TcpState::Established => {
                // inbound: passive close, CLOSE-WAIT follows once we ack the FIN
                if direction == Direction::Outgoing {
                    self.tcp_state = TcpState::FinWait1;
                }
            }
            TcpState::FinWait1 => {
                if direction == Direction::Incoming {
                    self.tcp_state = TcpState::Closing;
                }
            }
            TcpState::CloseWait => {
                if direction == Direction::Outgoing {
                    self.tcp_state = TcpState::LastAck;
                }
            }
            TcpState::FinWait2 | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait => {}
            state @ (TcpState::Closed | TcpState::SynSent) => {
                warn!(
                    event.name = "tcp.unexpected_fin",
                    tcp.state = %state,
                    network.direction = %direction,
                    "fin before the handshake completed, cannot tell active from passive close"
                );
            }
        }
    }
}

/// SYN together with FIN, or none of SYN/FIN/ACK/RST, is noise.
pub(crate) fn is_valid_combo(flags: TcpFlags) -> bool {
    let syn_fin = flags.syn() && flags.fin();
    let no_flags = !flags.syn() && !flags.fin() && !flags.ack() && !flags.rst();
    !(syn_fin || no_flags)
}
