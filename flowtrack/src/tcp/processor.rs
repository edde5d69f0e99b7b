use std::time::Instant;

use tracing::{trace, warn};

use crate::{
    conn::{ConnectionStats, ConnectionTuple, Direction},
    error::TrackerError,
    flow_table::{ExpiredFlow, FlowTable},
    packet::{IpHeader, TcpHeader, tcp_payload_len},
    runtime::conf::flow::FlowConf,
    tcp::connection::{ConnectionState, is_valid_combo},
};

/// Infers TCP connection state and statistics from captured headers alone.
///
/// The processor owns the per-flow state records; the caller owns the
/// [`ConnectionStats`] for each flow and passes them in with every packet.
/// All methods take `&self` and may be called from several threads as long as
/// packets of a single flow are handed over in capture order.
#[derive(Debug, Default)]
pub struct TcpProcessor {
    flows: FlowTable,
}

impl TcpProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_flow_table(FlowTable::with_capacity(capacity))
    }

    pub fn with_flow_table(flows: FlowTable) -> Self {
        Self { flows }
    }

    /// Processes one captured packet given its raw `AF_PACKET` packet type.
    ///
    /// # Errors
    /// Fails with [`TrackerError::InvalidDirection`] for packet types other
    /// than `PACKET_OUTGOING` and `PACKET_HOST`, and otherwise as [`process`].
    /// No flow state is touched on error.
    ///
    /// [`process`]: TcpProcessor::process
    pub fn process_captured(
        &self,
        stats: &mut ConnectionStats,
        pkt_type: u8,
        ip: &IpHeader,
        tcp: &TcpHeader,
    ) -> Result<(), TrackerError> {
        let direction = Direction::try_from(pkt_type)?;
        self.process(stats, direction, ip, tcp)
    }

    /// Processes one packet of the flow identified by `stats.tuple`.
    ///
    /// # Errors
    /// Fails when the IP header's family differs from the tuple's, or when
    /// the header lengths do not leave room for the TCP header. No flow state
    /// is touched on error.
    pub fn process(
        &self,
        stats: &mut ConnectionStats,
        direction: Direction,
        ip: &IpHeader,
        tcp: &TcpHeader,
    ) -> Result<(), TrackerError> {
        let family = ip.family();
        if family != stats.tuple.family {
            return Err(TrackerError::FamilyMismatch {
                expected: stats.tuple.family,
                actual: family,
            });
        }

        let payload_len = tcp_payload_len(ip, tcp)?;
        self.process_segment(stats, direction, tcp, payload_len);
        Ok(())
    }

    /// Processes a segment whose payload length is already known.
    pub fn process_segment(
        &self,
        stats: &mut ConnectionStats,
        direction: Direction,
        tcp: &TcpHeader,
        payload_len: u16,
    ) {
        self.process_segment_at(stats, direction, tcp, payload_len, Instant::now());
    }

    /// Like [`process_segment`](TcpProcessor::process_segment) with an explicit
    /// capture time, used for the flow's idle tracking.
    pub fn process_segment_at(
        &self,
        stats: &mut ConnectionStats,
        direction: Direction,
        tcp: &TcpHeader,
        payload_len: u16,
        now: Instant,
    ) {
        // noise never creates a flow or refreshes its idle timer
        if !is_valid_combo(tcp.flags) {
            warn!(
                event.name = "tcp.invalid_flags",
                flow.tuple = %stats.tuple,
                tcp.flags = %tcp.flags,
                network.direction = %direction,
                "ignoring segment with invalid flag combination"
            );
            return;
        }

        let mut entry = self.flows.touch(&stats.tuple, now);

        trace!(
            event.name = "tcp.flow.before",
            flow.tuple = %stats.tuple,
            flow.record = ?entry.state,
            flow.monotonic = ?stats.monotonic,
            "flow before segment"
        );

        entry.state.on_segment(stats, direction, tcp, payload_len);

        trace!(
            event.name = "tcp.flow.after",
            flow.tuple = %stats.tuple,
            flow.record = ?entry.state,
            flow.monotonic = ?stats.monotonic,
            "flow after segment"
        );
    }

    /// Snapshot of the tracked state for `tuple`.
    pub fn state(&self, tuple: &ConnectionTuple) -> Option<ConnectionState> {
        self.flows.get(tuple).map(|entry| entry.state)
    }

    /// Stops tracking `tuple`, returning its last state.
    pub fn remove(&self, tuple: &ConnectionTuple) -> Option<ConnectionState> {
        self.flows.remove(tuple).map(|entry| entry.state)
    }

    /// Evicts idle flows; see [`FlowTable::expire`].
    pub fn expire(&self, now: Instant, conf: &FlowConf) -> Vec<ExpiredFlow> {
        self.flows.expire(now, conf)
    }

    pub fn flows(&self) -> &FlowTable {
        &self.flows
    }
}
