//! Concurrent storage for per-flow TCP state.
//!
//! The table is a sharded `DashMap` keyed by [`ConnectionTuple`]. Updating a
//! flow holds the shard lock for that tuple until the update returns, so
//! consumers that shard their input by tuple can run in parallel. Ordering of
//! segments within one tuple is still up to the caller.
//!
//! Nothing is evicted implicitly: the caller sweeps the table with
//! [`FlowTable::expire`] on its own schedule (see `FlowConf::expiry_interval`).

use std::{
    ops::DerefMut,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use fxhash::FxBuildHasher;
use serde::Serialize;
use tracing::debug;

use crate::{
    conn::ConnectionTuple,
    runtime::{conf::flow::FlowConf, memory::ShrinkPolicy},
    tcp::{connection::ConnectionState, state::TcpState},
};

#[derive(Debug, Clone, Copy)]
pub struct FlowEntry {
    pub state: ConnectionState,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

impl FlowEntry {
    fn new(now: Instant) -> Self {
        Self {
            state: ConnectionState::new(),
            first_seen: now,
            last_seen: now,
        }
    }
}

/// A flow removed by an expiry sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiredFlow {
    pub tuple: ConnectionTuple,
    pub tcp_state: TcpState,
    /// Time between the first and the last segment seen for the flow.
    #[serde(with = "crate::runtime::conf::conf_serde::duration")]
    pub age: Duration,
}

#[derive(Debug)]
pub struct FlowTable {
    flows: DashMap<ConnectionTuple, FlowEntry, FxBuildHasher>,
    shrink_policy: ShrinkPolicy,
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl FlowTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_shrink_policy(capacity, ShrinkPolicy::flow_table())
    }

    pub fn with_shrink_policy(capacity: usize, shrink_policy: ShrinkPolicy) -> Self {
        Self {
            flows: DashMap::with_capacity_and_hasher(capacity, FxBuildHasher::default()),
            shrink_policy,
        }
    }

    /// Returns the entry for `tuple`, creating it if needed, with `last_seen`
    /// bumped to `now`. The tuple's shard stays locked while the guard lives.
    pub(crate) fn touch<'a>(
        &'a self,
        tuple: &ConnectionTuple,
        now: Instant,
    ) -> impl DerefMut<Target = FlowEntry> + use<'a> {
        let mut entry = match self.flows.get_mut(tuple) {
            Some(entry) => entry,
            None => self
                .flows
                .entry(tuple.clone())
                .or_insert_with(|| FlowEntry::new(now)),
        };
        entry.last_seen = now;
        entry
    }

    /// Snapshot of the tracked state for `tuple`.
    pub fn get(&self, tuple: &ConnectionTuple) -> Option<FlowEntry> {
        self.flows.get(tuple).map(|entry| *entry)
    }

    pub fn remove(&self, tuple: &ConnectionTuple) -> Option<FlowEntry> {
        self.flows.remove(tuple).map(|(_, entry)| entry)
    }

    pub fn clear(&self) {
        self.flows.clear();
        self.flows.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Removes every flow that has been idle longer than the timeout for its
    /// TCP state and returns what was removed.
    pub fn expire(&self, now: Instant, conf: &FlowConf) -> Vec<ExpiredFlow> {
        let mut expired = Vec::new();

        self.flows.retain(|tuple, entry| {
            let idle = now.saturating_duration_since(entry.last_seen);
            if idle <= idle_timeout_for_state(conf, entry.state.tcp_state()) {
                return true;
            }
            expired.push(ExpiredFlow {
                tuple: tuple.clone(),
                tcp_state: entry.state.tcp_state(),
                age: entry.last_seen.saturating_duration_since(entry.first_seen),
            });
            false
        });

        let capacity = self.flows.capacity();
        let remaining = self.flows.len();
        if self.shrink_policy.should_shrink(capacity, remaining) {
            self.flows.shrink_to_fit();
            debug!(
                event.name = "flow_table.shrunk",
                flow_table.capacity_before = capacity,
                flow_table.capacity_after = self.flows.capacity(),
                flow_table.entries = remaining,
                "released unused flow table capacity"
            );
        }

        if !expired.is_empty() {
            debug!(
                event.name = "flow_table.expired",
                flow_table.expired = expired.len(),
                flow_table.entries = remaining,
                "expired idle flows"
            );
        }

        expired
    }
}

/// Selects the idle timeout for a flow from its TCP state.
fn idle_timeout_for_state(conf: &FlowConf, state: TcpState) -> Duration {
    // TIME-WAIT is both closed and closing; closed wins
    if state.is_closed() {
        conf.tcp_closed
    } else if state.is_handshake() {
        conf.tcp_handshake
    } else if state.is_closing() {
        conf.tcp_fin
    } else {
        conf.tcp
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, thread};

    use super::*;
    use crate::{
        conn::{ConnectionStats, Direction},
        packet::types::TcpHeader,
        tcp::flags::{TCP_FLAG_ACK, TCP_FLAG_SYN, TcpFlags},
    };

    fn tuple(port: u16) -> ConnectionTuple {
        let local: SocketAddr = format!("10.0.0.1:{port}").parse().unwrap();
        ConnectionTuple::new(local, "10.0.0.2:443".parse().unwrap())
    }

    fn syn(seq: u32) -> TcpHeader {
        TcpHeader {
            src_port: 0,
            dst_port: 443,
            seq,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::from_bits(TCP_FLAG_SYN),
            window: 0,
        }
    }

    fn create_test_config() -> FlowConf {
        FlowConf {
            expiry_interval: Duration::from_secs(1),
            tcp: Duration::from_secs(100),
            tcp_handshake: Duration::from_secs(20),
            tcp_fin: Duration::from_secs(10),
            tcp_closed: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_touch_creates_and_updates_entry() {
        let table = FlowTable::with_capacity(16);
        let t = tuple(1000);
        let start = Instant::now();

        table.touch(&t, start);
        assert_eq!(table.len(), 1);

        let later = start + Duration::from_secs(3);
        table.touch(&t, later);
        let entry = table.get(&t).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(entry.first_seen, start);
        assert_eq!(entry.last_seen, later);
        assert_eq!(entry.state.tcp_state(), TcpState::Closed);
    }

    #[test]
    fn test_idle_timeout_for_each_state() {
        let conf = create_test_config();

        assert_eq!(idle_timeout_for_state(&conf, TcpState::Closed), conf.tcp_closed);
        assert_eq!(idle_timeout_for_state(&conf, TcpState::TimeWait), conf.tcp_closed);
        assert_eq!(idle_timeout_for_state(&conf, TcpState::SynSent), conf.tcp_handshake);
        assert_eq!(idle_timeout_for_state(&conf, TcpState::SynRecv), conf.tcp_handshake);
        assert_eq!(idle_timeout_for_state(&conf, TcpState::Established), conf.tcp);
        assert_eq!(idle_timeout_for_state(&conf, TcpState::CloseWait), conf.tcp_fin);
        assert_eq!(idle_timeout_for_state(&conf, TcpState::LastAck), conf.tcp_fin);
    }

    #[test]
    fn test_expire_uses_state_timeout() {
        let table = FlowTable::with_capacity(16);
        let conf = create_test_config();
        let start = Instant::now();

        let closed = tuple(1000);
        table.touch(&closed, start);

        let handshake = tuple(1001);
        {
            let mut entry = table.touch(&handshake, start);
            let mut stats = ConnectionStats::new(handshake.clone());
            entry
                .state
                .on_segment(&mut stats, Direction::Outgoing, &syn(7), 0);
        }
        table.touch(&handshake, start + Duration::from_secs(2));

        // closed flow idle for 6s > 5s; handshake idle for 4s < 20s
        let expired = table.expire(start + Duration::from_secs(6), &conf);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].tuple, closed);
        assert_eq!(expired[0].tcp_state, TcpState::Closed);
        assert_eq!(expired[0].age, Duration::ZERO);
        assert!(table.get(&closed).is_none());

        let expired = table.expire(start + Duration::from_secs(23), &conf);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].tuple, handshake);
        assert_eq!(expired[0].tcp_state, TcpState::SynSent);
        assert_eq!(expired[0].age, Duration::from_secs(2));
        assert!(table.is_empty());
    }

    #[test]
    fn test_expire_keeps_flows_at_exact_timeout() {
        let table = FlowTable::with_capacity(16);
        let conf = create_test_config();
        let start = Instant::now();
        table.touch(&tuple(1), start);

        assert!(table.expire(start + conf.tcp_closed, &conf).is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_expire_with_clock_behind_last_seen() {
        let table = FlowTable::with_capacity(16);
        let start = Instant::now();
        table.touch(&tuple(1), start + Duration::from_secs(60));

        assert!(table.expire(start, &create_test_config()).is_empty());
    }

    #[test]
    fn test_expire_shrinks_emptied_table() {
        let policy = ShrinkPolicy {
            min_capacity: 0,
            ..ShrinkPolicy::flow_table()
        };
        let table = FlowTable::with_shrink_policy(4096, policy);
        let start = Instant::now();
        for port in 0..64 {
            table.touch(&tuple(port), start);
        }
        let before = table.flows.capacity();

        let expired = table.expire(start + Duration::from_secs(60), &create_test_config());
        assert_eq!(expired.len(), 64);
        assert!(table.flows.capacity() < before);
    }

    #[test]
    fn test_remove_and_clear() {
        let table = FlowTable::default();
        let start = Instant::now();
        table.touch(&tuple(1), start);
        table.touch(&tuple(2), start);

        assert!(table.remove(&tuple(1)).is_some());
        assert!(table.remove(&tuple(1)).is_none());
        assert_eq!(table.len(), 1);

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_updates_on_distinct_tuples() {
        let table = FlowTable::with_capacity(64);
        let start = Instant::now();

        thread::scope(|s| {
            for worker in 0..4u16 {
                let table = &table;
                s.spawn(move || {
                    for i in 0..50u16 {
                        let t = tuple(worker * 100 + i);
                        let mut stats = ConnectionStats::new(t.clone());
                        let mut entry = table.touch(&t, start);
                        entry
                            .state
                            .on_segment(&mut stats, Direction::Outgoing, &syn(1), 0);
                    }
                });
            }
        });

        assert_eq!(table.len(), 200);
        assert_eq!(
            table.get(&tuple(149)).map(|e| e.state.tcp_state()),
            Some(TcpState::SynSent)
        );
    }

    #[test]
    fn test_concurrent_updates_on_same_tuple_are_serialized() {
        let table = FlowTable::with_capacity(4);
        let t = tuple(9);
        let start = Instant::now();
        let ack = TcpHeader {
            flags: TcpFlags::from_bits(TCP_FLAG_ACK),
            ..syn(0)
        };

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut stats = ConnectionStats::new(t.clone());
                    for seq in 0..100u32 {
                        let mut entry = table.touch(&t, start);
                        let header = TcpHeader { seq, ..ack };
                        entry
                            .state
                            .on_segment(&mut stats, Direction::Outgoing, &header, 0);
                    }
                });
            }
        });

        let entry = table.get(&t).unwrap();
        assert_eq!(entry.state.max_seq_sent(), Some(99));
        assert_eq!(entry.state.local_start_seq(), Some(0));
    }
}
