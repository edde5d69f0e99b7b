//! Replays a recorded segment trace through a [`TcpProcessor`].
//!
//! A trace is a YAML document listing TCP segments in capture order:
//!
//! ```yaml
//! segments:
//!   - local: 10.0.0.1:40000
//!     remote: 10.0.0.2:443
//!     direction: outgoing
//!     flags: [syn]
//!     seq: 100
//!   - local: 10.0.0.1:40000
//!     remote: 10.0.0.2:443
//!     direction: incoming
//!     flags: [syn, ack]
//!     seq: 500
//!     ack: 101
//!     at: 2ms
//! ```
//!
//! `ack`, `len`, `pid`, `netns` default to zero; `at` is the capture time
//! relative to the start of the trace and defaults to zero as well.

use std::{
    collections::HashMap,
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    conn::{ConnectionStats, ConnectionTuple, Direction},
    packet::TcpHeader,
    runtime::conf::conf_serde::duration,
    tcp::{TcpFlag, TcpFlags, TcpProcessor, TcpState},
};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read trace '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid trace: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Trace {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Segment {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub netns: u32,
    pub direction: Direction,
    pub flags: Vec<TcpFlag>,
    pub seq: u32,
    #[serde(default)]
    pub ack: u32,
    /// TCP payload length in bytes.
    #[serde(default)]
    pub len: u16,
    #[serde(default, with = "duration")]
    pub at: Duration,
}

impl Segment {
    pub fn tuple(&self) -> ConnectionTuple {
        ConnectionTuple::new(self.local, self.remote)
            .with_pid(self.pid)
            .with_netns(self.netns)
    }

    /// The TCP header as it appeared on the wire.
    pub fn header(&self) -> TcpHeader {
        let (src, dst) = match self.direction {
            Direction::Outgoing => (self.local, self.remote),
            Direction::Incoming => (self.remote, self.local),
        };
        TcpHeader {
            src_port: src.port(),
            dst_port: dst.port(),
            seq: self.seq,
            ack: self.ack,
            data_offset: 5,
            flags: self.flags.iter().copied().collect::<TcpFlags>(),
            window: 0,
        }
    }
}

impl Trace {
    pub fn from_yaml(yaml: &str) -> Result<Self, ReplayError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let yaml = fs::read_to_string(path).map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }
}

/// Final view of one connection after a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    #[serde(flatten)]
    pub stats: ConnectionStats,
    pub tcp_state: TcpState,
}

#[derive(Debug)]
pub struct Replay {
    /// One report per connection, in order of first appearance.
    pub connections: Vec<ConnectionReport>,
    /// Capture time of the last segment.
    pub end: Instant,
}

/// Feeds every segment of `trace` to `processor`, treating `start` as the
/// capture time of the beginning of the trace.
pub fn replay(processor: &TcpProcessor, trace: &Trace, start: Instant) -> Replay {
    let mut index: HashMap<ConnectionTuple, usize> = HashMap::new();
    let mut stats: Vec<ConnectionStats> = Vec::new();
    let mut end = start;

    for segment in &trace.segments {
        let tuple = segment.tuple();
        let slot = *index.entry(tuple).or_insert_with_key(|tuple| {
            stats.push(ConnectionStats::new(tuple.clone()));
            stats.len() - 1
        });

        let now = start + segment.at;
        end = end.max(now);
        processor.process_segment_at(
            &mut stats[slot],
            segment.direction,
            &segment.header(),
            segment.len,
            now,
        );
    }

    let connections: Vec<ConnectionReport> = stats
        .into_iter()
        .map(|stats| {
            let tcp_state = processor
                .state(&stats.tuple)
                .map(|state| state.tcp_state())
                .unwrap_or_default();
            ConnectionReport { stats, tcp_state }
        })
        .collect();

    debug!(
        event.name = "replay.completed",
        replay.segments = trace.segments.len(),
        replay.connections = connections.len(),
        "trace replayed"
    );

    Replay { connections, end }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::FailureKind;

    const HANDSHAKE: &str = r#"
segments:
  - { local: "10.0.0.1:40000", remote: "10.0.0.2:443", direction: outgoing, flags: [syn], seq: 100 }
  - { local: "10.0.0.1:40000", remote: "10.0.0.2:443", direction: incoming, flags: [syn, ack], seq: 500, ack: 101, at: 1ms }
  - { local: "10.0.0.1:40000", remote: "10.0.0.2:443", direction: outgoing, flags: [ack], seq: 101, ack: 501, at: 2ms }
  - { local: "10.0.0.1:40001", remote: "10.0.0.3:80", direction: outgoing, flags: [syn], seq: 7, at: 3ms }
  - { local: "10.0.0.1:40001", remote: "10.0.0.3:80", direction: incoming, flags: [rst, ack], seq: 0, ack: 8, at: 4ms }
"#;

    #[test]
    fn test_parse_defaults() {
        let trace = Trace::from_yaml(HANDSHAKE).unwrap();
        assert_eq!(trace.segments.len(), 5);

        let first = &trace.segments[0];
        assert_eq!(first.ack, 0);
        assert_eq!(first.len, 0);
        assert_eq!(first.at, Duration::ZERO);
        assert_eq!(trace.segments[1].at, Duration::from_millis(1));
    }

    #[test]
    fn test_header_ports_follow_direction() {
        let trace = Trace::from_yaml(HANDSHAKE).unwrap();

        let out = trace.segments[0].header();
        assert_eq!((out.src_port, out.dst_port), (40000, 443));
        assert!(out.flags.syn() && !out.flags.ack());

        let inbound = trace.segments[1].header();
        assert_eq!((inbound.src_port, inbound.dst_port), (443, 40000));
        assert!(inbound.flags.syn() && inbound.flags.ack());
    }

    #[test]
    fn test_replay_reports_each_connection_in_order() {
        let trace = Trace::from_yaml(HANDSHAKE).unwrap();
        let processor = TcpProcessor::new();
        let start = Instant::now();

        let replay = replay(&processor, &trace, start);
        assert_eq!(replay.end, start + Duration::from_millis(4));
        assert_eq!(replay.connections.len(), 2);

        let ok = &replay.connections[0];
        assert_eq!(ok.stats.tuple.sport, 40000);
        assert_eq!(ok.tcp_state, TcpState::Established);
        assert_eq!(ok.stats.monotonic.tcp_established, 1);

        let refused = &replay.connections[1];
        assert_eq!(refused.tcp_state, TcpState::Closed);
        assert_eq!(refused.stats.failures(FailureKind::ConnectionRefused), 1);
    }

    #[test]
    fn test_report_serializes_flat() {
        let trace = Trace::from_yaml(HANDSHAKE).unwrap();
        let replay = replay(&TcpProcessor::new(), &trace, Instant::now());

        let json = serde_json::to_value(&replay.connections[1]).unwrap();
        assert_eq!(json["tcp_state"], "closed");
        assert_eq!(json["tuple"]["dport"], 80);
        assert_eq!(json["tcp_failures"]["connection-refused"], 1);
        assert_eq!(json["monotonic"]["tcp_closed"], 1);
    }

    #[test]
    fn test_rejects_unknown_flag() {
        let yaml = r#"
segments:
  - { local: "10.0.0.1:1", remote: "10.0.0.2:2", direction: outgoing, flags: [bogus], seq: 1 }
"#;
        assert!(matches!(Trace::from_yaml(yaml), Err(ReplayError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Trace::load(Path::new("/nonexistent/trace.yaml")).unwrap_err();
        assert!(matches!(err, ReplayError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/trace.yaml"));
    }
}
