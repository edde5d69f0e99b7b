use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::conf::conf_serde::duration;

/// Idle timeouts used when aging tracked TCP flows out of the flow table.
///
/// A flow is evicted once it has seen no segment for longer than the timeout
/// that matches its current TCP state:
///
/// expiry_interval: 10s - How often the caller is expected to sweep the table.
/// tcp: 2m - Idle timeout for established flows.
/// tcp_handshake: 30s - Idle timeout while the handshake is still in progress.
/// tcp_fin: 10s - Idle timeout once either side has sent a FIN.
/// tcp_closed: 5s - Idle timeout after a RST or the final ACK.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlowConf {
    /// The interval between sweeps for idle flows.
    /// - Default Value: `10s`
    #[serde(default = "defaults::expiry_interval", with = "duration")]
    pub expiry_interval: Duration,

    /// The idle timeout for established TCP flows.
    /// - Default Value: `2m`
    /// - Example: An established flow with no segments for 2 minutes is evicted.
    #[serde(default = "defaults::tcp", with = "duration")]
    pub tcp: Duration,

    /// The idle timeout for flows in SYN-SENT or SYN-RECEIVED.
    /// - Default Value: `30s`
    /// - Example: A SYN that never gets an answer stops being tracked after 30 seconds.
    #[serde(default = "defaults::tcp_handshake", with = "duration")]
    pub tcp_handshake: Duration,

    /// The idle timeout applied once a FIN has been observed in either direction.
    /// - Default Value: `10s`
    #[serde(default = "defaults::tcp_fin", with = "duration")]
    pub tcp_fin: Duration,

    /// The idle timeout for flows that are closed, after a RST or a completed teardown.
    /// - Default Value: `5s`
    #[serde(default = "defaults::tcp_closed", with = "duration")]
    pub tcp_closed: Duration,
}

impl Default for FlowConf {
    fn default() -> FlowConf {
        FlowConf {
            expiry_interval: defaults::expiry_interval(),
            tcp: defaults::tcp(),
            tcp_handshake: defaults::tcp_handshake(),
            tcp_fin: defaults::tcp_fin(),
            tcp_closed: defaults::tcp_closed(),
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub fn expiry_interval() -> Duration {
        Duration::from_secs(10)
    }
    pub fn tcp() -> Duration {
        Duration::from_secs(120)
    }
    pub fn tcp_handshake() -> Duration {
        Duration::from_secs(30) // roughly the kernel's SYN retry budget
    }
    pub fn tcp_fin() -> Duration {
        Duration::from_secs(10)
    }
    pub fn tcp_closed() -> Duration {
        Duration::from_secs(5)
    }
}
