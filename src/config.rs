//! Tuning knobs for the broker and the client session.
//!
//! Defaults mirror the protocol constants every deployment uses; tests dial
//! the intervals down.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bind host. The broker is loopback-only by design.
    pub host: String,
    /// Bind port; 0 asks the kernel for an ephemeral port.
    pub port: u16,
    /// Reaper sweep interval.
    pub reaper_interval: Duration,
    /// An agent silent for longer than this is forcibly disconnected.
    pub heartbeat_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            reaper_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often the client emits `heartbeat`.
    pub heartbeat_interval: Duration,
    /// How long to wait for the `registered` reply when connecting.
    pub register_timeout: Duration,
    /// Correlated DM round-trips.
    pub dm_timeout: Duration,
    /// Channel create/join/leave/send acknowledgements.
    pub channel_timeout: Duration,
    /// Reserve/release acknowledgements.
    pub reservation_timeout: Duration,
    /// `list_agents` / `list_channels` replies.
    pub list_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            register_timeout: Duration::from_secs(10),
            dm_timeout: Duration::from_secs(120),
            channel_timeout: Duration::from_secs(3),
            reservation_timeout: Duration::from_secs(4),
            list_timeout: Duration::from_secs(2),
        }
    }
}
