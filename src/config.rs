//! Process-surface configuration.
//!
//! `main.rs` is the only module that knows about `clap`; everything else
//! just receives a plain `ServerConfig` value, mirroring how CLI parsing is
//! framed as an external collaborator the core merely consumes from.

use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

/// Upper bound on a chat history's capacity: `L` is a single length byte.
pub const MAX_HISTORY_CAPACITY: usize = 255;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub ping_interval: Duration,
    pub max_frame_size: usize,
    pub idle_check_period: Duration,
    pub idle_threshold: Duration,
    pub history_capacity: usize,
    pub outbound_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            ping_interval: Duration::from_secs(40),
            max_frame_size: 64 * 1024,
            idle_check_period: Duration::from_secs(3),
            idle_threshold: Duration::from_secs(5),
            history_capacity: MAX_HISTORY_CAPACITY,
            outbound_queue_depth: 64,
        }
    }
}
