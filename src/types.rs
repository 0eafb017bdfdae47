use serde::{Deserialize, Serialize};

/// Running counters kept by the dispatcher and published by the engine.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub packets_seen: u64,
    /// Non-TCP packets and frames that failed to parse
    pub packets_ignored: u64,
    pub active_flows: u64,
    pub flows_created: u64,
    pub flows_closed: u64,
    pub flows_idle_evicted: u64,
    pub flows_classified: u64,
    pub attacks_recorded: u64,
    pub blocks_requested: u64,
    pub blocks_installed: u64,
    pub blocks_failed: u64,
    pub blocks_expired: u64,
    pub uptime_seconds: u64,
}
