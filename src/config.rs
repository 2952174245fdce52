use serde::{Deserialize, Serialize};

use crate::scheduler::ScheduleSlot;

/// Which strategy arms the ground/GPS poll cycle. A static configuration
/// choice; the gateway never switches modes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroundTriggerMode {
    /// Fixed elapsed interval (`ground_interval_ms`).
    Interval,
    /// Exact wall-clock HH:MM match against `ground_schedule`.
    WallClock,
}

/// Gateway-side timing and retry parameters. `Default` is the field
/// deployment profile; `accelerated()` mirrors the short-interval debug
/// build used on the bench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Broadcast ANNOUNCE period.
    pub announce_interval_ms: u64,
    /// Atmospheric poll period.
    pub atmospheric_interval_ms: u64,
    /// Ground poll period when `ground_trigger_mode` is `Interval`.
    pub ground_interval_ms: u64,
    /// Per-attempt reply wait for both poll kinds.
    pub response_timeout_ms: u64,
    /// Extra attempts after the first; total attempts per node and cycle
    /// is `connection_retries + 1`.
    pub connection_retries: u8,
    /// Pause between atmospheric attempts to the same node.
    pub atmospheric_retry_delay_ms: u64,
    /// Pause between ground attempts to the same node.
    pub ground_retry_delay_ms: u64,
    /// Pause between consecutive nodes within one cycle.
    pub inter_node_delay_ms: u64,
    pub ground_trigger_mode: GroundTriggerMode,
    /// Target instants for `WallClock` mode.
    pub ground_schedule: Vec<ScheduleSlot>,
    /// Telemetry sink topics.
    pub atmospheric_topic: String,
    pub ground_topic: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            announce_interval_ms: 120_000,
            atmospheric_interval_ms: 90_000,
            ground_interval_ms: 100_000,
            response_timeout_ms: 2_000,
            connection_retries: 2,
            atmospheric_retry_delay_ms: 2_000,
            ground_retry_delay_ms: 10_000,
            inter_node_delay_ms: 200,
            ground_trigger_mode: GroundTriggerMode::Interval,
            ground_schedule: vec![ScheduleSlot::new(12, 0), ScheduleSlot::new(0, 0)],
            atmospheric_topic: "sensor/atmospheric".to_owned(),
            ground_topic: "sensor/ground".to_owned(),
        }
    }
}

impl GatewayConfig {
    /// Bench profile: everything short enough to watch a full
    /// announce/register/poll round in under a minute.
    pub fn accelerated() -> Self {
        Self {
            announce_interval_ms: 5_000,
            atmospheric_interval_ms: 30_000,
            ground_interval_ms: 60_000,
            response_timeout_ms: 2_000,
            connection_retries: 2,
            atmospheric_retry_delay_ms: 2_000,
            ground_retry_delay_ms: 2_000,
            inter_node_delay_ms: 200,
            ..Self::default()
        }
    }

    pub fn total_attempts(&self) -> u8 {
        self.connection_retries.saturating_add(1)
    }
}

/// Node-side timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// HELLO keepalive period while registered.
    pub hello_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hello_interval_ms: 60_000,
        }
    }
}

impl NodeConfig {
    pub fn accelerated() -> Self {
        Self {
            hello_interval_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_matches_field_deployment() {
        let config = GatewayConfig::default();
        assert_eq!(config.announce_interval_ms, 120_000);
        assert_eq!(config.connection_retries, 2);
        assert_eq!(config.total_attempts(), 3);
        assert_eq!(config.ground_trigger_mode, GroundTriggerMode::Interval);
    }

    #[test]
    fn accelerated_profile_shrinks_intervals_only() {
        let config = GatewayConfig::accelerated();
        assert!(config.announce_interval_ms < GatewayConfig::default().announce_interval_ms);
        assert_eq!(config.response_timeout_ms, 2_000);
        assert_eq!(config.atmospheric_topic, "sensor/atmospheric");
    }

    #[test]
    fn config_serializes_for_diagnostics() {
        let json = serde_json::to_string(&GatewayConfig::default()).unwrap();
        assert!(json.contains("\"announce_interval_ms\":120000"));
        let parsed: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.ground_schedule.len(), 2);
    }
}
