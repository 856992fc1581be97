//! Session configuration: identity and tuning knobs.

use serde::{Deserialize, Serialize};

use crate::transport::{ActorIdentity, ConversationId};

/// Default backoff base delay in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
/// Default backoff delay cap in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0, applied symmetrically).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;
/// Default capacity of the pre-ready inbound event buffer.
pub const DEFAULT_PENDING_BUFFER_CAP: usize = 64;
/// Default number of out-of-order events held for reordering.
pub const DEFAULT_REORDER_WINDOW: usize = 8;
/// Default straggler flush interval for the reorder window, in milliseconds.
pub const DEFAULT_REORDER_FLUSH_MS: u64 = 250;

/// Identity of one session. Constructed once per (conversation, UI mount)
/// pair; nothing in here changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub conversation_id: ConversationId,
    pub service_endpoint: String,
    pub actor: ActorIdentity,
}

impl SessionConfig {
    pub fn new(
        conversation_id: ConversationId,
        service_endpoint: impl Into<String>,
        actor: ActorIdentity,
    ) -> Self {
        Self {
            conversation_id,
            service_endpoint: service_endpoint.into(),
            actor,
        }
    }
}

/// Tuning knobs for reconnect backoff and event buffering. The backoff
/// curve and reorder window are configuration, not hardcoded constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTuning {
    /// Base reconnect delay in ms; doubles per consecutive failure.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Reconnect delay cap in ms.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Jitter factor 0.0–1.0; spreads reconnects to avoid thundering herds.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Inbound events buffered while not ready; overflow forces a full
    /// resync on the next connect.
    #[serde(default = "default_pending_buffer_cap")]
    pub pending_buffer_cap: usize,
    /// Out-of-order events held before flushing in sequence order.
    #[serde(default = "default_reorder_window")]
    pub reorder_window: usize,
    /// How long a sequence gap may stall held events before they flush
    /// anyway, in ms.
    #[serde(default = "default_reorder_flush_ms")]
    pub reorder_flush_ms: u64,
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}
fn default_backoff_max_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}
fn default_pending_buffer_cap() -> usize {
    DEFAULT_PENDING_BUFFER_CAP
}
fn default_reorder_window() -> usize {
    DEFAULT_REORDER_WINDOW
}
fn default_reorder_flush_ms() -> u64 {
    DEFAULT_REORDER_FLUSH_MS
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            pending_buffer_cap: DEFAULT_PENDING_BUFFER_CAP,
            reorder_window: DEFAULT_REORDER_WINDOW,
            reorder_flush_ms: DEFAULT_REORDER_FLUSH_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults_are_documented_values() {
        let tuning = SessionTuning::default();
        assert_eq!(tuning.backoff_base_ms, 500);
        assert_eq!(tuning.backoff_max_ms, 30_000);
        assert!((tuning.jitter_factor - 0.2).abs() < f64::EPSILON);
        assert_eq!(tuning.pending_buffer_cap, 64);
        assert_eq!(tuning.reorder_window, 8);
        assert_eq!(tuning.reorder_flush_ms, 250);
    }

    #[test]
    fn tuning_deserializes_with_defaults() {
        let tuning: SessionTuning = serde_json::from_str("{}").unwrap();
        assert_eq!(tuning.backoff_base_ms, DEFAULT_BACKOFF_BASE_MS);

        let tuning: SessionTuning = serde_json::from_str(r#"{"backoff_base_ms": 100}"#).unwrap();
        assert_eq!(tuning.backoff_base_ms, 100);
        assert_eq!(tuning.backoff_max_ms, DEFAULT_BACKOFF_MAX_MS);
    }

    #[test]
    fn session_config_holds_identity() {
        let config = SessionConfig::new(
            ConversationId::new("c1"),
            "https://chat.example.com",
            ActorIdentity::new("did:example:alice"),
        );
        assert_eq!(config.conversation_id.as_str(), "c1");
        assert_eq!(config.actor.actor_id, "did:example:alice");
    }
}
