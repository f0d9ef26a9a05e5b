//! Process-wide Prometheus registry.
//!
//! Counters are registered exactly once per process regardless of config
//! reloads. Incrementing is a no-op unless `BARTHO_METRICS=1`.

use std::sync::OnceLock;

use prometheus::{IntCounter, Registry};
use tracing::debug;

/// The engine's metric set, registered against one shared registry.
pub struct KernelMetrics {
    registry: Registry,
    enabled: bool,
    pub memories_stored: IntCounter,
    pub memories_blocked: IntCounter,
    pub embeddings_generated: IntCounter,
    pub retrievals: IntCounter,
}

impl KernelMetrics {
    fn new() -> Self {
        let registry = Registry::new();
        let enabled = std::env::var("BARTHO_METRICS").map(|v| v == "1").unwrap_or(false);

        let memories_stored =
            IntCounter::new("bartholomew_memories_stored_total", "Memories stored").unwrap();
        let memories_blocked = IntCounter::new(
            "bartholomew_memories_blocked_total",
            "Memories blocked by governance rules",
        )
        .unwrap();
        let embeddings_generated = IntCounter::new(
            "bartholomew_embeddings_total",
            "Total number of embeddings generated",
        )
        .unwrap();
        let retrievals =
            IntCounter::new("bartholomew_retrievals_total", "Retrieval queries served").unwrap();

        if enabled {
            for c in [
                &memories_stored,
                &memories_blocked,
                &embeddings_generated,
                &retrievals,
            ] {
                // A duplicate registration would mean two metric sets in
                // one process; OnceLock construction rules that out.
                let _ = registry.register(Box::new(c.clone()));
            }
            debug!("metrics registry initialized");
        }

        Self {
            registry,
            enabled,
            memories_stored,
            memories_blocked,
            embeddings_generated,
            retrievals,
        }
    }

    /// The shared registry, for exposition by a host process.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Increment a counter, respecting the metrics gate.
    pub fn inc(&self, counter: &IntCounter) {
        if self.enabled {
            counter.inc();
        }
    }
}

static METRICS: OnceLock<KernelMetrics> = OnceLock::new();

/// The process-wide metric set.
pub fn metrics() -> &'static KernelMetrics {
    METRICS.get_or_init(KernelMetrics::new)
}
