use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::auth::OperationKind;
use crate::domain::SyncDirection;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Operation {
    Push,
    Pull,
}

impl From<OperationKind> for Operation {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Push => Operation::Push,
            OperationKind::Pull => Operation::Pull,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Decision {
    Allowed,
    Denied,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GatewayLabels {
    pub operation: Operation,
    pub decision: Decision,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    Push,
    Pull,
    Both,
}

impl From<SyncDirection> for Direction {
    fn from(direction: SyncDirection) -> Self {
        match direction {
            SyncDirection::Push => Direction::Push,
            SyncDirection::Pull => Direction::Pull,
            SyncDirection::Both => Direction::Both,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Success,
    Partial,
    Failure,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SyncLabels {
    pub direction: Direction,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DirectionLabels {
    pub direction: Direction,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the gateway.
pub struct Metrics {
    pub gateway_decisions_total: Family<GatewayLabels, Counter>,
    pub sync_attempts_total: Family<SyncLabels, Counter>,
    pub sync_duration_seconds: Family<DirectionLabels, Histogram>,
    pub git_timeouts_total: Counter,
    pub notifications_failed_total: Counter,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let gateway_decisions_total = Family::<GatewayLabels, Counter>::default();
        registry.register(
            "forgegate_gateway_decisions",
            "Smart-HTTP access decisions by operation and decision",
            gateway_decisions_total.clone(),
        );

        let sync_attempts_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "forgegate_sync_attempts",
            "GitHub sync attempts by direction and outcome",
            sync_attempts_total.clone(),
        );

        let sync_duration_seconds =
            Family::<DirectionLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.05, 2.0, 12))
            });
        registry.register(
            "forgegate_sync_duration_seconds",
            "GitHub sync latency in seconds",
            sync_duration_seconds.clone(),
        );

        let git_timeouts_total = Counter::default();
        registry.register(
            "forgegate_git_timeouts",
            "Git subprocesses killed after exceeding their bound",
            git_timeouts_total.clone(),
        );

        let notifications_failed_total = Counter::default();
        registry.register(
            "forgegate_workspace_notifications_failed",
            "Workspace refresh notifications that failed",
            notifications_failed_total.clone(),
        );

        Self {
            gateway_decisions_total,
            sync_attempts_total,
            sync_duration_seconds,
            git_timeouts_total,
            notifications_failed_total,
        }
    }

    pub fn record_decision(&self, operation: OperationKind, decision: Decision) {
        self.gateway_decisions_total
            .get_or_create(&GatewayLabels {
                operation: operation.into(),
                decision,
            })
            .inc();
    }

    pub fn record_sync(&self, direction: SyncDirection, outcome: Outcome, seconds: f64) {
        self.sync_attempts_total
            .get_or_create(&SyncLabels {
                direction: direction.into(),
                outcome,
            })
            .inc();
        self.sync_duration_seconds
            .get_or_create(&DirectionLabels {
                direction: direction.into(),
            })
            .observe(seconds);
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Text exposition for `GET /metrics`.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_and_syncs_are_exported() {
        let metrics = MetricsRegistry::new();
        metrics
            .metrics
            .record_decision(OperationKind::Push, Decision::Denied);
        metrics
            .metrics
            .record_sync(SyncDirection::Both, Outcome::Partial, 0.3);
        metrics.metrics.git_timeouts_total.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains(
            r#"forgegate_gateway_decisions_total{operation="Push",decision="Denied"} 1"#
        ));
        assert!(text.contains(
            r#"forgegate_sync_attempts_total{direction="Both",outcome="Partial"} 1"#
        ));
        assert!(text.contains("forgegate_git_timeouts_total 1"));
    }
}
