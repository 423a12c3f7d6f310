//! Observability: health probes, stats snapshot and metrics.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, ObservabilityState};
pub use metrics::GatewayMetrics;
