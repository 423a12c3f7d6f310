//! Inactivity reaper background task.
//!
//! Periodically sweeps the registry and force-closes sessions that have
//! been idle past the configured threshold. This is the only mechanism
//! bounding memory growth from abandoned sessions (clients that vanish
//! without a clean disconnect, e.g. network loss without TCP teardown).
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the
//! token is cancelled, the task completes its current iteration and exits
//! cleanly.

use crate::actors::SessionRegistryHandle;

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Default sweep interval in seconds.
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default idle threshold in seconds (10 minutes).
const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 600;

/// Configuration for the inactivity reaper task.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Sweep interval in seconds.
    pub sweep_interval_seconds: u64,
    /// Seconds of inactivity before a session is force-closed.
    pub idle_timeout_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
        }
    }
}

impl ReaperConfig {
    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `CC_REAPER_INTERVAL_SECONDS` - Sweep interval (default: 60)
    /// - `CC_IDLE_TIMEOUT_SECONDS` - Idle threshold (default: 600)
    #[must_use]
    pub fn from_env() -> Self {
        let sweep_interval_seconds = std::env::var("CC_REAPER_INTERVAL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS);

        let idle_timeout_seconds = std::env::var("CC_IDLE_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS);

        Self {
            sweep_interval_seconds,
            idle_timeout_seconds,
        }
    }
}

/// Start the inactivity reaper background task.
///
/// Runs in a loop, sweeping at the configured interval, and exits
/// gracefully when the cancellation token is triggered. Sessions reaped
/// by a sweep are closed exactly as an explicit finalize with reason
/// `"timeout"`, including notification of any connections still in the
/// room.
#[instrument(skip_all, name = "cc.task.reaper")]
pub async fn start_session_reaper(
    registry: SessionRegistryHandle,
    config: ReaperConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "cc.task.reaper",
        sweep_interval_seconds = config.sweep_interval_seconds,
        idle_timeout_seconds = config.idle_timeout_seconds,
        "Starting session reaper task"
    );

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.sweep_interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a fresh start never
    // sweeps before a full interval has elapsed.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_sweep(&registry, &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "cc.task.reaper",
                    "Session reaper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "cc.task.reaper", "Session reaper stopped");
}

/// Run a single sweep iteration.
///
/// This is separated from the main loop to allow direct testing.
pub(crate) async fn run_sweep(registry: &SessionRegistryHandle, config: &ReaperConfig) {
    match registry
        .sweep_idle(Duration::from_secs(config.idle_timeout_seconds))
        .await
    {
        Ok(reaped) => {
            if reaped > 0 {
                info!(
                    target: "cc.task.reaper",
                    reaped,
                    idle_timeout_seconds = config.idle_timeout_seconds,
                    "Reaped idle sessions"
                );
            }
        }
        Err(e) => {
            error!(
                target: "cc.task.reaper",
                error = %e,
                "Idle sweep failed"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::observability::metrics::GatewayMetrics;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't run in parallel
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn test_registry() -> SessionRegistryHandle {
        SessionRegistryHandle::new("cc-test-reaper".to_string(), GatewayMetrics::new())
    }

    #[test]
    fn test_default_config() {
        let config = ReaperConfig::default();
        assert_eq!(config.sweep_interval_seconds, DEFAULT_SWEEP_INTERVAL_SECONDS);
        assert_eq!(config.idle_timeout_seconds, DEFAULT_IDLE_TIMEOUT_SECONDS);
    }

    #[test]
    fn test_from_env_with_valid_values() {
        let _guard = ENV_MUTEX.lock().unwrap();

        std::env::set_var("CC_REAPER_INTERVAL_SECONDS", "30");
        std::env::set_var("CC_IDLE_TIMEOUT_SECONDS", "120");

        let config = ReaperConfig::from_env();

        std::env::remove_var("CC_REAPER_INTERVAL_SECONDS");
        std::env::remove_var("CC_IDLE_TIMEOUT_SECONDS");

        assert_eq!(config.sweep_interval_seconds, 30);
        assert_eq!(config.idle_timeout_seconds, 120);
    }

    #[test]
    fn test_from_env_with_invalid_values_uses_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();

        std::env::set_var("CC_REAPER_INTERVAL_SECONDS", "not-a-number");
        std::env::set_var("CC_IDLE_TIMEOUT_SECONDS", "");

        let config = ReaperConfig::from_env();

        std::env::remove_var("CC_REAPER_INTERVAL_SECONDS");
        std::env::remove_var("CC_IDLE_TIMEOUT_SECONDS");

        assert_eq!(config.sweep_interval_seconds, DEFAULT_SWEEP_INTERVAL_SECONDS);
        assert_eq!(config.idle_timeout_seconds, DEFAULT_IDLE_TIMEOUT_SECONDS);
    }

    #[tokio::test]
    async fn test_reaper_starts_and_stops_gracefully() {
        let registry = test_registry();
        let cancel_token = CancellationToken::new();
        let cancel_clone = cancel_token.clone();

        let config = ReaperConfig {
            sweep_interval_seconds: 1,
            idle_timeout_seconds: 600,
        };

        let handle = tokio::spawn(start_session_reaper(
            registry.clone(),
            config,
            cancel_token,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_clone.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(
            result.is_ok(),
            "Reaper should stop within 2 seconds after cancellation"
        );
        result.unwrap().expect("Task should not panic");

        registry.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_idle_sessions() {
        use crate::auth::{ClientRole, VerifiedIdentity};
        use crate::session::SessionContext;
        use common::types::{ConnectionId, ParticipantId};
        use tokio::sync::mpsc;

        let registry = test_registry();

        let c1 = ConnectionId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry
            .connect(
                c1,
                VerifiedIdentity {
                    participant: ParticipantId::from("employee-1"),
                    role: ClientRole::Field,
                },
                tx,
            )
            .await
            .unwrap();

        let _session = registry
            .open_session(
                c1,
                SessionContext {
                    category: "audio".to_string(),
                    location: None,
                    note: None,
                },
            )
            .await
            .unwrap();

        let config = ReaperConfig {
            sweep_interval_seconds: 60,
            idle_timeout_seconds: 600,
        };

        // Not yet idle: sweep keeps the session
        run_sweep(&registry, &config).await;
        assert_eq!(registry.get_stats().await.unwrap().active_sessions, 1);

        // Past the threshold: sweep removes it
        tokio::time::advance(Duration::from_secs(601)).await;
        run_sweep(&registry, &config).await;
        assert_eq!(registry.get_stats().await.unwrap().active_sessions, 0);

        registry.cancel();
    }
}
