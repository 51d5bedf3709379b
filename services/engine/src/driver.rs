//! Round Driver
//!
//! Moves crash rounds through `open -> active -> resolved` on a fixed tick.
//! Each cycle looks at the latest round and does at most one transition, so
//! several drivers against one store only ever race on a compare-and-set.

use shared::RoundId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::DriverConfig;
use crate::domain::{Round, RoundStatus};
use crate::errors::EngineResult;
use crate::settlement::SettlementCoordinator;

/// Rate-limit windows are swept every this many cycles
const SWEEP_EVERY_CYCLES: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAction {
    Idle,
    Opened(RoundId),
    Activated(RoundId),
    Ticked { round_id: RoundId, auto_cashed: usize },
    Resolved(RoundId),
}

pub struct RoundDriver {
    coordinator: Arc<SettlementCoordinator>,
    config: DriverConfig,
    last_stalled: AtomicU64,
}

impl RoundDriver {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: DriverConfig) -> Self {
        Self {
            coordinator,
            config,
            last_stalled: AtomicU64::new(0),
        }
    }

    /// Main driver loop; returns once `shutdown` flips to true or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            betting_window_ms = self.config.betting_window_ms,
            tick_ms = self.config.tick_ms,
            cooldown_ms = self.config.cooldown_ms,
            round_timeout_ms = self.config.round_timeout_ms,
            "Round driver starting"
        );
        let tick = Duration::from_millis(self.config.tick_ms);
        let mut cycles: u64 = 0;

        loop {
            match self.process_cycle().await {
                Ok(DriverAction::Idle) => {}
                Ok(action) => debug!(?action, "Round driver advanced"),
                Err(e) => {
                    metrics::counter!("driver_cycle_failures_total").increment(1);
                    error!(error = %e, code = %e.to_service_error().code, "Round driver cycle failed");
                }
            }

            cycles += 1;
            if cycles % SWEEP_EVERY_CYCLES == 0 {
                let evicted = self.coordinator.sweep_rate_limits();
                if evicted > 0 {
                    debug!(evicted, "Swept idle rate-limit windows");
                }
            }

            tokio::select! {
                _ = sleep(tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Round driver stopping");
                        return;
                    }
                }
            }
        }
    }

    pub async fn process_cycle(&self) -> EngineResult<DriverAction> {
        let Some(round) = self.coordinator.latest_round().await? else {
            let opened = self.coordinator.open_round().await?;
            return Ok(DriverAction::Opened(opened.round_id));
        };
        let now = self.coordinator.clock().now();
        self.report_stall(&round, now);

        match round.status {
            RoundStatus::Open => {
                if (now - round.created_at).num_milliseconds() < self.config.betting_window_ms {
                    return Ok(DriverAction::Idle);
                }
                self.coordinator.activate_round(round.round_id).await?;
                Ok(DriverAction::Activated(round.round_id))
            }
            RoundStatus::Active => {
                let auto_cashed = self.coordinator.settle_auto_cashouts(round.round_id).await?;
                if self.coordinator.crash_machine().has_crashed(&round, now) {
                    self.coordinator.resolve_round(round.round_id).await?;
                    return Ok(DriverAction::Resolved(round.round_id));
                }
                Ok(DriverAction::Ticked {
                    round_id: round.round_id,
                    auto_cashed,
                })
            }
            RoundStatus::Resolved => {
                let since = round.resolved_at.unwrap_or(round.created_at);
                if (now - since).num_milliseconds() < self.config.cooldown_ms {
                    return Ok(DriverAction::Idle);
                }
                let opened = self.coordinator.open_round().await?;
                Ok(DriverAction::Opened(opened.round_id))
            }
        }
    }

    /// Log a stuck round once per round; the gauge stays up until it moves
    fn report_stall(&self, round: &Round, now: chrono::DateTime<chrono::Utc>) {
        match self
            .coordinator
            .check_round_deadline(round, self.config.round_timeout_ms, now)
        {
            Ok(()) => metrics::gauge!("round_stalled").set(0.0),
            Err(stalled) => {
                metrics::gauge!("round_stalled").set(1.0);
                let id = round.round_id.get();
                if self.last_stalled.swap(id, Ordering::SeqCst) != id {
                    metrics::counter!("rounds_stalled_total").increment(1);
                    error!(
                        round_id = %round.round_id,
                        code = %stalled.to_service_error().code,
                        error = %stalled,
                        "Round stalled; operator action required"
                    );
                }
            }
        }
    }
}
