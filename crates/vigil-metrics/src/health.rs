//! Health derivation from the current metric window.

use chrono::{DateTime, Utc};
use tracing::warn;

use vigil_types::{HealthCheck, HealthStatus};

use crate::aggregator::Aggregator;

impl Aggregator {
    /// Derive overall health from the configured critical-metric checks.
    ///
    /// Unhealthy if any check's current-window value breaches its hard
    /// threshold; degraded if only a soft threshold is breached, or when
    /// `evaluation_degraded` reports isolated rule failures from the last
    /// evaluation pass; healthy otherwise.
    pub fn health_status(
        &self,
        checks: &[HealthCheck],
        now: DateTime<Utc>,
        evaluation_degraded: bool,
    ) -> HealthStatus {
        let mut status = if evaluation_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        for check in checks {
            let value = match self.current_window_value(&check.metric, now) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    // A broken check must not hide the others.
                    warn!("health check {:?} failed: {e}", check.metric);
                    status = HealthStatus::Degraded;
                    continue;
                }
            };
            if value > check.hard {
                return HealthStatus::Unhealthy;
            }
            if value > check.soft {
                status = HealthStatus::Degraded;
            }
        }
        status
    }
}
