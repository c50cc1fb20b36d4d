//! The alert rule engine: a state machine per (rule id, dedup key).
//!
//! Each evaluation pass reads one rule-set snapshot and one consistent view
//! of the metric windows, then applies transitions one alert at a time --
//! a pass cancelled mid-way leaves every already-applied transition whole
//! and no partial ones.
//!
//! At most one alert is ever active per dedup key. When two rules breach
//! for the same key in one pass, only the highest-severity rule opens; a
//! rule breaching while another alert already holds the key is likewise
//! suppressed and logged.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_metrics::Aggregator;
use vigil_types::{AlertRule, AlertStatus, Cadence, RuleHandle, VigilError};

use crate::alert::{ActiveFilter, Alert, AlertTransition};
use crate::history::AlertHistory;

/// What prompted an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalTrigger {
    /// A bucket-close signal from the aggregator.
    Signal,
    /// The dispatcher's periodic tick.
    Tick,
}

/// The alert rule engine.
///
/// Not internally synchronized; callers serialize access (the dispatcher
/// owns it behind a mutex). Rule-set snapshots come from the shared
/// [`RuleHandle`] so a hot reload lands between passes, never inside one.
pub struct AlertEngine {
    rules: std::sync::Arc<RuleHandle>,
    /// Active (and acknowledged) alerts keyed by (rule id, dedup key).
    active: HashMap<(String, String), Alert>,
    /// Last breach time per key, for cooldown self-expiry.
    last_fire: HashMap<(String, String), DateTime<Utc>>,
    /// Next due time per periodic rule id.
    next_due: HashMap<String, DateTime<Utc>>,
    history: Option<AlertHistory>,
    /// Isolated per-rule failures from the most recent pass.
    pass_errors: Vec<String>,
}

/// A rule breach observed during a pass, before tie-breaking.
struct Breach<'a> {
    rule: &'a AlertRule,
    context: serde_json::Value,
}

impl AlertEngine {
    pub fn new(rules: std::sync::Arc<RuleHandle>) -> Self {
        AlertEngine {
            rules,
            active: HashMap::new(),
            last_fire: HashMap::new(),
            next_due: HashMap::new(),
            history: None,
            pass_errors: Vec::new(),
        }
    }

    /// Record every transition and suppression in the given history log.
    pub fn with_history(mut self, history: AlertHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Whether the most recent pass hit isolated rule failures. Feeds the
    /// degraded-health signal.
    pub fn degraded(&self) -> bool {
        !self.pass_errors.is_empty()
    }

    /// Errors collected from the most recent pass.
    pub fn pass_errors(&self) -> &[String] {
        &self.pass_errors
    }

    /// Run one evaluation pass and return the applied transitions.
    ///
    /// Signal-cadence rules run on every pass (the idle tick lets their
    /// conditions clear when traffic stops); periodic rules run when due.
    /// A failing rule is skipped and reported via [`AlertEngine::degraded`]
    /// without blocking the other rules.
    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        trigger: EvalTrigger,
        metrics: &Aggregator,
    ) -> Vec<AlertTransition> {
        let snapshot = self.rules.current();
        self.pass_errors.clear();

        let mut breaches: Vec<Breach<'_>> = Vec::new();
        let mut evaluated: Vec<&str> = Vec::new();
        let mut cleared: Vec<&str> = Vec::new();

        for rule in &snapshot.rules {
            if !self.rule_due(rule, now, trigger) {
                continue;
            }
            evaluated.push(&rule.id);

            match self.read_rule(rule, now, metrics) {
                Ok(Some(context)) => breaches.push(Breach { rule, context }),
                Ok(None) => cleared.push(&rule.id),
                Err(e) => {
                    warn!("rule {:?} evaluation failed: {e}", rule.id);
                    self.pass_errors.push(format!("{}: {e}", rule.id));
                }
            }
        }

        let mut transitions = Vec::new();

        // Refresh existing alerts and collect open candidates.
        let mut candidates: Vec<Breach<'_>> = Vec::new();
        for breach in breaches {
            let key = (breach.rule.id.clone(), breach.rule.dedup_key().to_string());
            if let Some(alert) = self.active.get_mut(&key) {
                alert.last_seen_at = now;
                alert.context = breach.context;
                self.last_fire.insert(key, now);
            } else {
                candidates.push(breach);
            }
        }

        // Severity tie-break per dedup key: the highest-severity candidate
        // opens, the rest are suppressed (logged, not raised).
        candidates.sort_by(|a, b| {
            b.rule
                .severity
                .rank()
                .cmp(&a.rule.severity.rank())
                .then_with(|| a.rule.id.cmp(&b.rule.id))
        });
        // Uniqueness is enforced per dedup key across passes: a key already
        // held by an active alert suppresses new candidates outright.
        let mut opened_keys: Vec<String> = self
            .active
            .values()
            .map(|alert| alert.dedup_key.clone())
            .collect();
        for breach in candidates {
            let dedup_key = breach.rule.dedup_key().to_string();
            if opened_keys.contains(&dedup_key) {
                info!(
                    "suppressing {} alert from rule {:?}: dedup key {:?} is already held",
                    breach.rule.severity, breach.rule.id, dedup_key
                );
                if let Some(history) = &self.history {
                    history.record_suppressed(breach.rule, &dedup_key, now, &breach.context);
                }
                continue;
            }
            opened_keys.push(dedup_key.clone());

            let alert = Alert {
                id: Uuid::new_v4(),
                rule_id: breach.rule.id.clone(),
                dedup_key: dedup_key.clone(),
                severity: breach.rule.severity,
                status: AlertStatus::Active,
                opened_at: now,
                last_seen_at: now,
                resolved_at: None,
                acknowledged_by: None,
                context: breach.context,
            };
            let key = (breach.rule.id.clone(), dedup_key);
            self.active.insert(key.clone(), alert.clone());
            self.last_fire.insert(key, now);
            self.apply(&mut transitions, alert, None, AlertStatus::Active);
        }

        // Resolution: condition cleared, cooldown expiry, or rule removal.
        let keys: Vec<(String, String)> = self.active.keys().cloned().collect();
        for key in keys {
            let Some(alert) = self.active.get(&key) else {
                continue;
            };
            let rule = snapshot.get(&key.0);

            let resolve = match rule {
                // The rule was removed by a hot reload; nothing can ever
                // clear or refresh this alert again.
                None => true,
                Some(rule) => {
                    let was_evaluated = evaluated.contains(&key.0.as_str());
                    let cleared_now = cleared.contains(&key.0.as_str());
                    let expired = self
                        .last_fire
                        .get(&key)
                        .map(|last| now - *last > Duration::seconds(rule.cooldown_secs as i64))
                        .unwrap_or(false);
                    match alert.status {
                        AlertStatus::Active if rule.auto_resolve => {
                            (was_evaluated && cleared_now) || expired
                        }
                        // Manual rules hold until acknowledged, then time out.
                        AlertStatus::Active => false,
                        AlertStatus::Acknowledged => expired,
                        AlertStatus::Resolved => true,
                    }
                }
            };

            if resolve {
                let previous = alert.status;
                let Some(mut resolved) = self.active.remove(&key) else {
                    continue;
                };
                self.last_fire.remove(&key);
                resolved.status = AlertStatus::Resolved;
                resolved.resolved_at = Some(now);
                debug!("alert {} for rule {:?} resolved", resolved.id, key.0);
                self.apply(&mut transitions, resolved, Some(previous), AlertStatus::Resolved);
            }
        }

        transitions
    }

    /// Acknowledge an active alert. The alert stays listed until resolved
    /// manually or by cooldown timeout.
    pub fn acknowledge(&mut self, alert_id: Uuid, by: &str) -> Result<Alert, VigilError> {
        let now = Utc::now();
        for alert in self.active.values_mut() {
            if alert.id == alert_id {
                if alert.status != AlertStatus::Active {
                    return Err(VigilError::Validation(format!(
                        "alert {alert_id} is {}, only active alerts can be acknowledged",
                        alert.status
                    )));
                }
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_by = Some(by.to_string());
                alert.last_seen_at = now;
                let acked = alert.clone();
                if let Some(history) = &self.history {
                    history.record_transition(
                        &acked,
                        Some(AlertStatus::Active),
                        AlertStatus::Acknowledged,
                    );
                }
                return Ok(acked);
            }
        }
        Err(VigilError::NotFound(format!("alert {alert_id}")))
    }

    /// Manually resolve an acknowledged (or active) alert.
    pub fn resolve(&mut self, alert_id: Uuid) -> Result<Alert, VigilError> {
        let now = Utc::now();
        let key = self
            .active
            .iter()
            .find(|(_, alert)| alert.id == alert_id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| VigilError::NotFound(format!("alert {alert_id}")))?;

        let Some(mut alert) = self.active.remove(&key) else {
            return Err(VigilError::NotFound(format!("alert {alert_id}")));
        };
        self.last_fire.remove(&key);
        let previous = alert.status;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        if let Some(history) = &self.history {
            history.record_transition(&alert, Some(previous), AlertStatus::Resolved);
        }
        Ok(alert)
    }

    /// List non-resolved alerts, ordered by severity descending then
    /// `opened_at` ascending.
    pub fn list_active(&self, filter: &ActiveFilter) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .active
            .values()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.severity
                .rank()
                .cmp(&a.severity.rank())
                .then_with(|| a.opened_at.cmp(&b.opened_at))
        });
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        alerts
    }

    /// Whether the rule is due under this trigger.
    fn rule_due(&mut self, rule: &AlertRule, now: DateTime<Utc>, _trigger: EvalTrigger) -> bool {
        match rule.cadence {
            Cadence::OnSignal => true,
            Cadence::Periodic { every_secs } => {
                let due = self
                    .next_due
                    .get(&rule.id)
                    .map(|next| now >= *next)
                    .unwrap_or(true);
                if due {
                    self.next_due
                        .insert(rule.id.clone(), now + Duration::seconds(every_secs as i64));
                }
                due
            }
        }
    }

    /// Read a rule's metric; `Ok(Some(context))` on breach, `Ok(None)` when
    /// the condition does not hold (or there is no data yet).
    fn read_rule(
        &self,
        rule: &AlertRule,
        now: DateTime<Utc>,
        metrics: &Aggregator,
    ) -> Result<Option<serde_json::Value>, VigilError> {
        let Some(current) = metrics.window_value(&rule.metric, rule.window_secs, now)? else {
            return Ok(None);
        };
        let previous = if rule.comparator == vigil_types::Comparator::RateOfChange {
            metrics.previous_window_value(&rule.metric, rule.window_secs, now)?
        } else {
            None
        };

        if rule.comparator.breaches(current, previous, rule.threshold) {
            Ok(Some(serde_json::json!({
                "metric": rule.metric,
                "value": current,
                "previous": previous,
                "threshold": rule.threshold,
                "window_secs": rule.window_secs,
            })))
        } else {
            Ok(None)
        }
    }

    /// Record and collect one transition. Each call leaves the engine and
    /// the history log consistent on their own.
    fn apply(
        &mut self,
        transitions: &mut Vec<AlertTransition>,
        alert: Alert,
        previous: Option<AlertStatus>,
        new: AlertStatus,
    ) {
        if let Some(history) = &self.history {
            history.record_transition(&alert, previous, new);
        }
        transitions.push(AlertTransition {
            alert,
            previous_status: previous,
            new_status: new,
        });
    }
}
