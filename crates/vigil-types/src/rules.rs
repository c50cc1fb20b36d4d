//! Alert rule configuration: rule definitions, validated rule sets, and
//! atomic hot reload.
//!
//! A [`RuleSet`] is an immutable, validated snapshot of every [`AlertRule`].
//! Malformed rule files are rejected at load time with
//! [`VigilError::Config`], leaving whatever rule set was previously active
//! untouched. The [`RuleHandle`] wraps a rule set in an atomic pointer so
//! evaluation passes always read one fully-formed snapshot, never a mix of
//! old and new rules.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::{Severity, VigilError};

/// Maximum rule file size in bytes. Larger files are rejected to avoid
/// loading a corrupted or runaway config.
const MAX_RULE_FILE_SIZE: u64 = 1024 * 1024; // 1 MB

/// How a rule's metric value is compared against its threshold.
///
/// A closed set: each tag carries its own evaluation function rather than
/// open-ended dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Lt,
    Ge,
    Le,
    /// Breaches when `current - previous` exceeds the threshold, where
    /// `previous` is the same selector over the immediately preceding
    /// window of equal length.
    RateOfChange,
}

impl Comparator {
    /// Whether `current` breaches `threshold` under this comparator.
    ///
    /// `previous` is only consulted by [`Comparator::RateOfChange`]; a
    /// missing previous window reads as 0.
    pub fn breaches(&self, current: f64, previous: Option<f64>, threshold: f64) -> bool {
        match self {
            Comparator::Gt => current > threshold,
            Comparator::Lt => current < threshold,
            Comparator::Ge => current >= threshold,
            Comparator::Le => current <= threshold,
            Comparator::RateOfChange => current - previous.unwrap_or(0.0) > threshold,
        }
    }
}

/// When a rule is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Evaluate on every bucket-close signal (latency-sensitive rules).
    OnSignal,
    /// Evaluate on a fixed interval (cost-sensitive rules).
    Periodic { every_secs: u64 },
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::OnSignal
    }
}

fn default_window_secs() -> u64 {
    300
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_auto_resolve() -> bool {
    true
}

/// A single alert rule.
///
/// Rules are immutable during an evaluation pass; swap the whole
/// [`RuleSet`] through a [`RuleHandle`] to change them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule identifier.
    pub id: String,
    /// Metric selector this rule reads, e.g. `payment.failed.rate` or
    /// `api.request.duration.p95`.
    pub metric: String,
    /// How the metric value is compared against `threshold`.
    pub comparator: Comparator,
    /// The threshold value.
    pub threshold: f64,
    /// Evaluation window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Severity of alerts opened by this rule.
    pub severity: Severity,
    /// Minimum seconds before a resolved condition reopens the same alert,
    /// and the self-expiry horizon for `auto_resolve` rules.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// When this rule is evaluated.
    #[serde(default)]
    pub cadence: Cadence,
    /// Whether the alert resolves itself when the condition clears or the
    /// cooldown elapses. `false` requires acknowledge + manual resolve.
    #[serde(default = "default_auto_resolve")]
    pub auto_resolve: bool,
    /// Identity under which alert uniqueness is enforced. Defaults to the
    /// metric selector.
    #[serde(default)]
    pub dedup_by: Option<String>,
}

impl AlertRule {
    /// The dedup key this rule's alerts are deduplicated under.
    pub fn dedup_key(&self) -> &str {
        self.dedup_by.as_deref().unwrap_or(&self.metric)
    }
}

/// An immutable, validated set of alert rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

impl RuleSet {
    /// Build a rule set from already-constructed rules, validating them.
    pub fn new(rules: Vec<AlertRule>) -> Result<Self, VigilError> {
        let set = RuleSet { rules };
        set.validate()?;
        Ok(set)
    }

    /// Parse and validate a rule set from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, VigilError> {
        let set: RuleSet = toml::from_str(text)
            .map_err(|e| VigilError::Config(format!("failed to parse rule set: {e}")))?;
        set.validate()?;
        Ok(set)
    }

    /// Load and validate a rule set from a TOML file.
    pub fn load(path: &Path) -> Result<Self, VigilError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| VigilError::Config(format!("failed to stat rule file: {e}")))?;
        if meta.len() > MAX_RULE_FILE_SIZE {
            return Err(VigilError::Config(format!(
                "rule file {} exceeds {} bytes",
                path.display(),
                MAX_RULE_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| VigilError::Config(format!("failed to read rule file: {e}")))?;
        Self::from_toml(&text)
    }

    /// Validate every rule. A single bad rule rejects the whole set so a
    /// reload never half-applies.
    fn validate(&self) -> Result<(), VigilError> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(VigilError::Config("rule with empty id".into()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(VigilError::Config(format!("duplicate rule id {:?}", rule.id)));
            }
            if rule.metric.trim().is_empty() {
                return Err(VigilError::Config(format!(
                    "rule {:?} has an empty metric selector",
                    rule.id
                )));
            }
            if !rule.threshold.is_finite() {
                return Err(VigilError::Config(format!(
                    "rule {:?} has a non-finite threshold",
                    rule.id
                )));
            }
            if rule.window_secs == 0 {
                return Err(VigilError::Config(format!(
                    "rule {:?} has a zero evaluation window",
                    rule.id
                )));
            }
            if let Cadence::Periodic { every_secs } = rule.cadence {
                if every_secs == 0 {
                    return Err(VigilError::Config(format!(
                        "rule {:?} has a zero periodic cadence",
                        rule.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a rule by id.
    pub fn get(&self, id: &str) -> Option<&AlertRule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

/// Atomically swappable handle to the current rule set.
///
/// Readers call [`RuleHandle::current`] once per evaluation pass and use
/// that snapshot throughout; a concurrent [`RuleHandle::reload`] never
/// affects a pass already in flight.
#[derive(Debug)]
pub struct RuleHandle {
    inner: ArcSwap<RuleSet>,
}

impl RuleHandle {
    pub fn new(rules: RuleSet) -> Self {
        RuleHandle {
            inner: ArcSwap::from_pointee(rules),
        }
    }

    /// The current rule set snapshot.
    pub fn current(&self) -> Arc<RuleSet> {
        self.inner.load_full()
    }

    /// Swap in a new rule set. Takes effect for the next evaluation pass.
    pub fn reload(&self, rules: RuleSet) {
        self.inner.store(Arc::new(rules));
    }
}
