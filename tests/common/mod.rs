//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use vigil::{Monitor, Notifier, NotifyPayload, RecordEvent};
use vigil_types::{AlertRule, Cadence, Comparator, MonitorConfig, RuleSet, Severity};

/// Create a temporary file for use as a test database.
pub fn temp_db() -> NamedTempFile {
    NamedTempFile::new().expect("should create temp file for vigil database")
}

/// A notifier that records every payload it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    pub payloads: Mutex<Vec<NotifyPayload>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, payload: &NotifyPayload) -> Result<(), String> {
        self.payloads
            .lock()
            .expect("notifier mutex")
            .push(payload.clone());
        Ok(())
    }
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.payloads.lock().expect("notifier mutex").len()
    }
}

/// A monitor with a quiet dispatcher tick so background passes do not race
/// the assertions; tests drive evaluation through `evaluate_now`.
pub fn start_monitor(
    tmp: &NamedTempFile,
    rules: Vec<AlertRule>,
) -> (Monitor, Arc<RecordingNotifier>) {
    start_monitor_with(tmp, rules, |_| {})
}

/// Like [`start_monitor`], with a hook to tweak the config first.
pub fn start_monitor_with(
    tmp: &NamedTempFile,
    rules: Vec<AlertRule>,
    tweak: impl FnOnce(&mut MonitorConfig),
) -> (Monitor, Arc<RecordingNotifier>) {
    let mut config = MonitorConfig::at(tmp.path());
    config.tick_secs = 3600;
    tweak(&mut config);
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = Monitor::start(
        config,
        RuleSet::new(rules).expect("rules should validate"),
        notifier.clone(),
    )
    .expect("monitor should start");
    (monitor, notifier)
}

/// A count-threshold rule: breaches when `metric` exceeds `threshold`
/// within the last `window_secs`.
pub fn count_rule(id: &str, metric: &str, threshold: f64, severity: Severity) -> AlertRule {
    AlertRule {
        id: id.into(),
        metric: metric.into(),
        comparator: Comparator::Gt,
        threshold,
        window_secs: 30,
        severity,
        cooldown_secs: 300,
        cadence: Cadence::OnSignal,
        auto_resolve: true,
        dedup_by: None,
    }
}

/// A payment.failed event with the given external id.
pub fn payment_failed(external_id: Option<&str>) -> RecordEvent {
    RecordEvent {
        external_id: external_id.map(String::from),
        actor_id: Some("user-7".into()),
        ..RecordEvent::new("payment.failed", "payment")
    }
}

/// Poll until `condition` holds or the timeout elapses. The metrics fold
/// runs on a background thread, so assertions about aggregated state wait
/// for the channel to drain.
pub fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
