//! Integration tests for metric aggregation and health derivation.

mod common;

use std::time::Duration;

use chrono::Utc;
use vigil::{HealthStatus, RecordEvent};
use vigil_types::{HealthCheck, MetricDef};

use common::{payment_failed, start_monitor, start_monitor_with, temp_db, wait_for};

#[test]
fn summary_reports_counts_rate_and_percentiles() {
    let tmp = temp_db();
    let (monitor, _notifier) = start_monitor(&tmp, vec![]);

    for duration in (1..=10).map(|i| i as f64 * 10.0) {
        monitor
            .record_event(RecordEvent {
                duration_ms: Some(duration),
                ..RecordEvent::new("payment.failed", "payment")
            })
            .expect("should record");
    }

    let to = Utc::now();
    let from = to - chrono::Duration::seconds(100);
    let settled = wait_for(
        || {
            monitor
                .summarize("payment.failed", from, to)
                .map(|s| s.count == 10)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    );
    assert!(settled, "aggregator should fold all ten events");

    let summary = monitor
        .summarize("payment.failed", from, to)
        .expect("should summarize");
    assert_eq!(summary.count, 10);
    assert!((summary.rate_per_sec - 0.1).abs() < 1e-9);
    // Nearest-rank over 10..=100: the 5th and 10th sorted samples.
    assert_eq!(summary.p50, Some(50.0));
    assert_eq!(summary.p95, Some(100.0));
}

#[test]
fn unseen_metric_summarizes_to_zero() {
    let tmp = temp_db();
    let (monitor, _notifier) = start_monitor(&tmp, vec![]);

    let to = Utc::now();
    let summary = monitor
        .summarize("never.seen", to - chrono::Duration::minutes(5), to)
        .expect("should summarize");
    assert_eq!(summary.count, 0);
    assert_eq!(summary.rate_per_sec, 0.0);
    assert_eq!(summary.p50, None);
    assert_eq!(summary.p95, None);
}

#[test]
fn derived_metrics_follow_glob_selectors() {
    let tmp = temp_db();
    let (monitor, _notifier) = start_monitor_with(&tmp, vec![], |config| {
        config.metrics.push(MetricDef {
            name: "errors".into(),
            selector: "*.failed".into(),
            target_type: None,
        });
        config.metrics.push(MetricDef {
            name: "payment_errors".into(),
            selector: "*.failed".into(),
            target_type: Some("payment".into()),
        });
    });

    for _ in 0..3 {
        monitor
            .record_event(payment_failed(None))
            .expect("should record");
    }
    for _ in 0..2 {
        monitor
            .record_event(RecordEvent::new("login.failed", "session"))
            .expect("should record");
    }
    monitor
        .record_event(RecordEvent::new("payment.succeeded", "payment"))
        .expect("should record");

    let window = || {
        let to = Utc::now();
        (to - chrono::Duration::minutes(5), to)
    };
    let settled = wait_for(
        || {
            let (from, to) = window();
            monitor
                .summarize("errors", from, to)
                .map(|s| s.count == 5)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    );
    assert!(settled, "derived metric should count every *.failed action");

    let (from, to) = window();
    let payment_only = monitor
        .summarize("payment_errors", from, to)
        .expect("should summarize");
    assert_eq!(payment_only.count, 3);
    let successes = monitor
        .summarize("payment.succeeded", from, to)
        .expect("should summarize");
    assert_eq!(successes.count, 1);
}

#[test]
fn health_follows_critical_metric_thresholds() {
    let tmp = temp_db();
    // A day-wide bucket keeps every event in the current health window.
    let (monitor, _notifier) = start_monitor_with(&tmp, vec![], |config| {
        config.bucket_secs = 86_400;
        config.health.push(HealthCheck {
            metric: "payment.failed.count".into(),
            soft: 5.0,
            hard: 20.0,
        });
    });

    assert_eq!(monitor.health_status(), HealthStatus::Healthy);

    for _ in 0..10 {
        monitor
            .record_event(payment_failed(None))
            .expect("should record");
    }
    let degraded = wait_for(
        || monitor.health_status() == HealthStatus::Degraded,
        Duration::from_secs(2),
    );
    assert!(degraded, "soft breach should degrade health");

    for _ in 0..15 {
        monitor
            .record_event(payment_failed(None))
            .expect("should record");
    }
    let unhealthy = wait_for(
        || monitor.health_status() == HealthStatus::Unhealthy,
        Duration::from_secs(2),
    );
    assert!(unhealthy, "hard breach should make health unhealthy");
}
