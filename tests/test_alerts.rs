//! Integration tests for the alert lifecycle: open, dedup, tie-break,
//! acknowledge, resolve, and rule hot reload.

mod common;

use std::time::Duration;

use chrono::Utc;
use vigil::{ActiveFilter, AlertStatus, RecordEvent, Severity, VigilError};
use vigil_types::RuleSet;

use common::{count_rule, payment_failed, start_monitor, temp_db, wait_for};

/// Record `n` payment.failed events and wait for the aggregator to fold
/// them in.
fn feed_failures(monitor: &vigil::Monitor, n: usize) {
    for _ in 0..n {
        monitor
            .record_event(payment_failed(None))
            .expect("should record");
    }
    let settled = wait_for(
        || {
            monitor
                .summarize(
                    "payment.failed",
                    Utc::now() - chrono::Duration::minutes(5),
                    Utc::now(),
                )
                .map(|s| s.count >= n as u64)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    );
    assert!(settled, "aggregator should fold {n} entries");
}

#[test]
fn breach_opens_one_alert_and_notifies() {
    let tmp = temp_db();
    let (monitor, notifier) = start_monitor(
        &tmp,
        vec![count_rule(
            "payment-failures",
            "payment.failed.count",
            5.0,
            Severity::High,
        )],
    );

    feed_failures(&monitor, 10);
    let transitions = monitor.evaluate_now().expect("should evaluate");
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].new_status, AlertStatus::Active);

    // Repeated breaches refresh the existing alert, never duplicate it.
    let transitions = monitor.evaluate_now().expect("should evaluate");
    assert!(transitions.is_empty());

    let active = monitor
        .list_active_alerts(&ActiveFilter::default())
        .expect("should list");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_id, "payment-failures");
    assert_eq!(notifier.count(), 1);
}

#[test]
fn condition_clearing_resolves_the_alert() {
    let tmp = temp_db();
    let mut rule = count_rule("payment-failures", "payment.failed.count", 3.0, Severity::High);
    rule.window_secs = 10;
    // 1s buckets so the evaluation window actually slides within the test.
    let (monitor, notifier) =
        common::start_monitor_with(&tmp, vec![rule], |config| config.bucket_secs = 1);

    // Events placed near the trailing edge of the 10s window.
    for _ in 0..5 {
        monitor
            .record_event(RecordEvent {
                occurred_at: Some(Utc::now() - chrono::Duration::seconds(8)),
                ..RecordEvent::new("payment.failed", "payment")
            })
            .expect("should record");
    }

    let settled = wait_for(
        || {
            monitor
                .summarize(
                    "payment.failed",
                    Utc::now() - chrono::Duration::seconds(10),
                    Utc::now(),
                )
                .map(|s| s.count == 5)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    );
    assert!(settled, "aggregator should fold all five events");

    // Bucket-close signals may let the background dispatcher open the
    // alert before this pass does; either way exactly one alert opens.
    monitor.evaluate_now().expect("should evaluate");
    let opened = wait_for(
        || {
            monitor
                .list_active_alerts(&ActiveFilter::default())
                .map(|alerts| alerts.len() == 1)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    );
    assert!(opened, "breach should open exactly one alert");

    // Let the events age out of the evaluation window.
    std::thread::sleep(Duration::from_secs(3));
    let resolved = monitor.evaluate_now().expect("should evaluate");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].previous_status, Some(AlertStatus::Active));
    assert_eq!(resolved[0].new_status, AlertStatus::Resolved);
    assert!(monitor
        .list_active_alerts(&ActiveFilter::default())
        .expect("should list")
        .is_empty());

    // One notification per transition: open + resolve.
    assert_eq!(notifier.count(), 2);
    let payloads = notifier.payloads.lock().expect("notifier mutex");
    assert_eq!(payloads[1].new_status, AlertStatus::Resolved);
}

#[test]
fn severity_tie_break_raises_only_the_high_alert() {
    let tmp = temp_db();
    let mut high = count_rule("high-rule", "payment.failed.count", 1.0, Severity::High);
    high.dedup_by = Some("payments".into());
    let mut low = count_rule("low-rule", "payment.failed.count", 1.0, Severity::Low);
    low.dedup_by = Some("payments".into());
    let (monitor, _notifier) = start_monitor(&tmp, vec![low, high]);

    feed_failures(&monitor, 3);
    let transitions = monitor.evaluate_now().expect("should evaluate");
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].alert.rule_id, "high-rule");
    assert_eq!(transitions[0].alert.severity, Severity::High);

    let active = monitor
        .list_active_alerts(&ActiveFilter::default())
        .expect("should list");
    assert_eq!(active.len(), 1);
}

#[test]
fn manual_rule_follows_acknowledge_then_resolve() {
    let tmp = temp_db();
    let mut rule = count_rule("manual", "payment.failed.count", 1.0, Severity::Medium);
    rule.auto_resolve = false;
    let (monitor, notifier) = start_monitor(&tmp, vec![rule]);

    feed_failures(&monitor, 3);
    let opened = monitor.evaluate_now().expect("should evaluate");
    let alert_id = opened[0].alert.id;

    let acked = monitor
        .acknowledge(alert_id, "oncall")
        .expect("should acknowledge");
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("oncall"));

    // Acknowledged alerts still list until resolved.
    let active = monitor
        .list_active_alerts(&ActiveFilter {
            status: Some(AlertStatus::Acknowledged),
            ..Default::default()
        })
        .expect("should list");
    assert_eq!(active.len(), 1);

    let resolved = monitor.resolve_alert(alert_id).expect("should resolve");
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(monitor
        .list_active_alerts(&ActiveFilter::default())
        .expect("should list")
        .is_empty());

    // open + acknowledge + resolve each notified.
    assert_eq!(notifier.count(), 3);
}

#[test]
fn acknowledging_unknown_alert_is_not_found() {
    let tmp = temp_db();
    let (monitor, _notifier) = start_monitor(&tmp, vec![]);
    assert!(matches!(
        monitor.acknowledge(uuid::Uuid::new_v4(), "oncall"),
        Err(VigilError::NotFound(_))
    ));
}

#[test]
fn hot_reload_swaps_the_whole_rule_set() {
    let tmp = temp_db();
    let (monitor, _notifier) = start_monitor(
        &tmp,
        vec![count_rule(
            "payment-failures",
            "payment.failed.count",
            1.0,
            Severity::High,
        )],
    );

    feed_failures(&monitor, 3);
    monitor.evaluate_now().expect("should evaluate");
    assert_eq!(
        monitor
            .list_active_alerts(&ActiveFilter::default())
            .expect("should list")
            .len(),
        1
    );

    // Removing the rule resolves its orphaned alert on the next pass.
    monitor.reload_rules(RuleSet::new(vec![]).expect("empty set"));
    let transitions = monitor.evaluate_now().expect("should evaluate");
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].new_status, AlertStatus::Resolved);
}

#[test]
fn malformed_rule_set_is_rejected_at_load_time() {
    let err = RuleSet::from_toml(
        r#"
        [[rules]]
        id = "bad"
        metric = ""
        comparator = "gt"
        threshold = 0.5
        severity = "high"
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, VigilError::Config(_)));
}
