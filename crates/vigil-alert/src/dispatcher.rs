//! Background alert evaluation loop.
//!
//! Runs on a dedicated `std::thread`. Consumes [`EvalSignal`]s from the
//! aggregator with a receive timeout, so bucket-close signals drive
//! latency-sensitive rules immediately while the timeout doubles as the
//! periodic tick for cost-sensitive rules and cooldown expiry during quiet
//! periods. Notifications are dispatched after the engine locks are
//! released; a slow or failing sink never delays a state transition.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use vigil_metrics::{Aggregator, EvalSignal};

use crate::engine::{AlertEngine, EvalTrigger};
use crate::notify::{dispatch_with_retry, Notifier, NotifyPayload, RetryPolicy};

/// Configuration for the dispatcher loop.
pub struct DispatcherConfig {
    /// Idle tick interval: how long to wait for a signal before running a
    /// tick-triggered pass.
    pub tick: Duration,
    /// Notification retry policy.
    pub retry: RetryPolicy,
}

/// Run the dispatcher loop on the current thread.
///
/// Returns when the signal channel disconnects or an explicit
/// [`EvalSignal::Shutdown`] arrives. Intended to be called from a dedicated
/// `std::thread::spawn`.
pub fn run(
    engine: Arc<Mutex<AlertEngine>>,
    metrics: Arc<RwLock<Aggregator>>,
    notifier: Arc<dyn Notifier>,
    config: DispatcherConfig,
    receiver: Receiver<EvalSignal>,
) {
    info!("alert dispatcher started (tick {:?})", config.tick);

    loop {
        let trigger = match receiver.recv_timeout(config.tick) {
            Ok(EvalSignal::BucketClosed { bucket_start }) => {
                debug!("evaluation signal for bucket {bucket_start}");
                EvalTrigger::Signal
            }
            Ok(EvalSignal::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => EvalTrigger::Tick,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // One consistent pass: the metrics read lock pins the window state
        // so a rule never sees counters torn across concurrent updates.
        let transitions = {
            let metrics = match metrics.read() {
                Ok(guard) => guard,
                Err(_) => {
                    error!("metrics lock poisoned, stopping alert dispatcher");
                    break;
                }
            };
            let mut engine = match engine.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    error!("alert engine lock poisoned, stopping alert dispatcher");
                    break;
                }
            };
            engine.evaluate(Utc::now(), trigger, &metrics)
        };

        for transition in &transitions {
            dispatch_with_retry(
                notifier.as_ref(),
                &NotifyPayload::from(transition),
                &config.retry,
            );
        }
    }

    info!("alert dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_types::{
        AlertRule, Cadence, Comparator, RuleHandle, RuleSet, Severity,
    };

    struct CountingNotifier(AtomicUsize);

    impl Notifier for CountingNotifier {
        fn notify(&self, _payload: &NotifyPayload) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn shutdown_signal_stops_the_loop() {
        let rules = Arc::new(RuleHandle::new(RuleSet::default()));
        let engine = Arc::new(Mutex::new(AlertEngine::new(rules)));
        let metrics = Arc::new(RwLock::new(Aggregator::new(60, 60, &[]).unwrap()));
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let (tx, rx) = mpsc::sync_channel(4);

        let handle = {
            let engine = engine.clone();
            let metrics = metrics.clone();
            let notifier = notifier.clone() as Arc<dyn Notifier>;
            std::thread::spawn(move || {
                run(
                    engine,
                    metrics,
                    notifier,
                    DispatcherConfig {
                        tick: Duration::from_millis(10),
                        retry: RetryPolicy::default(),
                    },
                    rx,
                )
            })
        };

        tx.send(EvalSignal::Shutdown).unwrap();
        handle.join().expect("dispatcher thread should exit");
    }

    #[test]
    fn signal_triggers_evaluation_and_notification() {
        let rule = AlertRule {
            id: "always".into(),
            metric: "anything.count".into(),
            comparator: Comparator::Ge,
            threshold: 0.0,
            window_secs: 60,
            severity: Severity::Low,
            cooldown_secs: 300,
            cadence: Cadence::OnSignal,
            auto_resolve: true,
            dedup_by: None,
        };
        let rules = Arc::new(RuleHandle::new(RuleSet::new(vec![rule]).unwrap()));
        let engine = Arc::new(Mutex::new(AlertEngine::new(rules)));
        let metrics = Arc::new(RwLock::new(Aggregator::new(60, 60, &[]).unwrap()));
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let (tx, rx) = mpsc::sync_channel(4);

        let handle = {
            let engine = engine.clone();
            let metrics = metrics.clone();
            let notifier_arc = notifier.clone() as Arc<dyn Notifier>;
            std::thread::spawn(move || {
                run(
                    engine,
                    metrics,
                    notifier_arc,
                    DispatcherConfig {
                        tick: Duration::from_secs(5),
                        retry: RetryPolicy::default(),
                    },
                    rx,
                )
            })
        };

        // A count >= 0 always breaches, so one signal opens one alert.
        tx.send(EvalSignal::BucketClosed {
            bucket_start: Utc::now(),
        })
        .unwrap();
        tx.send(EvalSignal::Shutdown).unwrap();
        handle.join().expect("dispatcher thread should exit");

        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }
}
