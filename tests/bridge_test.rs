//! Bridge lifecycle, delivery, and ordering against the real background thread

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hostbridge::config::RuntimeConfig;
use hostbridge::core::{Command, FatalSignal, TaskError, TaskId};
use hostbridge::infrastructure::runtime::{
    start_bridge, BridgeBuilder, BridgeError, BridgeHandle, Delivery, Origin, Payload,
};

fn bridge() -> BridgeHandle<String> {
    start_bridge(&RuntimeConfig::default()).expect("bridge starts")
}

/// Drain the mailbox until `count` deliveries arrived or `timeout` passed.
fn collect(bridge: &BridgeHandle<String>, count: usize, timeout: Duration) -> Vec<Delivery<String>> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if let Some(delivery) = bridge.mailbox().recv_timeout(remaining) {
            out.push(delivery);
        }
    }
    out
}

fn sleep_then(ms: u64, text: &'static str) -> Command<String> {
    Command::perform(
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        },
        move |()| text.to_string(),
    )
}

fn message_of(delivery: &Delivery<String>) -> Option<&str> {
    match &delivery.payload {
        Payload::Message(text) => Some(text.as_str()),
        _ => None,
    }
}

#[test]
fn test_start_and_shutdown_is_idempotent() {
    let mut bridge = bridge();
    assert!(bridge.is_running());
    bridge.shutdown().unwrap();
    assert!(!bridge.is_running());
    bridge.shutdown().unwrap();

    let err = bridge.submit_command(Command::message("late".to_string())).unwrap_err();
    assert!(matches!(err, BridgeError::Closed));
}

#[test]
fn test_runs_on_named_background_thread() {
    let config = RuntimeConfig {
        thread_name: "bridge-under-test".to_string(),
        ..RuntimeConfig::default()
    };
    let bridge: BridgeHandle<String> = start_bridge(&config).unwrap();
    bridge
        .submit_command(Command::perform(async {}, |()| {
            thread::current().name().unwrap_or_default().to_string()
        }))
        .unwrap();
    let deliveries = collect(&bridge, 1, Duration::from_secs(5));
    assert_eq!(message_of(&deliveries[0]), Some("bridge-under-test"));
    assert_ne!(thread::current().name(), Some("bridge-under-test"));
}

#[test]
fn test_every_task_delivered_exactly_once() {
    let bridge = bridge();
    let mut ids = Vec::new();
    for i in 0..20 {
        let command = match i % 3 {
            0 => Command::message(format!("m{i}")),
            1 => Command::future(async { Ok(None) }),
            _ => Command::future(async move {
                Err(TaskError::Recoverable(anyhow::anyhow!("e{i}")))
            }),
        };
        ids.extend(bridge.submit_command(command).unwrap());
    }

    let deliveries = collect(&bridge, 20, Duration::from_secs(5));
    assert_eq!(deliveries.len(), 20);
    let mut seen: Vec<TaskId> = deliveries
        .iter()
        .map(|d| match d.origin {
            Origin::Command(id) => id,
            Origin::Subscription(_) => panic!("no subscriptions were requested"),
        })
        .collect();
    seen.sort();
    assert_eq!(seen, ids);

    let failures = deliveries
        .iter()
        .filter(|d| matches!(d.payload, Payload::Failed(_)))
        .count();
    assert_eq!(failures, 6);

    assert!(bridge.mailbox().recv_timeout(Duration::from_millis(50)).is_none());
}

#[test]
fn test_short_tasks_are_not_blocked_by_long_one() {
    let bridge = bridge();
    bridge.submit_command(sleep_then(400, "slow")).unwrap();
    for _ in 0..5 {
        bridge.submit_command(sleep_then(0, "fast")).unwrap();
    }

    let deliveries = collect(&bridge, 6, Duration::from_secs(5));
    let order: Vec<&str> = deliveries.iter().filter_map(message_of).collect();
    assert_eq!(order.len(), 6);
    assert_eq!(order.last(), Some(&"slow"));
    assert!(order[..5].iter().all(|m| *m == "fast"));
}

#[test]
fn test_completion_order_differs_from_dequeue_order() {
    let bridge = bridge();
    let t1 = bridge.submit_command(sleep_then(200, "t1")).unwrap()[0];
    let t2 = bridge.submit_command(sleep_then(10, "t2")).unwrap()[0];
    assert!(t1 < t2);

    let deliveries = collect(&bridge, 2, Duration::from_secs(5));
    assert_eq!(message_of(&deliveries[0]), Some("t2"));
    assert_eq!(message_of(&deliveries[1]), Some("t1"));
    // Dequeue sequence still follows submission order.
    assert!(deliveries[1].seq < deliveries[0].seq);
}

#[test]
fn test_panicking_task_is_a_recoverable_failure() {
    let bridge = bridge();
    bridge
        .submit_command(Command::perform(async {}, |()| -> String {
            panic!("mapper blew up")
        }))
        .unwrap();
    bridge.submit_command(Command::message("after".to_string())).unwrap();

    let deliveries = collect(&bridge, 2, Duration::from_secs(5));
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().any(|d| match &d.payload {
        Payload::Failed(failure) => failure.error().to_string().contains("mapper blew up"),
        _ => false,
    }));
    assert!(deliveries.iter().any(|d| message_of(d) == Some("after")));
}

#[test]
fn test_submitter_works_from_other_threads() {
    let bridge = bridge();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let submitter = bridge.submitter();
            thread::spawn(move || {
                submitter
                    .submit_command(Command::message(format!("from-{i}")))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut texts: Vec<String> = collect(&bridge, 4, Duration::from_secs(5))
        .into_iter()
        .filter_map(|d| match d.payload {
            Payload::Message(text) => Some(text),
            _ => None,
        })
        .collect();
    texts.sort();
    assert_eq!(texts, vec!["from-0", "from-1", "from-2", "from-3"]);
}

#[test]
fn test_waker_is_called_from_background_thread() {
    let woken = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&woken);
    let bridge: BridgeHandle<String> = BridgeBuilder::new(&RuntimeConfig::default())
        .waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .start()
        .unwrap();
    bridge
        .submit_command(Command::batch([
            Command::message("a".to_string()),
            Command::message("b".to_string()),
        ]))
        .unwrap();
    assert_eq!(collect(&bridge, 2, Duration::from_secs(5)).len(), 2);
    assert_eq!(woken.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failing_init_hook_is_startup_failure() {
    let result: Result<BridgeHandle<String>, _> = BridgeBuilder::new(&RuntimeConfig::default())
        .on_start(|_| anyhow::bail!("no network"))
        .start();
    match result {
        Err(BridgeError::StartupFailure(reason)) => assert!(reason.contains("no network")),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("startup should fail"),
    }
}

#[test]
fn test_panicking_init_hook_is_startup_failure() {
    let result: Result<BridgeHandle<String>, _> = BridgeBuilder::new(&RuntimeConfig::default())
        .on_start(|_| panic!("init exploded"))
        .start();
    match result {
        Err(BridgeError::StartupFailure(reason)) => assert!(reason.contains("init exploded")),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("startup should fail"),
    }
}

#[test]
fn test_init_hook_can_spawn_on_runtime() {
    let spawned = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&spawned);
    let mut bridge: BridgeHandle<String> = BridgeBuilder::new(&RuntimeConfig::default())
        .on_start(move |handle| {
            handle.spawn(async move {
                flag.fetch_add(1, Ordering::SeqCst);
            });
            Ok(())
        })
        .start()
        .unwrap();
    bridge.submit_command(sleep_then(20, "done")).unwrap();
    collect(&bridge, 1, Duration::from_secs(5));
    assert_eq!(spawned.load(Ordering::SeqCst), 1);
    bridge.shutdown().unwrap();
}

#[test]
fn test_fatal_signal_unwinds_dispatch_loop() {
    let mut bridge = bridge();
    bridge.submit_command(sleep_then(2_000, "never")).unwrap();
    bridge
        .submit_command(Command::fatal(FatalSignal::new(42, "disk on fire")))
        .unwrap();

    let deliveries = collect(&bridge, 1, Duration::from_secs(5));
    match &deliveries[0].payload {
        Payload::Fatal(signal) => assert_eq!(signal.code, 42),
        other => panic!("expected fatal, got {other:?}"),
    }

    // The loop is gone: the next submission joins the thread and reports why.
    thread::sleep(Duration::from_millis(100));
    match bridge.submit_command(Command::message("ignored".to_string())) {
        Err(BridgeError::Fatal(signal)) => {
            assert_eq!(signal, FatalSignal::new(42, "disk on fire"));
        }
        other => panic!("expected fatal from submit, got {other:?}"),
    }
    assert!(!bridge.is_running());
    assert!(bridge.mailbox().recv_timeout(Duration::from_millis(50)).is_none());
    assert!(matches!(
        bridge.submit_command(Command::message("again".to_string())),
        Err(BridgeError::Closed)
    ));
    bridge.shutdown().unwrap();
}

#[test]
fn test_fatal_still_reported_by_shutdown_when_nothing_submitted() {
    let mut bridge = bridge();
    bridge
        .submit_command(Command::fatal(FatalSignal::new(42, "disk on fire")))
        .unwrap();
    collect(&bridge, 1, Duration::from_secs(5));
    match bridge.shutdown() {
        Err(BridgeError::Fatal(signal)) => assert_eq!(signal.code, 42),
        other => panic!("expected fatal from shutdown, got {other:?}"),
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_fatal_wrapped_in_anyhow_is_fatal() {
    let mut bridge = bridge();
    bridge
        .submit_command(Command::try_perform(
            async { Err::<(), _>(anyhow::Error::new(FatalSignal::exit(3)).context("shutting down")) },
            |()| String::new(),
        ))
        .unwrap();
    collect(&bridge, 1, Duration::from_secs(5));
    assert!(matches!(bridge.shutdown(), Err(BridgeError::Fatal(s)) if s.code == 3));
}

#[test]
fn test_no_deliveries_after_shutdown() {
    let mut bridge = bridge();
    bridge.submit_command(sleep_then(150, "straggler")).unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    bridge.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_millis(150));
    assert!(!bridge.is_running());

    thread::sleep(Duration::from_millis(200));
    assert!(bridge.mailbox().drain().is_empty());
    assert!(bridge.mailbox().recv_timeout(Duration::from_millis(20)).is_none());
}
