//! Connection lifecycle: injection, termination, listener retirement

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_intercept::prelude::*;
use packet_intercept::utils::reporter::{ErrorReporter, ListenerFailure};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const V763: SchemaVersion = SchemaVersion(763);
const SET_COINS: CategoryId = CategoryId(0x2A);

fn manager_with(config: EngineConfig) -> Arc<ProtocolManager> {
    let manager = ProtocolManager::new(config).expect("engine");
    manager
        .registry()
        .register(
            MessageDescriptor::builder(Direction::Outbound, SET_COINS, V763, "SetCoins")
                .field("amount", FieldKind::I32)
                .build()
                .expect("descriptor"),
        )
        .expect("register");
    Arc::new(manager)
}

fn coins(amount: i32) -> RawMessage {
    RawMessage::new(SET_COINS, vec![FieldValue::I32(amount)])
}

#[test]
fn test_inject_is_idempotent() {
    let manager = manager_with(EngineConfig::default());
    let (channel, _endpoints) = MemoryChannel::new(ConnectionId(1));

    let first = manager.inject(channel.clone(), Some(V763)).unwrap();
    let second = manager.inject(channel.clone(), Some(V763)).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.injector().len(), 1);
    assert!(channel.has_hook(Direction::Inbound));
    assert!(channel.has_hook(Direction::Outbound));
}

#[test]
fn test_inject_rejects_closed_channel_and_excess_connections() {
    let config = EngineConfig::default_with_overrides(|c| c.injector.max_connections = 2);
    let manager = manager_with(config);

    let (closed, _closed_endpoints) = MemoryChannel::new(ConnectionId(1));
    closed.close();
    assert!(matches!(
        manager.inject(closed, Some(V763)),
        Err(InterceptError::NotConnected(_))
    ));

    let mut keep = Vec::new();
    for raw in 2..4u64 {
        let (channel, endpoints) = MemoryChannel::new(ConnectionId(raw));
        manager.inject(channel, Some(V763)).unwrap();
        keep.push(endpoints);
    }
    let (extra, _extra_endpoints) = MemoryChannel::new(ConnectionId(9));
    assert!(matches!(
        manager.inject(extra, Some(V763)),
        Err(InterceptError::ConnectionLimit(2))
    ));
}

/// Transport whose hook installation calls back into the engine and can fail
struct CallbackChannel {
    inner: Arc<MemoryChannel>,
    manager: Mutex<std::sync::Weak<ProtocolManager>>,
    fail_on: Option<Direction>,
    visible_during_attach: Mutex<Vec<usize>>,
}

impl CallbackChannel {
    fn new(id: ConnectionId, fail_on: Option<Direction>) -> (Arc<Self>, Arc<MemoryChannel>) {
        let (inner, _endpoints) = MemoryChannel::new(id);
        let channel = Arc::new(Self {
            inner: Arc::clone(&inner),
            manager: Mutex::new(std::sync::Weak::new()),
            fail_on,
            visible_during_attach: Mutex::new(Vec::new()),
        });
        (channel, inner)
    }
}

impl Channel for CallbackChannel {
    fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    fn attach(&self, direction: Direction, hook: Arc<dyn InterceptHook>) -> Result<()> {
        if let Some(manager) = self.manager.lock().upgrade() {
            let visible = manager.injector().contexts().len();
            self.visible_during_attach.lock().push(visible);
        }
        if self.fail_on == Some(direction) {
            return Err(InterceptError::Custom(format!("{direction} pipeline missing")));
        }
        self.inner.attach(direction, hook)
    }

    fn detach(&self, direction: Direction) -> Option<Arc<dyn InterceptHook>> {
        self.inner.detach(direction)
    }

    fn forward(&self, direction: Direction, message: RawMessage) -> Result<()> {
        self.inner.forward(direction, message)
    }
}

#[test]
fn test_failed_attach_leaves_nothing_behind() {
    let config = EngineConfig::default_with_overrides(|c| c.injector.max_connections = 1);
    let manager = manager_with(config);
    let (channel, inner) = CallbackChannel::new(ConnectionId(10), Some(Direction::Outbound));
    *channel.manager.lock() = Arc::downgrade(&manager);

    let err = manager.inject(channel.clone(), Some(V763)).unwrap_err();
    assert!(matches!(err, InterceptError::Custom(_)));
    assert!(manager.injector().is_empty());
    assert!(!inner.has_hook(Direction::Inbound));
    assert!(!inner.has_hook(Direction::Outbound));
    // Attach ran with the connection table unlocked
    assert_eq!(*channel.visible_during_attach.lock(), vec![1, 1]);

    // The slot of the failed connection is free again
    let (healthy, _endpoints) = MemoryChannel::new(ConnectionId(11));
    manager.inject(healthy, Some(V763)).unwrap();
    assert_eq!(manager.metrics().snapshot().connections_active, 1);
}

#[test]
fn test_connection_limit_holds_under_contention() {
    let config = EngineConfig::default_with_overrides(|c| c.injector.max_connections = 4);
    let manager = manager_with(config);
    let barrier = Arc::new(std::sync::Barrier::new(16));

    let workers: Vec<_> = (0..16u64)
        .map(|raw| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let (channel, _endpoints) = MemoryChannel::new(ConnectionId(100 + raw));
                barrier.wait();
                manager.inject(channel, Some(V763)).is_ok()
            })
        })
        .collect();
    let admitted = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(admitted, 4);
    assert_eq!(manager.injector().len(), 4);

    // Uninjecting frees a slot
    let id = manager.injector().contexts()[0].id();
    manager.uninject(id).unwrap();
    let (late, _endpoints) = MemoryChannel::new(ConnectionId(999));
    manager.inject(late, Some(V763)).unwrap();
}

#[test]
fn test_uninject_detaches_hooks() {
    let manager = manager_with(EngineConfig::default());
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    manager.register_listener(
        Direction::Outbound,
        CategoryFilter::Any,
        ListenerPriority::Normal,
        move |_: &mut PacketContainer| -> Result<()> {
            *counter.lock() += 1;
            Ok(())
        },
    );

    let id = ConnectionId(4);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    manager.inject(channel.clone(), Some(V763)).unwrap();
    let report = manager.uninject(id).unwrap();
    assert!(report.completed);
    assert_eq!(report.discarded_synthetic, 0);

    assert!(!channel.has_hook(Direction::Outbound));
    channel.deliver(Direction::Outbound, coins(1)).unwrap();
    assert_eq!(*calls.lock(), 0);
    assert_eq!(endpoints.outbound.drain().len(), 1);

    assert!(matches!(manager.uninject(id), Err(InterceptError::NotConnected(_))));
}

#[test]
fn test_uninject_discards_queue_and_abandons_stuck_pass() {
    let config = EngineConfig::default_with_overrides(|c| {
        c.injector.drain_timeout = Duration::from_millis(50)
    });
    let manager = manager_with(config);
    let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    manager.register_listener(
        Direction::Outbound,
        SET_COINS.into(),
        ListenerPriority::Normal,
        move |p: &mut PacketContainer| -> Result<()> {
            if !p.is_synthetic() {
                let _ = entered_tx.send(());
                let _ = release_rx.recv();
            }
            Ok(())
        },
    );

    let id = ConnectionId(5);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    let context = manager.inject(channel.clone(), Some(V763)).unwrap();

    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || channel.deliver(Direction::Outbound, coins(1)))
    };
    entered_rx.recv().unwrap();

    // The lane is held by the stuck pass, so the send is queued behind it
    let descriptor = manager
        .registry()
        .resolve(Direction::Outbound, SET_COINS, V763)
        .unwrap();
    manager
        .send(id, Direction::Outbound, &descriptor, vec![FieldValue::I32(2)], true)
        .unwrap();
    assert_eq!(context.pending_len(Direction::Outbound), 1);

    let report = manager.uninject(id).unwrap();
    assert_eq!(report.connection, id);
    assert_eq!(report.discarded_synthetic, 1);
    assert_eq!(report.abandoned_in_flight, 1);
    assert!(!report.completed);

    release_tx.send(()).unwrap();
    producer.join().unwrap().unwrap();

    let forwarded = endpoints.outbound.drain();
    assert_eq!(forwarded, vec![coins(1)]);
    let metrics = manager.metrics().snapshot();
    assert_eq!(metrics.synthetic_discarded, 1);
    assert_eq!(metrics.dispatches_abandoned, 1);
}

#[test]
fn test_uninject_from_inside_listener_does_not_wait_on_itself() {
    let manager = manager_with(EngineConfig::default());
    let weak = Arc::downgrade(&manager);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    manager.register_listener(
        Direction::Outbound,
        SET_COINS.into(),
        ListenerPriority::Normal,
        move |p: &mut PacketContainer| -> Result<()> {
            if let Some(manager) = weak.upgrade() {
                sink.lock().push(manager.uninject(p.connection())?);
            }
            Ok(())
        },
    );

    let id = ConnectionId(6);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    manager.inject(channel.clone(), Some(V763)).unwrap();
    channel.deliver(Direction::Outbound, coins(3)).unwrap();

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].completed);
    assert_eq!(endpoints.outbound.drain(), vec![coins(3)]);
    assert!(manager.injector().is_empty());
}

#[test]
fn test_uninject_from_listener_skips_lane_waiters() {
    let config = EngineConfig::default_with_overrides(|c| {
        c.injector.drain_timeout = Duration::from_secs(2)
    });
    let manager = manager_with(config);
    let weak = Arc::downgrade(&manager);
    let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
    let (queued_tx, queued_rx) = crossbeam_channel::bounded::<()>(1);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let reports = Arc::new(Mutex::new(Vec::new()));
    let (seen_sink, report_sink) = (Arc::clone(&seen), Arc::clone(&reports));
    manager.register_listener(
        Direction::Outbound,
        SET_COINS.into(),
        ListenerPriority::Normal,
        move |p: &mut PacketContainer| -> Result<()> {
            seen_sink.lock().push(p.read::<i32, _>("amount")?);
            let _ = entered_tx.send(());
            let _ = queued_rx.recv();
            // Give the second producer time to block on the lane
            thread::sleep(Duration::from_millis(50));
            if let Some(manager) = weak.upgrade() {
                let started = Instant::now();
                let report = manager.uninject(p.connection())?;
                report_sink.lock().push((report, started.elapsed()));
            }
            Ok(())
        },
    );

    let id = ConnectionId(8);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    manager.inject(channel.clone(), Some(V763)).unwrap();

    let first = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || channel.deliver(Direction::Outbound, coins(1)))
    };
    entered_rx.recv().unwrap();
    let second = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            queued_tx.send(()).unwrap();
            channel.deliver(Direction::Outbound, coins(2))
        })
    };
    first.join().unwrap().unwrap();
    second.join().unwrap().unwrap();

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    let (report, elapsed) = &reports[0];
    assert!(report.completed);
    assert_eq!(report.abandoned_in_flight, 0);
    assert!(*elapsed < Duration::from_secs(1), "uninject waited {elapsed:?}");

    // The waiting message is forwarded untouched without reaching listeners
    assert_eq!(*seen.lock(), vec![1]);
    let mut forwarded: Vec<i32> = endpoints
        .outbound
        .drain()
        .iter()
        .filter_map(|m| match m.fields.first() {
            Some(FieldValue::I32(amount)) => Some(*amount),
            _ => None,
        })
        .collect();
    forwarded.sort_unstable();
    assert_eq!(forwarded, vec![1, 2]);
    assert_eq!(manager.metrics().snapshot().dispatches_abandoned, 0);
}

#[derive(Default)]
struct RecordingReporter {
    failures: Mutex<Vec<ListenerFailure>>,
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, failure: &ListenerFailure) {
        self.failures.lock().push(failure.clone());
    }
}

#[test]
fn test_failing_listener_is_retired() {
    let reporter = Arc::new(RecordingReporter::default());
    let manager = ProtocolManager::with_reporter(EngineConfig::default(), reporter.clone())
        .expect("engine");
    manager
        .registry()
        .register(
            MessageDescriptor::builder(Direction::Outbound, SET_COINS, V763, "SetCoins")
                .field("amount", FieldKind::I32)
                .build()
                .unwrap(),
        )
        .unwrap();
    let handle = manager.register_listener(
        Direction::Outbound,
        CategoryFilter::Any,
        ListenerPriority::Normal,
        NamedListener::new("broken", |_: &mut PacketContainer| -> Result<()> {
            Err(InterceptError::Listener("always".into()))
        }),
    );

    let (channel, mut endpoints) = MemoryChannel::new(ConnectionId(7));
    manager.inject(channel.clone(), Some(V763)).unwrap();
    for amount in 0..5 {
        channel.deliver(Direction::Outbound, coins(amount)).unwrap();
    }

    let failures = reporter.failures.lock();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|f| f.listener == "broken"));
    assert_eq!(failures[2].consecutive, 3);
    assert!(failures[2].removed);
    assert!(!manager.dispatcher().is_registered(handle));
    assert_eq!(endpoints.outbound.drain().len(), 5);
    assert_eq!(manager.metrics().snapshot().listeners_auto_removed, 1);
}

#[test]
fn test_shutdown_uninjects_everything() {
    let manager = manager_with(EngineConfig::default());
    let mut endpoints = Vec::new();
    for raw in 0..3u64 {
        let (channel, ends) = MemoryChannel::new(ConnectionId(raw));
        manager.inject(channel, Some(V763)).unwrap();
        endpoints.push(ends);
    }

    let reports = manager.shutdown();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.completed));
    assert!(manager.injector().is_empty());
    assert_eq!(manager.metrics().snapshot().connections_active, 0);
}
