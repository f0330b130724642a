//! Synthetic sends: bypass, ordering against genuine traffic, loop limits

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_intercept::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const V763: SchemaVersion = SchemaVersion(763);
const SET_COINS: CategoryId = CategoryId(0x2A);
const NOTICE: CategoryId = CategoryId(0x30);

struct Fixture {
    manager: Arc<ProtocolManager>,
    coins: Arc<MessageDescriptor>,
    notice: Arc<MessageDescriptor>,
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let manager = Arc::new(ProtocolManager::new(config).expect("engine"));
    let coins = manager
        .registry()
        .register(
            MessageDescriptor::builder(Direction::Outbound, SET_COINS, V763, "SetCoins")
                .field("amount", FieldKind::I32)
                .build()
                .expect("descriptor"),
        )
        .expect("register");
    let notice = manager
        .registry()
        .register(
            MessageDescriptor::builder(Direction::Outbound, NOTICE, V763, "Notice")
                .field("text", FieldKind::String)
                .build()
                .expect("descriptor"),
        )
        .expect("register");
    Fixture {
        manager,
        coins,
        notice,
    }
}

fn amount_of(message: &RawMessage) -> Option<i32> {
    match message.fields.first() {
        Some(FieldValue::I32(amount)) => Some(*amount),
        _ => None,
    }
}

#[test]
fn test_synthetic_without_bypass_is_dispatched() {
    let f = fixture();
    let synthetic_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&synthetic_seen);
    f.manager.register_listener(
        Direction::Outbound,
        SET_COINS.into(),
        ListenerPriority::Normal,
        move |p: &mut PacketContainer| -> Result<()> {
            if p.is_synthetic() {
                counter.fetch_add(1, Ordering::SeqCst);
                p.write("amount", p.read::<i32, _>("amount")? * 2)?;
            }
            Ok(())
        },
    );

    let id = ConnectionId(1);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel, Some(V763)).unwrap();
    f.manager
        .send(id, Direction::Outbound, &f.coins, vec![FieldValue::I32(21)], false)
        .unwrap();

    let forwarded = endpoints.outbound.drain();
    assert_eq!(synthetic_seen.load(Ordering::SeqCst), 1);
    assert_eq!(forwarded.len(), 1);
    assert_eq!(amount_of(&forwarded[0]), Some(42));
    assert_eq!(forwarded[0].origin, MessageOrigin::Synthetic { filtered: true });
}

#[test]
fn test_synthetic_with_bypass_skips_listeners() {
    let f = fixture();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    f.manager.register_listener(
        Direction::Outbound,
        CategoryFilter::Any,
        ListenerPriority::Monitor,
        move |_: &mut PacketContainer| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    let id = ConnectionId(2);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel, Some(V763)).unwrap();
    f.manager
        .send(id, Direction::Outbound, &f.coins, vec![FieldValue::I32(7)], true)
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let forwarded = endpoints.outbound.drain();
    assert_eq!(amount_of(&forwarded[0]), Some(7));
    assert!(forwarded[0].origin.is_filtered());
    assert_eq!(f.manager.metrics().snapshot().synthetic_bypassed, 1);
}

#[test]
fn test_send_from_listener_follows_current_message() {
    let f = fixture();
    let weak: Weak<ProtocolManager> = Arc::downgrade(&f.manager);
    let notice = Arc::clone(&f.notice);
    f.manager.register_listener(
        Direction::Outbound,
        SET_COINS.into(),
        ListenerPriority::Normal,
        move |p: &mut PacketContainer| -> Result<()> {
            if p.is_synthetic() {
                return Ok(());
            }
            let Some(manager) = weak.upgrade() else {
                return Ok(());
            };
            let text = format!("coins now {}", p.read::<i32, _>("amount")?);
            manager.send(
                p.connection(),
                Direction::Outbound,
                &notice,
                vec![FieldValue::String(text)],
                false,
            )
        },
    );

    let id = ConnectionId(3);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel.clone(), Some(V763)).unwrap();
    channel
        .deliver(Direction::Outbound, RawMessage::new(SET_COINS, vec![FieldValue::I32(1)]))
        .unwrap();
    channel
        .deliver(Direction::Outbound, RawMessage::new(SET_COINS, vec![FieldValue::I32(2)]))
        .unwrap();

    let categories: Vec<CategoryId> = endpoints
        .outbound
        .drain()
        .into_iter()
        .map(|m| m.category)
        .collect();
    assert_eq!(categories, vec![SET_COINS, NOTICE, SET_COINS, NOTICE]);
}

#[test]
fn test_recursive_sends_stop_at_depth_limit() {
    let f = fixture();
    let weak = Arc::downgrade(&f.manager);
    let coins = Arc::clone(&f.coins);
    let loops = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&loops);
    f.manager.register_listener(
        Direction::Outbound,
        SET_COINS.into(),
        ListenerPriority::Normal,
        move |p: &mut PacketContainer| -> Result<()> {
            let Some(manager) = weak.upgrade() else {
                return Ok(());
            };
            let amount = p.read::<i32, _>("amount")?;
            match manager.send(
                p.connection(),
                Direction::Outbound,
                &coins,
                vec![FieldValue::I32(amount + 1)],
                false,
            ) {
                Err(InterceptError::SyntheticLoop(depth)) => {
                    observed.lock().push(depth);
                    Ok(())
                }
                other => other,
            }
        },
    );

    let id = ConnectionId(4);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel.clone(), Some(V763)).unwrap();
    channel
        .deliver(Direction::Outbound, RawMessage::new(SET_COINS, vec![FieldValue::I32(0)]))
        .unwrap();

    let limit = f.manager.config().injector.max_synthetic_depth;
    let forwarded = endpoints.outbound.drain();
    assert_eq!(forwarded.len(), limit as usize + 1);
    let amounts: Vec<i32> = forwarded.iter().filter_map(amount_of).collect();
    assert_eq!(amounts, (0..=limit as i32).collect::<Vec<_>>());
    assert_eq!(*loops.lock(), vec![limit + 1]);
}

#[test]
fn test_send_rejects_mismatched_targets() {
    let f = fixture();
    let id = ConnectionId(5);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel, Some(V763)).unwrap();

    // Wrong direction
    let err = f
        .manager
        .send(id, Direction::Inbound, &f.coins, vec![FieldValue::I32(1)], false)
        .unwrap_err();
    assert!(matches!(err, InterceptError::DescriptorMismatch { .. }));

    // Values do not fit
    let err = f
        .manager
        .send(id, Direction::Outbound, &f.coins, vec![FieldValue::Bool(true)], false)
        .unwrap_err();
    assert!(matches!(err, InterceptError::DescriptorMismatch { .. }));

    // Descriptor of another schema version
    let other = f
        .manager
        .registry()
        .register(
            MessageDescriptor::builder(Direction::Outbound, SET_COINS, 764u32, "SetCoins")
                .field("amount", FieldKind::VarInt)
                .build()
                .unwrap(),
        )
        .unwrap();
    let err = f
        .manager
        .send(id, Direction::Outbound, &other, vec![FieldValue::VarInt(1)], false)
        .unwrap_err();
    assert!(matches!(err, InterceptError::DescriptorMismatch { .. }));

    // Unknown connection
    let err = f
        .manager
        .send(ConnectionId(99), Direction::Outbound, &f.coins, vec![FieldValue::I32(1)], true)
        .unwrap_err();
    assert!(matches!(err, InterceptError::NotConnected(_)));

    assert!(endpoints.outbound.drain().is_empty());
}

#[test]
fn test_send_requires_registered_layout() {
    let f = fixture();
    let id = ConnectionId(7);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel, Some(V763)).unwrap();

    // Same key as SetCoins, different layout
    let forged = Arc::new(
        MessageDescriptor::builder(Direction::Outbound, SET_COINS, V763, "SetCoins")
            .field("amount", FieldKind::String)
            .build()
            .unwrap(),
    );
    for bypass in [true, false] {
        let err = f
            .manager
            .send(id, Direction::Outbound, &forged, vec![FieldValue::String("x".into())], bypass)
            .unwrap_err();
        assert!(matches!(err, InterceptError::DescriptorMismatch { .. }));
    }

    // Structurally equal to the registered one is accepted
    let copy = Arc::new(
        MessageDescriptor::builder(Direction::Outbound, SET_COINS, V763, "SetCoins")
            .field("amount", FieldKind::I32)
            .build()
            .unwrap(),
    );
    f.manager
        .send(id, Direction::Outbound, &copy, vec![FieldValue::I32(3)], true)
        .unwrap();

    // Nothing registered under this key
    let stray = Arc::new(
        MessageDescriptor::builder(Direction::Outbound, 0x7Fu32, V763, "Stray")
            .field("flag", FieldKind::Bool)
            .build()
            .unwrap(),
    );
    let err = f
        .manager
        .send(id, Direction::Outbound, &stray, vec![FieldValue::Bool(true)], true)
        .unwrap_err();
    assert!(matches!(err, InterceptError::UnknownType { .. }));

    let forwarded = endpoints.outbound.drain();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(amount_of(&forwarded[0]), Some(3));
}

#[test]
fn test_send_after_uninject_is_rejected() {
    let f = fixture();
    let id = ConnectionId(6);
    let (channel, _endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel, Some(V763)).unwrap();
    f.manager.uninject(id).unwrap();

    let err = f
        .manager
        .send(id, Direction::Outbound, &f.coins, vec![FieldValue::I32(1)], true)
        .unwrap_err();
    assert!(matches!(err, InterceptError::NotConnected(_)));
}

#[test]
fn test_broadcast_reaches_matching_versions_only() {
    let f = fixture();
    let mut receivers = Vec::new();
    for raw in 10..13u64 {
        let (channel, endpoints) = MemoryChannel::new(ConnectionId(raw));
        f.manager.inject(channel, Some(V763)).unwrap();
        receivers.push(endpoints);
    }
    let (legacy, mut legacy_endpoints) = MemoryChannel::new(ConnectionId(20));
    f.manager.inject(legacy, None).unwrap();

    let notice = MessageInstance::from_values(
        Arc::clone(&f.notice),
        vec![FieldValue::String("restart in 5".into())],
    )
    .unwrap();
    let sent = f.manager.broadcast(Direction::Outbound, &notice, true);

    assert_eq!(sent, 3);
    for endpoints in &mut receivers {
        assert_eq!(endpoints.outbound.drain().len(), 1);
    }
    assert!(legacy_endpoints.outbound.drain().is_empty());
}

#[test]
fn test_create_packet_uses_defaults() {
    let f = fixture();
    let packet = f
        .manager
        .create_packet(Direction::Outbound, SET_COINS, V763)
        .unwrap();
    assert_eq!(packet.fields(), &[FieldValue::I32(0)]);

    let missing = f.manager.create_packet(Direction::Inbound, SET_COINS, V763);
    assert!(matches!(missing, Err(InterceptError::UnknownType { .. })));
}

#[test]
fn test_create_packet_for_uses_negotiated_version() {
    let f = fixture();
    let id = ConnectionId(30);
    let (channel, _endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel, Some(V763)).unwrap();

    let packet = f
        .manager
        .create_packet_for(id, Direction::Outbound, NOTICE)
        .unwrap();
    assert!(packet.same_descriptor(&f.notice));
    assert_eq!(packet.fields(), &[FieldValue::String(String::new())]);

    // No usable version negotiated
    let legacy = ConnectionId(31);
    let (channel, _legacy_endpoints) = MemoryChannel::new(legacy);
    f.manager.inject(channel, Some(SchemaVersion(5))).unwrap();
    assert!(matches!(
        f.manager.create_packet_for(legacy, Direction::Outbound, NOTICE),
        Err(InterceptError::NotConnected(_))
    ));

    assert!(matches!(
        f.manager.create_packet_for(ConnectionId(99), Direction::Outbound, NOTICE),
        Err(InterceptError::NotConnected(_))
    ));
    assert!(matches!(
        f.manager.create_packet_for(id, Direction::Inbound, NOTICE),
        Err(InterceptError::UnknownType { .. })
    ));
}

#[test]
fn test_sends_beyond_queue_limit_are_rejected() {
    let config = EngineConfig::default_with_overrides(|c| c.injector.synthetic_queue_limit = 2);
    let f = fixture_with(config);
    let weak = Arc::downgrade(&f.manager);
    let notice = Arc::clone(&f.notice);
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    f.manager.register_listener(
        Direction::Outbound,
        SET_COINS.into(),
        ListenerPriority::Normal,
        move |p: &mut PacketContainer| -> Result<()> {
            let Some(manager) = weak.upgrade() else {
                return Ok(());
            };
            // This pass holds the lane, so every send stays queued until it ends
            for n in 0..3 {
                let text = FieldValue::String(format!("notice {n}"));
                let sent = manager.send(p.connection(), Direction::Outbound, &notice, vec![text], true);
                sink.lock().push(sent);
            }
            Ok(())
        },
    );

    let id = ConnectionId(32);
    let (channel, mut endpoints) = MemoryChannel::new(id);
    f.manager.inject(channel.clone(), Some(V763)).unwrap();
    channel
        .deliver(Direction::Outbound, RawMessage::new(SET_COINS, vec![FieldValue::I32(1)]))
        .unwrap();

    let results = results.lock();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(results[2], Err(InterceptError::QueueFull(2))));

    let categories: Vec<CategoryId> = endpoints
        .outbound
        .drain()
        .into_iter()
        .map(|m| m.category)
        .collect();
    assert_eq!(categories, vec![SET_COINS, NOTICE, NOTICE]);
}
