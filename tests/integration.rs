//! Integration tests for the notification bus.

use axon::{
    AccessLevel, CallbackSet, ConnectionId, ContextId, ElementId, EventError, EventKind,
    EventManager, EventManagerConfig, UserData,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn emit_connection_added(manager: &EventManager, element: ElementId, connection: u64) {
    manager
        .emit(
            ContextId(100),
            element,
            AccessLevel(0),
            EventKind::ConnectionAdded,
            Some(ConnectionId(connection)),
            Some(ElementId(connection + 1)),
        )
        .unwrap();
}

// --- Lifecycle ---

#[test]
fn test_unsubscribe_without_traffic_frees_synchronously() {
    let manager = EventManager::new().unwrap();

    let event = manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::default(),
            None,
        )
        .unwrap();
    assert_eq!(manager.subscription_count(), 1);

    // No emission ever referenced the event, so the destroy request is
    // collected before unsubscribe returns.
    manager.unsubscribe(&event);
    assert_eq!(manager.subscription_count(), 0);
}

#[test]
fn test_teardown_releases_user_data() {
    let manager = EventManager::new().unwrap();
    let payload = Arc::new("payload".to_string());
    let user_data: UserData = payload.clone();

    let event = manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ContentChanged,
            CallbackSet::legacy(|_, _, _| Ok(())),
            Some(user_data),
        )
        .unwrap();

    manager.unsubscribe(&event);
    drop(event);
    // Only the test's own handle remains.
    assert_eq!(Arc::strong_count(&payload), 1);
}

#[test]
fn test_shutdown_frees_remaining_events() {
    let manager = EventManager::new().unwrap();
    for element in 0..5 {
        manager
            .subscribe(
                ContextId(1),
                ElementId(element),
                EventKind::ConnectionAdded,
                CallbackSet::default(),
                None,
            )
            .unwrap();
    }
    assert_eq!(manager.subscription_count(), 5);
    manager.shutdown();
}

#[test]
fn test_drop_performs_teardown() {
    let manager = EventManager::new().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);
    manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::extended(move |_, _, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
        )
        .unwrap();
    emit_connection_added(&manager, ElementId(10), 1);
    // Dropping without an explicit shutdown still drains and joins.
    drop(manager);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

// --- Delivery ---

#[test]
fn test_delivery_carries_connection_and_endpoint() {
    let manager = EventManager::new().unwrap();
    let (sender, receiver) = crossbeam_channel::unbounded();

    manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::extended(move |event, connection, other| {
                sender.send((event.kind(), connection, other)).unwrap();
                Ok(())
            }),
            None,
        )
        .unwrap();

    emit_connection_added(&manager, ElementId(10), 7);

    let (kind, connection, other) = receiver.recv_timeout(Duration::from_millis(500)).unwrap();
    assert_eq!(kind, EventKind::ConnectionAdded);
    assert_eq!(connection, Some(ConnectionId(7)));
    assert_eq!(other, Some(ElementId(8)));
}

#[test]
fn test_failing_subscriber_does_not_block_others() {
    let manager = EventManager::new().unwrap();
    let (sender, receiver) = crossbeam_channel::unbounded();

    manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::legacy(|_, _, _| Err(EventError::Callback("broken subscriber".into()))),
            None,
        )
        .unwrap();
    manager
        .subscribe(
            ContextId(2),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::extended(move |_, _, _| {
                sender.send(()).unwrap();
                Ok(())
            }),
            None,
        )
        .unwrap();

    emit_connection_added(&manager, ElementId(10), 1);

    receiver.recv_timeout(Duration::from_millis(500)).unwrap();
    manager.stop_processing();
    let stats = manager.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 1);
}

#[test]
fn test_panicking_subscriber_is_contained() {
    let manager = EventManager::new().unwrap();
    let (sender, receiver) = crossbeam_channel::unbounded();

    manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::extended(|_, _, _| panic!("subscriber bug")),
            None,
        )
        .unwrap();
    manager
        .subscribe(
            ContextId(2),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::extended(move |_, _, _| {
                sender.send(()).unwrap();
                Ok(())
            }),
            None,
        )
        .unwrap();

    // Two emissions through the same worker: the panic in the first
    // delivery must not kill it.
    emit_connection_added(&manager, ElementId(10), 1);
    emit_connection_added(&manager, ElementId(10), 2);

    receiver.recv_timeout(Duration::from_millis(500)).unwrap();
    receiver.recv_timeout(Duration::from_millis(500)).unwrap();
    manager.stop_processing();
    assert_eq!(manager.stats().failed, 2);
}

// --- Deletion ---

#[test]
fn test_element_deletion_fires_delete_callback_once() {
    let manager = EventManager::new().unwrap();
    let deletions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&deletions);
    let (sender, receiver) = crossbeam_channel::unbounded();

    manager
        .subscribe(
            ContextId(3),
            ElementId(10),
            EventKind::ElementDeleted,
            CallbackSet::extended(move |_, _, _| {
                sender.send(()).unwrap();
                Ok(())
            })
            .with_delete(move |ctx, event, element| {
                assert_eq!(ctx, ContextId(3));
                assert_eq!(event.element(), element);
                assert_eq!(element, ElementId(10));
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
        )
        .unwrap();

    // Delete callbacks run synchronously on the deleting thread.
    manager.notify_element_deleted(ElementId(10)).unwrap();
    assert_eq!(deletions.load(Ordering::SeqCst), 1);
    assert_eq!(manager.subscription_count(), 0);

    // A later emission on the deleted element reaches nobody.
    manager
        .emit(
            ContextId(1),
            ElementId(10),
            AccessLevel(0),
            EventKind::ElementDeleted,
            None,
            None,
        )
        .unwrap();
    assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    manager.stop_processing();
    assert_eq!(manager.stats().delivered, 0);
}

#[test]
fn test_deletion_covers_every_kind_on_the_element() {
    let manager = EventManager::new().unwrap();
    let deletions = Arc::new(AtomicUsize::new(0));

    for kind in [
        EventKind::ConnectionAdded,
        EventKind::ConnectionRemoved,
        EventKind::ContentChanged,
    ] {
        let seen = Arc::clone(&deletions);
        manager
            .subscribe(
                ContextId(1),
                ElementId(10),
                kind,
                CallbackSet::default().with_delete(move |_, _, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                None,
            )
            .unwrap();
    }
    // A subscription on a different element stays untouched.
    manager
        .subscribe(
            ContextId(1),
            ElementId(11),
            EventKind::ContentChanged,
            CallbackSet::default(),
            None,
        )
        .unwrap();

    manager.notify_element_deleted(ElementId(10)).unwrap();
    assert_eq!(deletions.load(Ordering::SeqCst), 3);
    assert_eq!(manager.subscription_count(), 1);
}

// --- Drain barrier ---

#[test]
fn test_stop_processing_waits_for_queued_deliveries() {
    let manager = EventManager::new().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);

    manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::extended(move |_, _, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
        )
        .unwrap();

    for i in 0..1000 {
        emit_connection_added(&manager, ElementId(10), i);
    }

    // Returns only once all 1000 callbacks have run.
    manager.stop_processing();
    assert_eq!(counter.load(Ordering::SeqCst), 1000);

    // Emissions after the drain are accepted but deliver nothing.
    emit_connection_added(&manager, ElementId(10), 9999);
    assert_eq!(counter.load(Ordering::SeqCst), 1000);

    // New subscriptions are refused, asymmetric with emit on purpose.
    let result = manager.subscribe(
        ContextId(1),
        ElementId(11),
        EventKind::ConnectionAdded,
        CallbackSet::default(),
        None,
    );
    assert!(matches!(result, Err(EventError::AlreadyStopped)));

    manager.stop_processing(); // idempotent
}

// --- Locking ---

#[test]
fn test_event_lock_ownership() {
    let manager = EventManager::new().unwrap();
    let event = manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::default(),
            None,
        )
        .unwrap();

    event.lock(ContextId(1));
    assert!(matches!(
        event.unlock(ContextId(2)),
        Err(EventError::NotOwner(_))
    ));
    event.unlock(ContextId(1)).unwrap();
}

// --- Configuration ---

#[test]
fn test_worker_pool_config_is_clamped() {
    // Zero workers would stall every delivery; the pool floors at one.
    let manager = EventManager::with_config(EventManagerConfig {
        worker_threads: 0,
        element_probe: None,
    })
    .unwrap();
    let (sender, receiver) = crossbeam_channel::unbounded();
    manager
        .subscribe(
            ContextId(1),
            ElementId(10),
            EventKind::ConnectionAdded,
            CallbackSet::extended(move |_, _, _| {
                sender.send(()).unwrap();
                Ok(())
            }),
            None,
        )
        .unwrap();
    emit_connection_added(&manager, ElementId(10), 1);
    receiver.recv_timeout(Duration::from_millis(500)).unwrap();
}
