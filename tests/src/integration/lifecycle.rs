//! # Subscription Lifecycle
//!
//! The persistent startup gate, liveness queries, reconnection after a drop,
//! and shutdown. All tests run on paused time so the reconnect delay is exact.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use domain_bus::EventFilter;
    use eventstore_bus::{BusError, SubscriptionDescriptor, SubscriptionState};
    use store_client::{EventStoreClient, InMemoryEventStore, StoreError};

    use crate::integration::fixtures::*;

    fn refused() -> StoreError {
        StoreError::Connection("connection refused".into())
    }

    // =============================================================================
    // STARTUP GATE
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_one_failed_creation_opens_no_persistent_subscription() {
        let store = InMemoryEventStore::new();
        store.fail_persistent_creation("payments", "sub-b", refused());
        let bus = bus(&store, &["persistent:orders/sub-a", "persistent:payments/sub-b"]);

        let err = bus.start().await.unwrap_err();
        assert!(matches!(
            err,
            BusError::PersistentCountMismatch {
                created: 1,
                expected: 2
            }
        ));
        assert!(err.to_string().contains("1 != 2"));

        settle().await;
        assert_eq!(store.open_subscriptions("orders"), 0);
        assert_eq!(store.open_subscriptions("payments"), 0);
        assert_eq!(store.persistent_subscribe_attempts("orders", "sub-a"), 0);
        assert!(!bus.all_persistent_live());

        // No retry of a failed gate
        tokio::time::sleep(RECONNECT_DELAY * 3).await;
        assert_eq!(store.persistent_subscribe_attempts("orders", "sub-a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_opens_despite_failed_gate() {
        let store = InMemoryEventStore::new();
        store.fail_persistent_creation("payments", "sub-b", refused());
        let bus = bus(&store, &["catch-up:orders", "persistent:payments/sub-b"]);
        let mut sub = bus.subscribe(EventFilter::all());

        assert!(bus.start().await.is_err());
        assert!(bus.all_catch_up_live());

        bus.publish(&order(5), Some("orders")).await.unwrap();
        let received = next_event(&mut sub).await;
        assert_eq!(received.downcast_ref::<OrderPlaced>(), Some(&order(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_groups_satisfy_gate() {
        let store = InMemoryEventStore::new();
        let settings = Default::default();
        store
            .create_persistent_subscription("orders", "sub-a", &settings)
            .await
            .unwrap();
        store
            .create_persistent_subscription("payments", "sub-b", &settings)
            .await
            .unwrap();
        let bus = bus(&store, &["persistent:orders/sub-a", "persistent:payments/sub-b"]);

        bus.start().await.unwrap();

        assert!(bus.all_persistent_live());
        let states: Vec<_> = bus.statuses().into_iter().map(|s| s.state).collect();
        assert_eq!(states, vec![SubscriptionState::Live, SubscriptionState::Live]);
        assert!(bus.statuses().iter().all(|s| s.is_created));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let store = InMemoryEventStore::new();
        let bus = bus(&store, &["catch-up:orders"]);

        bus.start().await.unwrap();
        assert!(matches!(bus.start().await, Err(BusError::AlreadyStarted)));
        assert_eq!(store.stream_subscribe_attempts("orders"), 1);
    }

    // =============================================================================
    // LIVENESS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_all_persistent_live_flips_with_last_handle() {
        let store = InMemoryEventStore::new();
        store.fail_next_subscribes("payments", 2);
        let bus = bus(&store, &["persistent:orders/sub-a", "persistent:payments/sub-b"]);

        bus.start().await.unwrap();
        assert!(!bus.all_persistent_live());

        tokio::time::sleep(RECONNECT_DELAY + Duration::from_millis(10)).await;
        assert!(!bus.all_persistent_live());

        tokio::time::sleep(RECONNECT_DELAY).await;
        assert!(bus.all_persistent_live());
        assert!(bus.is_live());
    }

    // =============================================================================
    // RECONNECT
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_closed_persistent_subscription_resubscribes_after_delay() {
        let store = InMemoryEventStore::new();
        let bus = bus(&store, &["persistent:orders/sub-a"]);
        bus.start().await.unwrap();
        assert!(bus.all_persistent_live());

        assert_eq!(store.close_subscriptions("orders"), 1);
        settle().await;

        assert!(!bus.all_persistent_live());
        assert_eq!(bus.statuses()[0].state, SubscriptionState::Dropped);
        assert_eq!(store.persistent_subscribe_attempts("orders", "sub-a"), 1);

        tokio::time::sleep(RECONNECT_DELAY - Duration::from_millis(50)).await;
        assert_eq!(store.persistent_subscribe_attempts("orders", "sub-a"), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.persistent_subscribe_attempts("orders", "sub-a"), 2);
        assert!(bus.all_persistent_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_written_while_dropped_arrive_after_reconnect() {
        let store = InMemoryEventStore::new();
        let bus = bus(&store, &["persistent:orders/sub-a"]);
        let mut sub = bus.subscribe(EventFilter::all());
        bus.start().await.unwrap();

        store.close_subscriptions("orders");
        settle().await;
        bus.publish(&order(9), Some("orders")).await.unwrap();
        settle().await;
        assert!(matches!(sub.try_recv(), Ok(None)));

        tokio::time::sleep(RECONNECT_DELAY + Duration::from_millis(10)).await;
        let received = next_event(&mut sub).await;
        assert_eq!(received.downcast_ref::<OrderPlaced>(), Some(&order(9)));

        settle().await;
        assert_eq!(store.acked("orders", "sub-a").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_of_one_stream_leaves_others_live() {
        let store = InMemoryEventStore::new();
        let bus = bus(&store, &["persistent:orders/sub-a", "persistent:payments/sub-b"]);
        bus.start().await.unwrap();

        store.error_subscriptions("payments", refused());
        settle().await;

        let statuses = bus.statuses();
        assert!(statuses[0].is_live);
        assert!(!statuses[1].is_live);
        assert!(statuses[1]
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("connection refused")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_catch_up_stays_dropped() {
        let store = InMemoryEventStore::new();
        let bus = bus(&store, &["catch-up:orders"]);
        bus.start().await.unwrap();

        store.close_subscriptions("orders");
        tokio::time::sleep(RECONNECT_DELAY * 5).await;

        assert!(!bus.all_catch_up_live());
        assert_eq!(store.stream_subscribe_attempts("orders"), 1);
    }

    // =============================================================================
    // SHUTDOWN
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_everything_and_cancels_reconnects() {
        let store = InMemoryEventStore::new();
        let bus = bus(
            &store,
            &["catch-up:orders", "persistent:orders/sub-a", "persistent:payments/sub-b"],
        );
        bus.start().await.unwrap();

        store.close_subscriptions("payments");
        settle().await;
        bus.shutdown().await;

        assert_eq!(store.open_subscriptions("orders"), 0);
        assert!(!bus.is_live());
        tokio::time::sleep(RECONNECT_DELAY * 3).await;
        assert_eq!(store.persistent_subscribe_attempts("payments", "sub-b"), 1);

        let live = bus
            .statuses()
            .into_iter()
            .filter(|s| s.descriptor == SubscriptionDescriptor::persistent("orders", "sub-a"))
            .map(|s| s.state)
            .collect::<Vec<_>>();
        assert_eq!(live, vec![SubscriptionState::Stopped]);

        // Second shutdown is a no-op
        bus.shutdown().await;
    }
}
