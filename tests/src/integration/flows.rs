//! # Delivery Flows
//!
//! Events published through the bus come back through catch-up and
//! persistent subscriptions, and persistent deliveries are settled by
//! exactly one ack or nack.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use domain_bus::{EventFilter, SharedEvent};
    use eventstore_bus::{BusError, DispatchError, HandlerRegistry};
    use futures::StreamExt;
    use store_client::{NackAction, RecordedEvent, ResolvedEvent, StoreError};

    use crate::integration::fixtures::*;

    // =============================================================================
    // ROUND TRIP
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_published_order_reconstructs_on_catch_up() {
        let store = store_client::InMemoryEventStore::new();
        let bus = bus(&store, &["catch-up:orders"]);
        let mut sub = bus.subscribe(EventFilter::all());
        bus.start().await.unwrap();

        bus.publish(&order(1), Some("orders")).await.unwrap();

        let received = next_event(&mut sub).await;
        assert_eq!(received.downcast_ref::<OrderPlaced>(), Some(&order(1)));
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_replays_history_in_order() {
        let store = store_client::InMemoryEventStore::new();
        let bus = bus(&store, &["catch-up:orders"]);
        for id in 1..=3 {
            bus.publish(&order(id), Some("orders")).await.unwrap();
        }

        let mut sub = bus.subscribe(EventFilter::all());
        bus.start().await.unwrap();

        for id in 1..=3 {
            let received = next_event(&mut sub).await;
            assert_eq!(received.downcast_ref::<OrderPlaced>(), Some(&order(id)));
        }
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_volatile_skips_history() {
        let store = store_client::InMemoryEventStore::new();
        let bus = bus(&store, &["volatile:orders"]);
        bus.publish(&order(1), Some("orders")).await.unwrap();

        let mut sub = bus.subscribe(EventFilter::all());
        bus.start().await.unwrap();
        bus.publish(&order(2), Some("orders")).await.unwrap();

        let received = next_event(&mut sub).await;
        assert_eq!(received.downcast_ref::<OrderPlaced>(), Some(&order(2)));
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_stream_filters_by_type() {
        let store = store_client::InMemoryEventStore::new();
        let bus = bus(&store, &["catch-up:orders"]);
        let mut payments = bus.event_stream(EventFilter::event_types(["PaymentCaptured"]));
        bus.start().await.unwrap();

        let events: Vec<SharedEvent> = vec![
            Arc::new(order(1)),
            Arc::new(PaymentCaptured {
                order_id: 1,
                amount_cents: 990,
            }),
        ];
        bus.publish_all(&events, Some("orders")).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), payments.next())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is::<PaymentCaptured>());
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_reaches_caller() {
        let store = store_client::InMemoryEventStore::new();
        let bus = bus(&store, &[]);
        store.fail_appends(Some(StoreError::Connection("refused".into())));

        let err = bus.publish(&order(1), None).await.unwrap_err();
        assert!(matches!(err, BusError::Publish { ref stream, .. } if stream == "$svc-catch-all"));

        store.fail_appends(None);
        bus.publish(&order(1), None).await.unwrap();
        assert_eq!(store.read_stream("$svc-catch-all").len(), 1);
    }

    // =============================================================================
    // ACK / NACK
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_persistent_delivery_is_acked_after_dispatch() {
        let store = store_client::InMemoryEventStore::new();
        let bus = bus(&store, &["persistent:orders/sub-a"]);
        let mut sub = bus.subscribe(EventFilter::all());
        bus.start().await.unwrap();

        let result = bus.publish(&order(1), Some("orders")).await.unwrap();
        assert_eq!(result.next_expected_revision, 1);

        next_event(&mut sub).await;
        settle().await;

        let event_id = store.read_stream("orders")[0].id;
        assert_eq!(store.acked("orders", "sub-a"), vec![event_id]);
        assert!(store.nacked("orders", "sub-a").is_empty());
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconstruction_is_parked_once() {
        let store = store_client::InMemoryEventStore::new();
        let mut strict = HandlerRegistry::new();
        // Wrong shape for the stored payload
        strict.register_json_as::<PaymentCaptured>("OrderPlaced");
        let bus = bus_with(&store, config(&["persistent:orders/sub-a"]), strict);
        bus.start().await.unwrap();

        bus.publish(&order(1), Some("orders")).await.unwrap();
        settle().await;

        let event_id = store.read_stream("orders")[0].id;
        let nacks = store.nacked("orders", "sub-a");
        assert_eq!(nacks.len(), 1);
        assert_eq!(nacks[0].event_id, event_id);
        assert_eq!(nacks[0].action, NackAction::Park);
        assert!(store.acked("orders", "sub-a").is_empty());
        assert_eq!(store.parked("orders", "sub-a"), vec![event_id]);
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disposition_redelivers_until_success() {
        let store = store_client::InMemoryEventStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut flaky = HandlerRegistry::new();
        let counter = Arc::clone(&calls);
        flaky.register("OrderPlaced", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DispatchError::Reconstruction {
                    event_type: "OrderPlaced".into(),
                    reason: "not yet".into(),
                });
            }
            Ok(Arc::new(order(1)) as SharedEvent)
        });
        let mut cfg = config(&["persistent:orders/sub-a"]);
        cfg.nack_action = NackAction::Retry;
        let bus = bus_with(&store, cfg, flaky);
        bus.start().await.unwrap();

        bus.publish(&order(1), Some("orders")).await.unwrap();
        settle().await;

        let event_id = store.read_stream("orders")[0].id;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.nacked("orders", "sub-a").len(), 1);
        assert_eq!(store.acked("orders", "sub-a"), vec![event_id]);
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disposition_parks_once_retries_are_spent() {
        let store = store_client::InMemoryEventStore::new();
        let mut failing = HandlerRegistry::new();
        failing.register("OrderPlaced", |_| {
            Err(DispatchError::Reconstruction {
                event_type: "OrderPlaced".into(),
                reason: "never".into(),
            })
        });
        let mut cfg = config(&["persistent:orders/sub-a"]);
        cfg.nack_action = NackAction::Retry;
        cfg.persistent_settings.max_retry_count = 2;
        let bus = bus_with(&store, cfg, failing);
        bus.start().await.unwrap();

        bus.publish(&order(1), Some("orders")).await.unwrap();
        settle().await;

        let event_id = store.read_stream("orders")[0].id;
        assert_eq!(store.nacked("orders", "sub-a").len(), 3);
        assert_eq!(store.parked("orders", "sub-a"), vec![event_id]);
        assert!(store.acked("orders", "sub-a").is_empty());
        bus.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_json_persistent_delivery_is_acked_not_dispatched() {
        let store = store_client::InMemoryEventStore::new();
        let bus = bus(&store, &["persistent:orders/sub-a"]);
        let mut sub = bus.subscribe(EventFilter::all());
        bus.start().await.unwrap();

        let event_id = uuid::Uuid::new_v4();
        let raw = RecordedEvent {
            stream_id: "orders".into(),
            id: event_id,
            revision: 0,
            event_type: "OrderPlaced".into(),
            data: vec![0xde, 0xad],
            metadata: Vec::new(),
            is_json: false,
            created: chrono::Utc::now(),
        };
        store.inject("orders", ResolvedEvent::from_event(raw));
        settle().await;

        assert_eq!(store.acked("orders", "sub-a"), vec![event_id]);
        assert!(matches!(sub.try_recv(), Ok(None)));
        bus.shutdown().await;
    }
}
