//! Client behaviour against the mock transport
//!
//! Timing tests run on a paused Tokio clock, so backoff delays are exact and
//! the suite does not actually sleep.

mod common;

use async_trait::async_trait;
use common::{fail, mock_client, next_session, open, retry, wait_until, Recorded};
use dawn_ws::{
    ClientError, EventStrategy, HandshakeResponse, MockTransport, QueueCapacity, TransportError,
    WebSocketClient, WebSocketConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn assert_delay(start: Instant, opened_at: Instant, expected_ms: u64) {
    let elapsed = opened_at - start;
    let expected = Duration::from_millis(expected_ms);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(10),
        "expected reconnect after ~{:?}, got {:?}",
        expected,
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_fifo_delivery_while_connected() {
    let (client, transport, _strategy) = mock_client(WebSocketConfig::default());
    let session = next_session(&transport).await;
    open(&client, &session).await;

    let expected: Vec<String> = (0..100).map(|i| format!("m{i}")).collect();
    for message in &expected {
        client.send(message.as_str()).await.unwrap();
    }

    wait_until(|| transport.sent().len() == expected.len()).await;
    assert_eq!(transport.sent(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_messages_wait_for_open() {
    let (client, transport, _strategy) = mock_client(WebSocketConfig::default());
    let session = next_session(&transport).await;

    client.send("first").await.unwrap();
    client.send("second").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(transport.sent().is_empty(), "nothing is written before open");

    open(&client, &session).await;
    wait_until(|| transport.sent().len() == 2).await;
    assert_eq!(transport.sent(), vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn test_messages_queued_during_outage_follow_reconnect() {
    let (client, transport, strategy) = mock_client(retry(100, 3));
    let first = next_session(&transport).await;
    open(&client, &first).await;
    fail(&strategy, &first).await;

    for i in 0..3 {
        client.send(format!("queued-{i}")).await.unwrap();
    }

    let second = next_session(&transport).await;
    assert!(transport.sent().is_empty());

    open(&client, &second).await;
    wait_until(|| transport.sent().len() == 3).await;
    assert_eq!(transport.sent(), vec!["queued-0", "queued-1", "queued-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_growth() {
    let (client, transport, strategy) = mock_client(retry(1000, 3));
    let session = next_session(&transport).await;
    open(&client, &session).await;

    let mut session = session;
    for expected_ms in [1000, 2000, 4000] {
        let start = Instant::now();
        fail(&strategy, &session).await;
        session = next_session(&transport).await;
        assert_delay(start, session.opened_at, expected_ms);
    }

    assert_eq!(
        strategy.scheduled_delays(),
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling() {
    let (client, transport, strategy) = mock_client(retry(100, 3));
    let mut session = next_session(&transport).await;
    open(&client, &session).await;

    // Sustained failure: every reconnect attempt fails before opening
    for _ in 0..3 {
        fail(&strategy, &session).await;
        session = next_session(&transport).await;
    }
    fail(&strategy, &session).await;

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.attempts(), 4, "initial connect plus 3 retries");
    assert!(!client.is_connected());
    assert_eq!(client.state().retry_count, 3);
    assert_eq!(strategy.scheduled_delays().len(), 3);
    assert_eq!(strategy.events().last(), Some(&Recorded::RetriesExhausted(3)));
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_backoff() {
    let (client, transport, strategy) = mock_client(retry(100, 5));
    let first = next_session(&transport).await;
    open(&client, &first).await;

    let start = Instant::now();
    fail(&strategy, &first).await;
    let second = next_session(&transport).await;
    assert_delay(start, second.opened_at, 100);

    // Second failure without an open in between doubles the delay
    let start = Instant::now();
    fail(&strategy, &second).await;
    let third = next_session(&transport).await;
    assert_delay(start, third.opened_at, 200);

    open(&client, &third).await;
    assert_eq!(client.state().retry_count, 0);

    let start = Instant::now();
    fail(&strategy, &third).await;
    let fourth = next_session(&transport).await;
    assert_delay(start, fourth.opened_at, 100);
}

#[tokio::test(start_paused = true)]
async fn test_example_scenario() {
    let (client, transport, strategy) = mock_client(retry(100, 2));

    let first = next_session(&transport).await;
    open(&client, &first).await;

    let start = Instant::now();
    fail(&strategy, &first).await;
    let second = next_session(&transport).await;
    assert_delay(start, second.opened_at, 100);

    let start = Instant::now();
    fail(&strategy, &second).await;
    let third = next_session(&transport).await;
    assert_delay(start, third.opened_at, 200);

    fail(&strategy, &third).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.attempts(), 3);
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_fails_fast() {
    let (client, transport, strategy) = mock_client(WebSocketConfig::new().without_reconnect());
    let session = next_session(&transport).await;
    open(&client, &session).await;
    fail(&strategy, &session).await;

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.attempts(), 1);
    assert!(!client.is_connected());
    assert!(strategy.scheduled_delays().is_empty());
    assert_eq!(strategy.events().last(), Some(&Recorded::RetriesExhausted(0)));
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_does_not_reconnect() {
    let (client, transport, strategy) = mock_client(retry(100, 3));
    let session = next_session(&transport).await;
    open(&client, &session).await;

    assert!(session.closing(1000, "server shutdown"));
    wait_until(|| !client.is_connected()).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.attempts(), 1);
    assert_eq!(
        strategy.events(),
        vec![
            Recorded::Open(101),
            Recorded::Closing(1000, "server shutdown".into())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_is_final() {
    let (client, transport, _strategy) = mock_client(retry(100, 3));
    let session = next_session(&transport).await;
    open(&client, &session).await;

    client.send("a").await.unwrap();
    client.send("b").await.unwrap();
    client.close().await;

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(transport.sent().is_empty(), "no writes after close");
    assert_eq!(transport.attempts(), 1);
    assert_eq!(
        transport.close_requests(),
        vec![(1000, dawn_ws::CLOSE_REASON.to_string())]
    );

    // A failure arriving after close does not bring the client back
    session.fail(TransportError::ConnectionClosed);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempts(), 1);
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let (client, transport, strategy) = mock_client(retry(100, 3));
    let session = next_session(&transport).await;
    open(&client, &session).await;
    fail(&strategy, &session).await;

    client.close().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_after_close_is_rejected() {
    let (client, transport, _strategy) = mock_client(WebSocketConfig::default());
    let _session = next_session(&transport).await;
    client.close().await;

    assert!(matches!(client.send("late").await, Err(ClientError::Closed)));
    assert!(matches!(client.try_send("late"), Err(ClientError::Closed)));
    assert!(client.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_try_send_reports_full_queue() {
    let config = WebSocketConfig::new().with_queue_capacity(QueueCapacity::Bounded(1));
    let (client, transport, _strategy) = mock_client(config);
    let session = next_session(&transport).await;

    client.try_send("a").unwrap();
    let err = client.try_send("b").unwrap_err();
    assert!(matches!(err, ClientError::QueueFull));
    assert!(err.is_retryable());

    open(&client, &session).await;
    wait_until(|| transport.sent() == vec!["a"]).await;
}

#[tokio::test(start_paused = true)]
async fn test_bounded_send_waits_for_room() {
    let config = WebSocketConfig::new().with_queue_capacity(QueueCapacity::Bounded(1));
    let (client, transport, _strategy) = mock_client(config);
    let session = next_session(&transport).await;

    client.send("a").await.unwrap();
    // Let the sender loop take "a"; it holds it until the connection opens
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.send("b").await.unwrap();

    let producer = tokio::spawn({
        let client = client.clone();
        async move { client.send("c").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished(), "send waits while the queue is full");

    open(&client, &session).await;
    producer.await.unwrap().unwrap();
    wait_until(|| transport.sent().len() == 3).await;
    assert_eq!(transport.sent(), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_strategy_receives_messages_in_order() {
    let (client, transport, strategy) = mock_client(WebSocketConfig::default());
    let session = next_session(&transport).await;
    open(&client, &session).await;

    session.text("one");
    session.binary(vec![1, 2, 3]);
    session.text("two");
    wait_until(|| strategy.events().len() == 4).await;

    assert_eq!(
        strategy.events(),
        vec![
            Recorded::Open(101),
            Recorded::Message("one".into()),
            Recorded::Binary(vec![1, 2, 3]),
            Recorded::Message("two".into()),
        ]
    );
    // State is updated before the strategy runs
    assert_eq!(strategy.connected_during_open(), vec![true]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_is_not_replayed() {
    let (client, transport, strategy) = mock_client(retry(100, 3));
    let first = next_session(&transport).await;
    open(&client, &first).await;

    transport.set_fail_send(true);
    client.send("lost").await.unwrap();
    wait_until(|| strategy.failures() == 1).await;
    assert!(!client.is_connected());

    let second = next_session(&transport).await;
    transport.set_fail_send(false);
    open(&client, &second).await;
    client.send("next").await.unwrap();

    wait_until(|| !transport.sent().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.sent(), vec!["next"]);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_session_events_are_dropped() {
    let (client, transport, strategy) = mock_client(retry(100, 3));
    let first = next_session(&transport).await;
    open(&client, &first).await;
    fail(&strategy, &first).await;
    let second = next_session(&transport).await;

    assert!(!first.open(), "ended session cannot reopen");
    assert!(!first.text("ghost"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!client.is_connected());

    open(&client, &second).await;
    assert_eq!(second.session(), first.session() + 1);
}

struct PanickyStrategy {
    messages: Arc<AtomicUsize>,
}

#[async_trait]
impl EventStrategy for PanickyStrategy {
    async fn handle_open(&self, _client: &WebSocketClient, _response: &HandshakeResponse) {
        panic!("strategy bug");
    }

    async fn handle_message(&self, _client: &WebSocketClient, _text: &str) {
        self.messages.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_strategy_panic_is_contained() {
    let transport = MockTransport::new();
    let messages = Arc::new(AtomicUsize::new(0));
    let client = WebSocketClient::builder("ws://mock.test")
        .with_transport(transport.clone())
        .with_strategy(PanickyStrategy {
            messages: Arc::clone(&messages),
        })
        .connect()
        .unwrap();

    let session = next_session(&transport).await;
    open(&client, &session).await;

    // The dispatcher survived the panic and the connection is usable
    session.text("still alive");
    wait_until(|| messages.load(Ordering::SeqCst) == 1).await;

    client.send("hello").await.unwrap();
    wait_until(|| transport.sent() == vec!["hello"]).await;
    assert!(client.is_connected());
}

/// Queues a resend from inside `handle_failure` without blocking
struct ResendOnFailure {
    rejected: Arc<AtomicUsize>,
}

#[async_trait]
impl EventStrategy for ResendOnFailure {
    async fn handle_failure(
        &self,
        client: &WebSocketClient,
        _error: &TransportError,
        _response: Option<&HandshakeResponse>,
    ) {
        if let Err(ClientError::QueueFull) = client.try_send("resend") {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_handler_with_full_bounded_queue_does_not_stall_events() {
    let transport = MockTransport::new();
    let rejected = Arc::new(AtomicUsize::new(0));
    let client = WebSocketClient::builder("ws://mock.test")
        .with_config(retry(100, 3).with_queue_capacity(QueueCapacity::Bounded(1)))
        .with_transport(transport.clone())
        .with_strategy(ResendOnFailure {
            rejected: Arc::clone(&rejected),
        })
        .connect()
        .unwrap();
    let first = next_session(&transport).await;

    client.send("a").await.unwrap();
    // The sender loop holds "a" until an open; "b" fills the queue
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.send("b").await.unwrap();

    assert!(first.fail(TransportError::ConnectionClosed));
    wait_until(|| rejected.load(Ordering::SeqCst) == 1).await;

    // The dispatcher moved on: the reconnect's open is processed and drains the queue
    let second = next_session(&transport).await;
    open(&client, &second).await;
    wait_until(|| transport.sent().len() == 2).await;
    assert_eq!(transport.sent(), vec!["a", "b"]);
}

/// Replies to every text message through the client it is handed
struct EchoStrategy;

#[async_trait]
impl EventStrategy for EchoStrategy {
    async fn handle_message(&self, client: &WebSocketClient, text: &str) {
        let _ = client.send(format!("echo: {text}")).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_strategy_can_reply_through_client() {
    let transport = MockTransport::new();
    let client = WebSocketClient::builder("ws://mock.test")
        .with_transport(transport.clone())
        .with_strategy(EchoStrategy)
        .connect()
        .unwrap();

    let session = next_session(&transport).await;
    open(&client, &session).await;
    session.text("ping");

    wait_until(|| transport.sent() == vec!["echo: ping"]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_consistent_under_concurrent_sends() {
    let config = WebSocketConfig::new().with_retry(
        dawn_ws::ReconnectPolicy::new()
            .with_retry_interval(Duration::from_millis(1))
            .with_backoff_multiplier(1.0)
            .with_max_retries(1000),
    );
    let (client, transport, strategy) = mock_client(config);

    let producers: Vec<_> = (0..8)
        .map(|producer| {
            let client = client.clone();
            tokio::spawn(async move {
                for seq in 0..50 {
                    client.send(format!("{producer}:{seq}")).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..10 {
        let session = next_session(&transport).await;
        open(&client, &session).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        fail(&strategy, &session).await;
        assert!(!client.is_connected());
    }

    let last = next_session(&transport).await;
    open(&client, &last).await;
    for producer in producers {
        producer.await.unwrap();
    }

    // Let the queue drain: stop once the sent count is stable
    let mut seen = usize::MAX;
    while transport.sent().len() != seen {
        seen = transport.sent().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(client.is_connected(), "last delivered event was an open");
    assert_eq!(client.state().retry_count, 0);

    // Each producer's messages arrive in the order they were sent
    let mut last_seq: HashMap<u32, i64> = HashMap::new();
    for message in transport.sent() {
        let (producer, seq) = message.split_once(':').unwrap();
        let (producer, seq): (u32, i64) = (producer.parse().unwrap(), seq.parse().unwrap());
        let previous = last_seq.entry(producer).or_insert(-1);
        assert!(seq > *previous, "producer {producer} reordered: {seq} after {previous}");
        *previous = seq;
    }
    assert!(transport.sent().len() <= 400);

    fail(&strategy, &last).await;
    assert!(!client.is_connected(), "last delivered event was a failure");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_transport_writes_once_close_returns() {
    for _ in 0..20 {
        let (client, transport, _strategy) = mock_client(WebSocketConfig::default());
        let session = next_session(&transport).await;
        open(&client, &session).await;

        let producer = tokio::spawn({
            let client = client.clone();
            async move {
                for seq in 0..10_000 {
                    if client.send(format!("m{seq}")).await.is_err() {
                        break;
                    }
                }
            }
        });
        wait_until(|| !transport.sent().is_empty()).await;

        client.close().await;
        let written = transport.sent().len();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(transport.sent().len(), written, "write landed after close returned");
        producer.await.unwrap();
    }
}
