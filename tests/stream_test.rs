mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::{event, fetcher_for, InMemoryBackend};
use tailscope::logs::{StreamConfig, StreamCoordinator};

const NOW: i64 = 1_000_000;
const WAIT: Duration = Duration::from_secs(2);

fn config(poll_ms: u64, capacity: usize) -> StreamConfig {
    let mut config = StreamConfig::new("/ecs/api");
    config.poll_interval = Duration::from_millis(poll_ms);
    config.channel_capacity = capacity;
    config
}

#[tokio::test]
async fn test_stream_delivers_new_events_once() {
    // Purpose: the cursor moves past emitted events so later polls only see new ones
    let backend = Arc::new(InMemoryBackend::new(vec![event(20, "b"), event(10, "a")], 10));
    let coordinator = StreamCoordinator::new(fetcher_for(&backend), config(20, 16)).with_clock(|| NOW);
    let token = CancellationToken::new();
    let mut handles = coordinator.start(token.clone());

    let first = timeout(WAIT, handles.events.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, handles.events.recv()).await.unwrap().unwrap();
    assert_eq!((first.message.as_str(), second.message.as_str()), ("a", "b"));

    backend.push(event(30, "c"));
    let third = timeout(WAIT, handles.events.recv()).await.unwrap().unwrap();
    assert_eq!(third.message, "c");

    token.cancel();
    timeout(WAIT, handles.task).await.unwrap().unwrap();
    assert!(handles.events.recv().await.is_none());
    assert!(handles.errors.recv().await.is_none());

    let requests = backend.requests();
    assert!(requests.len() >= 2);
    assert_eq!(requests[0].start_time, None);
    assert_eq!(requests[0].end_time, Some(NOW));
    assert!(requests[1..].iter().all(|r| r.start_time.unwrap() > 20));
}

#[tokio::test]
async fn test_cancel_with_stalled_consumer_closes_channels() {
    // Purpose: cancellation must not depend on the consumer draining the channel
    let backend = Arc::new(InMemoryBackend::new((0..100).map(|i| event(i, "spam")).collect(), 50));
    let coordinator = StreamCoordinator::new(fetcher_for(&backend), config(10, 1)).with_clock(|| NOW);
    let token = CancellationToken::new();
    let mut handles = coordinator.start(token.clone());

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    timeout(WAIT, handles.task)
        .await
        .expect("stream task should stop after cancellation")
        .unwrap();

    let mut buffered = 0;
    while handles.events.recv().await.is_some() {
        buffered += 1;
    }
    assert!(buffered <= 1);
    assert!(handles.errors.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_interrupts_slow_fetch() {
    let backend = Arc::new(InMemoryBackend::new(vec![event(1, "never")], 10).with_delay(Duration::from_secs(30)));
    let coordinator = StreamCoordinator::new(fetcher_for(&backend), config(10, 4)).with_clock(|| NOW);
    let token = CancellationToken::new();
    let mut handles = coordinator.start(token.clone());

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    timeout(WAIT, handles.task).await.unwrap().unwrap();
    assert!(handles.events.recv().await.is_none());
}

#[tokio::test]
async fn test_fetch_failure_reports_one_error_and_stops() {
    let backend = Arc::new(InMemoryBackend::new(vec![event(1, "ok")], 10));
    backend.fail_from_request(2);
    let coordinator = StreamCoordinator::new(fetcher_for(&backend), config(10, 4)).with_clock(|| NOW);
    let token = CancellationToken::new();
    let mut handles = coordinator.start(token.clone());

    let error = timeout(WAIT, handles.errors.recv()).await.unwrap();
    assert!(error.is_some());
    timeout(WAIT, handles.task).await.unwrap().unwrap();

    let delivered = handles.events.recv().await.map(|e| e.message);
    assert_eq!(delivered.as_deref(), Some("ok"));
    assert!(handles.events.recv().await.is_none());
    assert!(handles.errors.recv().await.is_none());

    // No retry after the failure
    assert_eq!(backend.requests().len(), 2);
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn test_stream_with_fixed_end_stops_cleanly() {
    let backend = Arc::new(InMemoryBackend::new(vec![event(10, "a"), event(5_000, "last"), event(6_000, "late")], 10));
    let mut config = config(5, 16);
    config.end_time = Some(5_000);
    let coordinator = StreamCoordinator::new(fetcher_for(&backend), config).with_clock(|| NOW);
    let mut handles = coordinator.start(CancellationToken::new());

    timeout(WAIT, handles.task)
        .await
        .expect("stream should stop once the cursor reaches the end time")
        .unwrap();

    let mut delivered = Vec::new();
    while let Some(event) = handles.events.recv().await {
        delivered.push(event.message);
    }
    assert_eq!(delivered, vec!["a", "last"]);
    assert!(handles.errors.recv().await.is_none());

    // No request ever asked for an inverted range
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests
        .iter()
        .all(|r| r.start_time.unwrap_or(i64::MIN) <= r.end_time.unwrap_or(i64::MAX)));
}
