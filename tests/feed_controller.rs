//! Integration tests for the feed controller driven by a scripted source.
//!
//! Every test gets its own source and controller. Tests that depend on the
//! search quiet period run with paused Tokio time.

mod common;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use common::{record, records, Call, MockSource};
use veritas::api::ApiError;
use veritas::feed::{FeedController, FeedError, FeedOptions, FeedSnapshot, Phase};

fn controller(source: &Arc<MockSource>) -> FeedController {
    FeedController::new(source.clone(), FeedOptions::default())
}

async fn settle(rx: &mut watch::Receiver<FeedSnapshot>) -> FeedSnapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.is_busy()))
        .await
        .expect("feed did not settle")
        .expect("controller dropped")
        .clone()
}

fn ids(snapshot: &FeedSnapshot) -> Vec<String> {
    snapshot.items.iter().map(|a| a.id.clone()).collect()
}

// ============================================================================
// Initial Load
// ============================================================================

#[tokio::test]
async fn test_initial_load_populates_items() {
    let source = MockSource::with_feed(records(0, 25));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    assert!(feed.load_initial());
    assert_eq!(feed.phase(), Phase::LoadingInitial);
    let snapshot = settle(&mut rx).await;

    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.items.len(), 20);
    assert!(snapshot.has_more);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.items[0].title, "Article 0");
}

#[tokio::test]
async fn test_initial_load_is_idempotent() {
    let source = MockSource::with_feed(records(0, 25));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    assert!(feed.load_initial());
    assert!(!feed.load_initial(), "second call while loading must be a no-op");
    settle(&mut rx).await;
    assert!(!feed.load_initial(), "call after success must be a no-op");

    assert_eq!(source.calls(), vec![Call::Recent(20)]);
}

#[tokio::test]
async fn test_initial_load_dedups_by_id() {
    let source = MockSource::with_feed(vec![
        record("a", "First"),
        record("b", "B"),
        record("a", "Again"),
    ]);
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    let snapshot = settle(&mut rx).await;

    assert_eq!(ids(&snapshot), vec!["a", "b"]);
}

#[tokio::test]
async fn test_initial_failure_sets_error_and_allows_retry() {
    let source = MockSource::with_feed(records(0, 5));
    source.push_failure(ApiError::HttpStatus(503));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    let snapshot = settle(&mut rx).await;
    assert_eq!(snapshot.phase, Phase::Error);
    assert!(matches!(snapshot.error, Some(FeedError::Network(_))));
    assert!(snapshot.items.is_empty());

    // Nothing succeeded yet, so a second initial load goes out.
    assert!(feed.load_initial());
    let snapshot = settle(&mut rx).await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.items.len(), 5);
    assert!(!snapshot.has_more);
}

#[tokio::test]
async fn test_source_cancellation_is_not_an_error() {
    let source = MockSource::with_feed(records(0, 5));
    source.push_failure(ApiError::Cancelled);
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    let snapshot = settle(&mut rx).await;

    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.error.is_none());
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_pagination_terminates_on_short_page() {
    let source = MockSource::with_feed(records(0, 47));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;
    assert!(feed.load_more());
    settle(&mut rx).await;
    assert!(feed.load_more());
    let snapshot = settle(&mut rx).await;

    assert_eq!(snapshot.items.len(), 47);
    assert!(!snapshot.has_more);
    assert!(!feed.load_more(), "exhausted feed must not fetch again");
    assert_eq!(
        source.calls(),
        vec![Call::Recent(20), Call::Range(20, 40), Call::Range(40, 60)]
    );

    let expected: Vec<String> = (0..47).map(|i| format!("a{i}")).collect();
    assert_eq!(ids(&snapshot), expected);
}

#[tokio::test]
async fn test_load_more_on_fresh_controller_pages_from_zero() {
    let source = MockSource::with_feed(records(0, 47));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    for _ in 0..3 {
        assert!(feed.load_more());
        settle(&mut rx).await;
    }

    let snapshot = feed.snapshot();
    assert_eq!(snapshot.items.len(), 47);
    assert!(!snapshot.has_more);
    assert_eq!(
        source.calls(),
        vec![Call::Range(0, 20), Call::Range(20, 40), Call::Range(40, 60)]
    );
}

#[tokio::test]
async fn test_exact_multiple_needs_one_empty_page() {
    let source = MockSource::with_feed(records(0, 20));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    assert!(settle(&mut rx).await.has_more);
    feed.load_more();
    let snapshot = settle(&mut rx).await;

    assert_eq!(snapshot.items.len(), 20);
    assert!(!snapshot.has_more);
}

#[tokio::test]
async fn test_load_more_while_loading_more_is_noop() {
    let source = MockSource::with_feed(records(0, 60));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    let gate = source.gate();
    assert!(feed.load_more());
    assert!(feed.snapshot().loading_more);
    assert!(!feed.load_more());

    gate.send(Ok(records(20, 40))).unwrap();
    let snapshot = settle(&mut rx).await;
    assert_eq!(snapshot.items.len(), 40);
    assert_eq!(source.calls().len(), 2);
}

#[tokio::test]
async fn test_load_more_blocked_during_initial_load() {
    let source = MockSource::with_feed(records(0, 60));
    let gate = source.gate();
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    assert!(!feed.load_more());

    gate.send(Ok(records(0, 20))).unwrap();
    settle(&mut rx).await;
    assert!(feed.load_more());
}

#[tokio::test]
async fn test_load_more_failure_is_swallowed() {
    let source = MockSource::with_feed(records(0, 47));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    source.push_failure(ApiError::Timeout);
    assert!(feed.load_more());
    let snapshot = settle(&mut rx).await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.error.is_none());
    assert!(!snapshot.loading_more);
    assert!(snapshot.has_more);
    assert_eq!(snapshot.items.len(), 20);

    // The same page is requested again.
    assert!(feed.load_more());
    let snapshot = settle(&mut rx).await;
    assert_eq!(snapshot.items.len(), 40);
    assert_eq!(
        source.calls()[1..].to_vec(),
        vec![Call::Range(20, 40), Call::Range(20, 40)]
    );
}

#[tokio::test]
async fn test_load_more_replaces_known_ids_in_place() {
    let source = MockSource::with_feed(records(0, 20));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    let mut next = records(20, 39);
    next.push(record("a3", "Article 3 (updated)"));
    source.push_reply(common::Reply::Records(next));
    feed.load_more();
    let snapshot = settle(&mut rx).await;

    assert_eq!(snapshot.items.len(), 39);
    assert_eq!(snapshot.items[3].title, "Article 3 (updated)");
    assert!(snapshot.has_more, "20 raw records count as a full page");
}

#[tokio::test]
async fn test_dropped_records_still_count_towards_full_page() {
    let mut page: Vec<Value> = records(0, 17);
    page.push(Value::Null);
    page.push(Value::Null);
    page.push(json!({ "id": "broken" }));
    let source = MockSource::with_feed(records(0, 60));
    source.push_reply(common::Reply::Records(page));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    let snapshot = settle(&mut rx).await;
    assert_eq!(snapshot.items.len(), 17);
    assert!(snapshot.has_more);

    // Next page starts at the number of articles held.
    feed.load_more();
    let snapshot = settle(&mut rx).await;
    assert_eq!(source.calls()[1], Call::Range(17, 37));
    assert_eq!(snapshot.items.len(), 37);
}

#[tokio::test]
async fn test_unparseable_date_falls_back_to_now() {
    let mut bad = record("d1", "Dated");
    bad["publishedAt"] = json!("not a date");
    let source = MockSource::with_feed(vec![bad, record("d2", "Fine")]);
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    let before = Utc::now();
    feed.load_initial();
    let snapshot = settle(&mut rx).await;
    let after = Utc::now();

    assert_eq!(snapshot.items.len(), 2);
    let fallback = snapshot.items[0].published_at;
    assert!(fallback >= before && fallback <= after);
    assert_eq!(snapshot.items[1].published_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_supersedes_pending_initial_load() {
    let source = MockSource::with_feed(records(0, 20));
    let stale_gate = source.gate();
    let feed = controller(&source);

    feed.load_initial();
    source.wait_for_calls(1).await;

    source.set_feed(records(100, 110));
    feed.refresh().await.unwrap();
    // Late completion of the superseded fetch.
    let _ = stale_gate.send(Ok(records(0, 20)));
    tokio::task::yield_now().await;

    let snapshot = feed.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.items.len(), 10);
    assert_eq!(snapshot.items[0].id, "a100");
}

#[tokio::test]
async fn test_refresh_cancels_load_more() {
    let source = MockSource::with_feed(records(0, 60));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    let stale_gate = source.gate();
    feed.load_more();
    source.wait_for_calls(2).await;

    feed.refresh().await.unwrap();
    let _ = stale_gate.send(Ok(records(20, 40)));
    tokio::task::yield_now().await;

    let snapshot = feed.snapshot();
    assert!(!snapshot.loading_more);
    assert_eq!(snapshot.items.len(), 20);
    assert!(feed.load_more(), "pagination resumes after refresh");
}

#[tokio::test]
async fn test_load_more_blocked_during_refresh() {
    let source = MockSource::with_feed(records(0, 60));
    let feed = Arc::new(controller(&source));
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    let gate = source.gate();
    let pending = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.refresh().await })
    };
    source.wait_for_calls(2).await;

    assert_eq!(feed.phase(), Phase::Refreshing);
    assert!(!feed.load_more());

    gate.send(Ok(records(0, 20))).unwrap();
    assert_eq!(pending.await.unwrap(), Ok(()));
    assert_eq!(source.calls(), vec![Call::Recent(20), Call::Recent(20)]);
    assert!(feed.load_more());
}

#[tokio::test]
async fn test_refresh_failure_keeps_items() {
    let source = MockSource::with_feed(records(0, 30));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    source.push_failure(ApiError::Graphql("backend down".to_string()));
    let err = feed.refresh().await.unwrap_err();
    assert_eq!(err, FeedError::Network("GraphQL error: backend down".to_string()));

    let snapshot = feed.snapshot();
    assert_eq!(snapshot.phase, Phase::Error);
    assert_eq!(feed.error(), Some(err.clone()));
    assert_eq!(snapshot.error, Some(err));
    assert_eq!(feed.items().len(), 20);
    assert!(!feed.load_more(), "no pagination from the error phase");

    feed.refresh().await.unwrap();
    let snapshot = feed.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_superseded_refresh_returns_ok() {
    let source = MockSource::with_feed(records(0, 5));
    let _gate = source.gate();
    let feed = Arc::new(controller(&source));

    let first = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.refresh().await })
    };
    source.wait_for_calls(1).await;

    feed.refresh().await.unwrap();
    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(feed.snapshot().items.len(), 5);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_search_filters_after_quiet_period() {
    let source = MockSource::with_feed(vec![record("1", "Alpha"), record("2", "Beta")]);
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    feed.set_search_term("alp");
    let snapshot = feed.snapshot();
    assert_eq!(snapshot.raw_query, "alp");
    assert_eq!(snapshot.visible_items().len(), 2, "filter waits for the quiet period");

    tokio::time::sleep(Duration::from_millis(301)).await;
    let visible = feed.visible_items();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].title, "Alpha");

    feed.set_search_term("");
    tokio::time::sleep(Duration::from_millis(301)).await;
    assert_eq!(feed.visible_items().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_search_debounce_applies_only_last_term() {
    let source = MockSource::with_feed(Vec::new());
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    let seen = tokio::spawn(async move {
        let mut applied = Vec::new();
        let mut last = String::new();
        while rx.changed().await.is_ok() {
            let current = rx.borrow_and_update().debounced_query.clone();
            if current != last {
                applied.push(current.clone());
                last = current;
            }
        }
        applied
    });

    feed.set_search_term("a");
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed.set_search_term("al");
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed.set_search_term("alp");

    tokio::time::sleep(Duration::from_millis(299)).await;
    assert_eq!(feed.snapshot().debounced_query, "");
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(feed.snapshot().debounced_query, "alp");

    drop(feed);
    assert_eq!(seen.await.unwrap(), vec!["alp".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_active_search_blocks_load_more() {
    let source = MockSource::with_feed(records(0, 60));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    feed.set_search_term("article 1");
    tokio::time::sleep(Duration::from_millis(301)).await;
    assert!(!feed.load_more());

    feed.set_search_term("   ");
    tokio::time::sleep(Duration::from_millis(301)).await;
    assert!(feed.load_more());
}

#[tokio::test(start_paused = true)]
async fn test_search_does_not_cancel_load_more() {
    let source = MockSource::with_feed(records(0, 60));
    let feed = controller(&source);
    let mut rx = feed.subscribe();

    feed.load_initial();
    settle(&mut rx).await;

    let gate = source.gate();
    feed.load_more();
    feed.set_search_term("article");
    tokio::time::sleep(Duration::from_millis(301)).await;

    gate.send(Ok(records(20, 40))).unwrap();
    let snapshot = settle(&mut rx).await;
    assert_eq!(snapshot.items.len(), 40);
    assert_eq!(snapshot.visible_items().len(), 40);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_drop_makes_late_completion_a_noop() {
    let source = MockSource::with_feed(records(0, 5));
    let gate = source.gate();
    let feed = controller(&source);
    let rx = feed.subscribe();

    feed.load_initial();
    source.wait_for_calls(1).await;
    drop(feed);

    let _ = gate.send(Ok(records(0, 5)));
    tokio::task::yield_now().await;

    let last = rx.borrow().clone();
    assert_eq!(last.phase, Phase::Idle);
    assert!(last.items.is_empty());
}

#[tokio::test]
async fn test_shutdown_resolves_pending_refresh() {
    let source = MockSource::with_feed(records(0, 5));
    let _gate = source.gate();
    let feed = Arc::new(controller(&source));

    let pending = {
        let feed = feed.clone();
        tokio::spawn(async move { feed.refresh().await })
    };
    source.wait_for_calls(1).await;
    feed.shutdown();

    assert_eq!(pending.await.unwrap(), Ok(()));
    let snapshot = feed.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(!snapshot.is_busy());
}
