//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the catalog API and run the
//! full harvest cycle end-to-end against temporary output files.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::Config;
use sumi_harvest::harvester::HarvestScheduler;
use sumi_harvest::shutdown::ShutdownCoordinator;
use sumi_harvest::state::DrainReason;
use sumi_harvest::storage::{CheckpointStore, FileCheckpointStore};
use sumi_harvest::{HarvestError, HarvestReport};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `available` reviews in pages, honoring `num_per_page` and `cursor`
struct ReviewResponder {
    appid: u64,
    available: usize,
}

impl Respond for ReviewResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut per_page = 20;
        let mut offset = 0;
        for (key, value) in request.url.query_pairs() {
            match key.as_ref() {
                "num_per_page" => per_page = value.parse().unwrap_or(20),
                "cursor" => offset = value.trim_start_matches('o').parse().unwrap_or(0),
                _ => {}
            }
        }

        let end = (offset + per_page).min(self.available);
        let reviews: Vec<Value> = (offset..end)
            .map(|n| json!({"recommendationid": format!("{}-{}", self.appid, n), "review": "ok"}))
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "success": 1,
            "reviews": reviews,
            "cursor": format!("o{}", end),
        }))
    }
}

/// Creates a test configuration pointed at the mock catalog
fn create_test_config(base_url: &str, dir: &Path) -> Config {
    let mut config = Config::default();

    config.catalog.list_url = format!("{}/listing", base_url);
    config.catalog.details_url = format!("{}/api/appdetails?appids={{appid}}", base_url);
    config.catalog.reviews_url = format!("{}/appreviews/{{appid}}", base_url);

    config.network.max_attempts = 2;
    config.network.backoff_base_ms = 1;
    config.network.backoff_max_ms = 5;
    config.network.request_timeout_secs = 5;
    config.network.connect_timeout_secs = 2;
    config.network.review_page_delay_ms = 0;
    config.network.transport_rotations = 2;

    config.harvest.max_games = 2;
    config.harvest.max_reviews_per_game = 3;
    config.harvest.workers = 1;
    config.harvest.checkpoint_interval = 2;

    config.output.games_path = dir.join("games.jsonl");
    config.output.reviews_path = dir.join("reviews.jsonl");
    config.output.checkpoint_path = dir.join("cursor.json");

    config
}

async fn mount_listing(server: &MockServer, ids: &[u64], expected_fetches: u64) {
    let apps: Vec<Value> = ids
        .iter()
        .map(|id| json!({"appid": id, "name": format!("app {}", id)}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"applist": {"apps": apps}})))
        .expect(expected_fetches)
        .mount(server)
        .await;
}

fn detail_body(id: u64, valid: bool) -> Value {
    let data = if valid {
        json!({"type": "game", "name": format!("Game {}", id), "categories": [{"id": 2}]})
    } else {
        json!({"type": "dlc", "name": format!("DLC {}", id)})
    };
    let mut envelope = serde_json::Map::new();
    envelope.insert(id.to_string(), json!({"success": true, "data": data}));
    Value::Object(envelope)
}

/// Mounts a detail document; `expected` bounds how often it may be fetched
async fn mount_detail(server: &MockServer, id: u64, valid: bool, expected: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .and(query_param("appids", id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(detail_body(id, valid)));
    let mock = match expected {
        Some(n) => mock.expect(n),
        None => mock,
    };
    mock.mount(server).await;
}

async fn mount_reviews(server: &MockServer, id: u64, available: usize) {
    Mock::given(method("GET"))
        .and(path(format!("/appreviews/{}", id)))
        .respond_with(ReviewResponder {
            appid: id,
            available,
        })
        .mount(server)
        .await;
}

async fn run(config: Config, reset: bool) -> Result<HarvestReport, HarvestError> {
    HarvestScheduler::new(config, reset, ShutdownCoordinator::shared())?
        .run()
        .await
}

fn read_records(path: &Path) -> Vec<Value> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("every line is one JSON record"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn appids(records: &[Value]) -> Vec<u64> {
    records
        .iter()
        .map(|r| r["appid"].as_u64().expect("record has appid"))
        .collect()
}

#[tokio::test]
async fn test_stops_at_exact_quota_in_listing_order() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2, 3, 4, 5], 1).await;
    mount_detail(&server, 1, false, Some(1)).await;
    mount_detail(&server, 2, true, Some(1)).await;
    mount_detail(&server, 3, false, Some(1)).await;
    mount_detail(&server, 4, true, Some(1)).await;
    // The quota is met before candidate 5 is reached
    mount_detail(&server, 5, true, Some(0)).await;
    mount_reviews(&server, 2, 5).await;
    mount_reviews(&server, 4, 5).await;

    let config = create_test_config(&server.uri(), dir.path());
    let report = run(config.clone(), false).await.unwrap();

    assert_eq!(report.drain_reason, DrainReason::QuotaReached);
    assert_eq!(report.games_written, 2);
    assert_eq!(report.rejected, 2);

    let games = read_records(&config.output.games_path);
    assert_eq!(appids(&games), vec![2, 4]);

    let cursor = FileCheckpointStore::new(&config.output.checkpoint_path)
        .load()
        .unwrap();
    assert_eq!(cursor.valid_count, 2);
    assert_eq!(cursor.last_enumerator_index, 4);
    assert!(cursor.is_processed(1) && cursor.is_processed(3));
}

#[tokio::test]
async fn test_concurrent_workers_never_exceed_quota() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let ids: Vec<u64> = (1..=40).collect();
    mount_listing(&server, &ids, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .respond_with(move |request: &Request| {
            let id: u64 = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "appids")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(0);
            ResponseTemplate::new(200)
                .set_body_json(detail_body(id, true))
                .set_delay(Duration::from_millis(20))
        })
        .mount(&server)
        .await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 5;
    config.harvest.workers = 8;
    config.harvest.max_reviews_per_game = 0;

    let report = run(config.clone(), false).await.unwrap();

    let games = read_records(&config.output.games_path);
    let distinct: BTreeSet<u64> = appids(&games).into_iter().collect();
    assert_eq!(games.len(), 5);
    assert_eq!(distinct.len(), 5);
    assert_eq!(report.valid_total, 5);
    assert_eq!(report.games_written, 5);
    assert_eq!(report.drain_reason, DrainReason::QuotaReached);

    let cursor = FileCheckpointStore::new(&config.output.checkpoint_path)
        .load()
        .unwrap();
    assert_eq!(cursor.valid_count, 5);
}

#[tokio::test]
async fn test_rerun_after_completion_is_idempotent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // One listing fetch and one detail fetch per candidate across both runs
    mount_listing(&server, &[1, 2, 3], 1).await;
    mount_detail(&server, 1, true, Some(1)).await;
    mount_detail(&server, 2, true, Some(1)).await;
    mount_detail(&server, 3, true, Some(0)).await;
    mount_reviews(&server, 1, 2).await;
    mount_reviews(&server, 2, 2).await;

    let config = create_test_config(&server.uri(), dir.path());
    run(config.clone(), false).await.unwrap();
    let second = run(config.clone(), false).await.unwrap();

    assert_eq!(second.games_written, 0);
    assert_eq!(second.valid_total, 2);
    assert_eq!(second.drain_reason, DrainReason::QuotaReached);
    assert_eq!(read_records(&config.output.games_path).len(), 2);
    assert_eq!(read_records(&config.output.reviews_path).len(), 4);
}

#[tokio::test]
async fn test_resume_never_refetches_processed_candidates() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2, 3, 4, 5, 6], 1).await;
    mount_detail(&server, 1, false, Some(1)).await;
    mount_detail(&server, 2, false, Some(1)).await;
    mount_detail(&server, 3, true, Some(1)).await;
    mount_detail(&server, 4, false, Some(1)).await;
    mount_detail(&server, 5, true, Some(1)).await;
    mount_detail(&server, 6, true, Some(0)).await;
    mount_reviews(&server, 3, 1).await;
    mount_reviews(&server, 5, 1).await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 1;
    let first = run(config.clone(), false).await.unwrap();
    assert_eq!(first.games_written, 1);

    // A larger quota on the next run picks up where the first stopped
    config.harvest.max_games = 2;
    let second = run(config.clone(), false).await.unwrap();

    assert_eq!(second.games_written, 1);
    assert_eq!(second.valid_total, 2);
    assert_eq!(appids(&read_records(&config.output.games_path)), vec![3, 5]);
}

#[tokio::test]
async fn test_game_written_before_crash_is_not_duplicated() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2, 3], 1).await;
    // Candidate 1 reached the games stream but never the checkpoint
    mount_detail(&server, 1, true, Some(0)).await;
    mount_detail(&server, 2, false, Some(1)).await;
    mount_detail(&server, 3, true, Some(1)).await;
    mount_reviews(&server, 3, 0).await;

    let config = create_test_config(&server.uri(), dir.path());
    std::fs::write(
        &config.output.games_path,
        "{\"appid\":1,\"name\":\"Game 1\",\"type\":\"game\"}\n",
    )
    .unwrap();

    let report = run(config.clone(), false).await.unwrap();

    assert_eq!(report.valid_total, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(appids(&read_records(&config.output.games_path)), vec![1, 3]);
}

#[tokio::test]
async fn test_dead_proxy_falls_back_to_direct() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1], 1).await;
    mount_detail(&server, 1, true, Some(1)).await;
    mount_reviews(&server, 1, 2).await;

    // Nothing listens on port 1
    let proxies = dir.path().join("proxies.txt");
    std::fs::write(&proxies, "127.0.0.1:1\n").unwrap();

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 1;
    config.proxy.list_path = Some(proxies);
    config.proxy.failure_threshold = 1;
    config.network.max_attempts = 1;

    let report = run(config.clone(), false).await.unwrap();

    assert_eq!(report.games_written, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(appids(&read_records(&config.output.games_path)), vec![1]);
}

#[tokio::test]
async fn test_review_cap_is_exact() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[7, 8], 1).await;
    mount_detail(&server, 7, true, None).await;
    mount_detail(&server, 8, true, None).await;
    mount_reviews(&server, 7, 50).await;
    mount_reviews(&server, 8, 4).await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_reviews_per_game = 10;

    run(config.clone(), false).await.unwrap();

    let reviews = read_records(&config.output.reviews_path);
    let for_seven = reviews.iter().filter(|r| r["appid"] == 7).count();
    let for_eight = reviews.iter().filter(|r| r["appid"] == 8).count();
    assert_eq!(for_seven, 10);
    assert_eq!(for_eight, 4);
}

#[tokio::test]
async fn test_reviews_follow_cursor_across_pages() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[9], 1).await;
    mount_detail(&server, 9, true, None).await;
    mount_reviews(&server, 9, 120).await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 1;
    config.harvest.max_reviews_per_game = 150;

    run(config.clone(), false).await.unwrap();

    let reviews = read_records(&config.output.reviews_path);
    assert_eq!(reviews.len(), 120);
    let distinct: BTreeSet<&str> = reviews
        .iter()
        .filter_map(|r| r["recommendationid"].as_str())
        .collect();
    assert_eq!(distinct.len(), 120);
}

#[tokio::test]
async fn test_rate_limited_candidate_fails_after_bounded_attempts() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2], 1).await;
    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .and(query_param("appids", "1"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;
    mount_detail(&server, 2, true, Some(1)).await;
    mount_reviews(&server, 2, 1).await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 1;
    config.network.max_attempts = 3;
    config.network.transport_rotations = 1;

    let report = run(config.clone(), false).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.games_written, 1);

    let cursor = FileCheckpointStore::new(&config.output.checkpoint_path)
        .load()
        .unwrap();
    assert!(cursor.failed_ids.contains(&1));
    assert!(cursor.is_processed(1));
}

#[tokio::test]
async fn test_reset_archives_and_starts_over() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2], 2).await;
    mount_detail(&server, 1, true, Some(2)).await;
    mount_detail(&server, 2, false, None).await;
    mount_reviews(&server, 1, 1).await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 1;

    run(config.clone(), false).await.unwrap();
    let report = run(config.clone(), true).await.unwrap();

    assert_eq!(report.games_written, 1);
    assert_eq!(appids(&read_records(&config.output.games_path)), vec![1]);

    let archived = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".reset"))
        .count();
    assert!(archived >= 3, "checkpoint, snapshot and streams are archived");
}

#[tokio::test]
async fn test_interrupt_before_first_claim_fetches_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2], 1).await;
    mount_detail(&server, 1, true, Some(0)).await;
    mount_detail(&server, 2, true, Some(0)).await;

    let config = create_test_config(&server.uri(), dir.path());
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let report = HarvestScheduler::new(config.clone(), false, shutdown)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.drain_reason, DrainReason::Interrupted);
    assert_eq!(report.examined, 0);
    assert!(config.output.checkpoint_path.exists());
}

#[tokio::test]
async fn test_interrupt_drains_in_flight_items() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2, 3, 4, 5, 6], 1).await;
    for id in [1u64, 2] {
        Mock::given(method("GET"))
            .and(path("/api/appdetails"))
            .and(query_param("appids", id.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(detail_body(id, true))
                    .set_delay(Duration::from_millis(600)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    // Nothing is claimed once the interrupt arrives
    for id in 3..=6 {
        mount_detail(&server, id, true, Some(0)).await;
    }

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 10;
    config.harvest.workers = 2;
    config.harvest.max_reviews_per_game = 0;
    config.harvest.checkpoint_interval = 25;
    let checkpoint_path = config.output.checkpoint_path.clone();

    let shutdown = ShutdownCoordinator::shared();
    let scheduler = HarvestScheduler::new(config.clone(), false, Arc::clone(&shutdown)).unwrap();

    let interrupter = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.request_shutdown();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Both detail fetches are still outstanding here
        let saved = checkpoint_path.exists();
        let cursor = FileCheckpointStore::new(&checkpoint_path).load().unwrap();
        (saved, cursor)
    };
    let (result, (saved_on_interrupt, early)) = tokio::join!(scheduler.run(), interrupter);
    let report = result.unwrap();

    assert!(saved_on_interrupt, "checkpoint written before in-flight items finished");
    assert!(!early.is_processed(1) && !early.is_processed(2));

    assert_eq!(report.drain_reason, DrainReason::Interrupted);
    assert_eq!(report.games_written, 2);
    assert_eq!(report.examined, 2);
    assert_eq!(appids(&read_records(&config.output.games_path)), vec![1, 2]);

    let cursor = FileCheckpointStore::new(&checkpoint_path).load().unwrap();
    assert!(cursor.is_processed(1) && cursor.is_processed(2));
    assert_eq!(cursor.valid_count, 2);
    assert_eq!(cursor.last_enumerator_index, 2);
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path());
    let result = run(config, false).await;

    assert!(matches!(result, Err(HarvestError::Listing(_))));
}

#[tokio::test]
async fn test_exhausted_listing_stops_below_quota() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, &[1, 2], 1).await;
    mount_detail(&server, 1, false, Some(1)).await;
    mount_detail(&server, 2, true, Some(1)).await;
    mount_reviews(&server, 2, 0).await;

    let mut config = create_test_config(&server.uri(), dir.path());
    config.harvest.max_games = 10;

    let report = run(config, false).await.unwrap();

    assert_eq!(report.drain_reason, DrainReason::Exhausted);
    assert_eq!(report.valid_total, 1);
    assert!(!report.quota_met());
}
