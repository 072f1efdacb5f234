//! End-to-end scenarios through the worker's public surface.

use std::sync::Arc;
use std::time::Duration;

use devflow_common::{Clock, ManualClock};
use devflow_net::{Request, ScriptedFetcher};
use devflow_sw::annotate;
use devflow_sw::{
    CacheStorage, FetchOutcome, OfflineResponder, ServiceWorker, ServiceWorkerError,
    WorkerConfig, WorkerState,
};
use url::Url;

const ORIGIN: &str = "https://devflow.example/";

const ASSETS: [&str; 9] = [
    "/",
    "/index.html",
    "/manifest.json",
    "/assets/css/main.css",
    "/assets/js/real-data.js",
    "/assets/js/database.js",
    "/assets/js/auth.js",
    "/assets/js/app.js",
    "/assets/images/favicon.svg",
];

fn config() -> WorkerConfig {
    WorkerConfig::default()
        .with_origin(Url::parse(ORIGIN).unwrap())
        .with_static_assets(ASSETS)
}

fn asset_url(path: &str) -> String {
    Url::parse(ORIGIN).unwrap().join(path).unwrap().to_string()
}

fn serve_assets(fetcher: &ScriptedFetcher) {
    for path in ASSETS {
        fetcher.respond(&asset_url(path), 200, format!("asset {path}"));
    }
}

fn get(url: &str) -> Request {
    Request::parse_get(url).unwrap()
}

fn respond(outcome: FetchOutcome) -> devflow_net::Response {
    match outcome {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough(request) => panic!("{} was not intercepted", request.url),
    }
}

async fn installed_worker(fetcher: Arc<ScriptedFetcher>, clock: Arc<ManualClock>) -> ServiceWorker {
    serve_assets(&fetcher);
    let worker = ServiceWorker::with_clock(config(), CacheStorage::new(), fetcher, clock).unwrap();
    worker.install().await.unwrap();
    assert_eq!(worker.state().await, WorkerState::Activated);
    worker
}

#[tokio::test]
async fn index_with_no_network_and_no_cache_gets_offline_page() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let worker = installed_worker(fetcher.clone(), Arc::new(ManualClock::starting_now())).await;
    worker
        .storage()
        .write()
        .await
        .delete(&worker.config().static_cache_name());
    fetcher.set_online(false);

    let response = respond(worker.handle_fetch(get("https://devflow.example/index.html")).await);

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.content_type().unwrap().essence_str(), "text/html");
    assert!(response.text().unwrap().contains("You're Offline"));
}

#[tokio::test]
async fn api_entry_captured_twenty_minutes_ago_is_not_served() {
    let clock = Arc::new(ManualClock::starting_now());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond("https://api.github.com/user", 200, r#"{"login":"octocat"}"#);
    let worker = installed_worker(fetcher.clone(), clock.clone()).await;

    respond(worker.handle_fetch(get("https://api.github.com/user")).await);
    fetcher.set_online(false);
    clock.advance(Duration::from_secs(20 * 60));

    let response = respond(worker.handle_fetch(get("https://api.github.com/user")).await);

    assert_eq!(response.status.as_u16(), 503);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["offline"], true);
    assert_eq!(body["cached_data_available"], false);
}

#[tokio::test]
async fn api_entry_inside_window_is_served_marked() {
    let clock = Arc::new(ManualClock::starting_now());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond("https://api.github.com/user/repos", 200, "[]");
    let worker = installed_worker(fetcher.clone(), clock.clone()).await;

    let live = respond(worker.handle_fetch(get("https://api.github.com/user/repos")).await);
    assert_eq!(live.text().unwrap(), "[]");

    let stored = worker
        .storage()
        .read()
        .await
        .match_in(
            &worker.config().api_cache_name(),
            &get("https://api.github.com/user/repos"),
        )
        .unwrap();
    let captured = annotate::capture_time(&stored).unwrap();
    assert!((clock.now_millis() - captured).abs() <= 1_000);

    fetcher.set_online(false);
    clock.advance(Duration::from_secs(10 * 60));
    let cached = respond(worker.handle_fetch(get("https://api.github.com/user/repos")).await);
    assert_eq!(cached.status.as_u16(), 200);
    assert_eq!(cached.header_str("sw-offline-cache"), Some("true"));
    assert_eq!(cached.text().unwrap(), "[]");
}

#[tokio::test]
async fn install_with_one_missing_asset_commits_nothing() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_assets(&fetcher);
    fetcher.respond(&asset_url("/assets/js/auth.js"), 404, "not found");
    let worker = ServiceWorker::new(config(), CacheStorage::new(), fetcher).unwrap();

    let err = worker.install().await.unwrap_err();

    assert!(matches!(err, ServiceWorkerError::InstallAssetFailure { .. }));
    assert_eq!(worker.state().await, WorkerState::Redundant);
    let storage = worker.storage().read().await;
    assert!(storage
        .get(&worker.config().static_cache_name())
        .map_or(true, |cache| cache.is_empty()));
}

#[tokio::test]
async fn failed_install_keeps_prior_generation_intact() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_assets(&fetcher);
    fetcher.fail(&asset_url("/manifest.json"));

    let mut storage = CacheStorage::new();
    let old = "https://devflow.example/index.html";
    storage
        .open("devflow-static-v0")
        .put(&get(old), &OfflineResponder::new(&config()).respond_to_str(old));
    let worker = ServiceWorker::new(config(), storage, fetcher).unwrap();

    assert!(worker.install().await.is_err());
    let storage = worker.storage().read().await;
    assert_eq!(storage.get("devflow-static-v0").unwrap().len(), 1);
    assert!(!storage.has(&worker.config().static_cache_name()));
}

#[tokio::test]
async fn activation_keeps_exactly_the_current_partitions() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    serve_assets(&fetcher);

    let mut storage = CacheStorage::new();
    let url = "https://example.org/x";
    for name in [
        "devflow-static-v0",
        "devflow-dynamic-v1",
        "devflow-api-v1",
        "devflow-api-v1-old",
        "someone-elses-cache",
    ] {
        storage
            .open(name)
            .put(&get(url), &OfflineResponder::new(&config()).respond_to_str(url));
    }
    let worker = ServiceWorker::new(config(), storage, fetcher).unwrap();

    worker.install().await.unwrap();

    let storage = worker.storage().read().await;
    let mut names = storage.keys();
    names.sort_unstable();
    assert_eq!(
        names,
        vec!["devflow-api-v1", "devflow-dynamic-v1", "devflow-static-v1"]
    );
    // Current partitions keep their content.
    assert_eq!(storage.get("devflow-dynamic-v1").unwrap().len(), 1);
    assert_eq!(storage.get("devflow-api-v1").unwrap().len(), 1);
}

#[tokio::test]
async fn cache_first_hit_revalidates_exactly_once() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let worker = installed_worker(fetcher.clone(), Arc::new(ManualClock::starting_now())).await;
    let url = asset_url("/assets/js/app.js");
    let before = fetcher.calls_for(&url);
    let total = fetcher.call_count();

    let response = respond(worker.handle_fetch(get(&url)).await);

    assert_eq!(response.text().unwrap(), "asset /assets/js/app.js");
    assert!(fetcher.wait_for_calls(total + 1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls_for(&url), before + 1);
}

#[tokio::test]
async fn offline_responder_answers_any_string() {
    let responder = OfflineResponder::new(&config());
    let inputs = [
        "/",
        "index.html",
        "https://api.github.com/user",
        "https://api.github.com/",
        "https://cdn.jsdelivr.net/npm/d3@7.8.5/dist/d3.min.js",
        "mailto:someone@example.org",
        "http://",
        "%%%",
        "\n",
    ];
    for raw in inputs {
        let status = responder.respond_to_str(raw).status.as_u16();
        assert!(status == 200 || status == 503, "{raw:?} -> {status}");
    }
}
