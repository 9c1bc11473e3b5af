//! End-to-end engine tests against a local mock server.

use eddy_engine::{
    AssetPolicy, Engine, EngineConfig, MemorySink, RateLimitConfig, ResourceConfig,
    TelemetryPolicy,
};
use eddy_types::CrawlError;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_stream::StreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_config() -> EngineConfig {
    EngineConfig {
        allowed_domains: vec!["127.0.0.1".into()],
        respect_robots: false,
        max_depth: 2,
        timeout: Duration::from_secs(5),
        rate_limit: RateLimitConfig {
            enabled: false,
            retry_base_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_millis(20),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn collect(mut stream: eddy_engine::ResultStream) -> Vec<eddy_engine::CrawlResult> {
    let mut results = Vec::new();
    while let Some(result) = stream.next().await {
        results.push(result);
    }
    results
}

#[tokio::test]
async fn happy_path_fanout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><p>root page</p><a href="/a">a</a><a href="/b">b</a></body></html>"#,
        ))
        .mount(&server)
        .await;
    for p in ["/a", "/b"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body><p>page {p}</p></body></html>")),
            )
            .mount(&server)
            .await;
    }

    let config = EngineConfig {
        max_pages: 10,
        ..base_config()
    };
    let engine = Engine::new(config).unwrap();
    let results = collect(engine.start(vec![format!("{}/", server.uri())]).await.unwrap()).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));

    let snapshot = engine.snapshot();
    let pipeline = snapshot.pipeline.unwrap();
    assert_eq!(pipeline.total_processed, 3);
    assert_eq!(pipeline.total_failed, 0);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn rate_limiting_throttles_a_seed_burst() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><p>ok</p></body></html>"),
        )
        .mount(&server)
        .await;

    let config = EngineConfig {
        rate_limit: RateLimitConfig {
            enabled: true,
            initial_rps: 2.0,
            min_rps: 0.5,
            max_rps: 3.0,
            bucket_capacity: 2.0,
            ..Default::default()
        },
        ..base_config()
    };
    let engine = Engine::new(config).unwrap();

    let seeds: Vec<String> = (0..10).map(|i| format!("{}/p{i}", server.uri())).collect();
    let started = Instant::now();
    let results = collect(engine.start(seeds).await.unwrap()).await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.success));
    // Burst of 2 at ~2-3 rps leaves at least 8 waits.
    assert!(elapsed >= Duration::from_millis(1500), "elapsed {elapsed:?}");

    let limiter = engine.snapshot().limiter.unwrap();
    assert!(limiter.throttled > 0);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn persistent_server_errors_trip_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = EngineConfig {
        fetch_workers: 2,
        rate_limit: RateLimitConfig {
            enabled: true,
            consecutive_fail_threshold: 3,
            retry_max_attempts: 2,
            retry_base_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_millis(20),
            ..Default::default()
        },
        ..base_config()
    };
    let engine = Engine::new(config).unwrap();

    let seeds: Vec<String> = (0..6).map(|i| format!("{}/e{i}", server.uri())).collect();
    let results = collect(engine.start(seeds).await.unwrap()).await;

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| !r.success));
    assert!(
        results
            .iter()
            .any(|r| matches!(r.error, Some(CrawlError::CircuitOpen { .. }))),
        "expected at least one circuit-open result"
    );

    let limiter = engine.snapshot().limiter.unwrap();
    assert!(limiter.open_circuits >= 1);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn resume_skips_checkpointed_seeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><p>ok</p></body></html>"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("checkpoint");
    let seeds: Vec<String> = ["/a", "/b", "/c"]
        .iter()
        .map(|p| format!("{}{p}", server.uri()))
        .collect();

    let resources = ResourceConfig {
        checkpoint_path: Some(checkpoint.clone()),
        checkpoint_interval: Duration::from_millis(10),
        ..Default::default()
    };

    let first = Engine::new(EngineConfig {
        resources: resources.clone(),
        ..base_config()
    })
    .unwrap();
    let results = collect(first.start(seeds.clone()).await.unwrap()).await;
    assert_eq!(results.iter().filter(|r| r.success).count(), 3);
    first.stop().await.unwrap();

    let fetched_before = server.received_requests().await.unwrap().len();

    let second = Engine::new(EngineConfig {
        resources,
        resume: true,
        ..base_config()
    })
    .unwrap();
    let results = collect(second.start(seeds).await.unwrap()).await;
    assert!(results.is_empty());

    let resume = second.snapshot().resume.unwrap();
    assert_eq!(resume.seeds_before, 3);
    assert_eq!(resume.skipped, 3);

    let fetched_after = server.received_requests().await.unwrap().len();
    assert_eq!(fetched_before, fetched_after, "resume run must not fetch");
    second.stop().await.unwrap();
}

#[tokio::test]
async fn asset_rewriting_is_deterministic_across_runs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><p>styled</p><link rel="stylesheet" href="/css/a.css"><img src="/img/b.png"></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/css/a.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("body { color: red; }")
                .insert_header("content-type", "text/css"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/b.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x89u8, b'P', b'N', b'G'])
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;

    async fn run(
        server: &MockServer,
    ) -> (Vec<eddy_engine::CrawlResult>, eddy_engine::AssetMetricsSnapshot) {
        let config = EngineConfig {
            asset_policy: AssetPolicy {
                enabled: true,
                ..Default::default()
            },
            ..base_config()
        };
        let engine = Engine::new(config).unwrap();
        let results =
            collect(engine.start(vec![format!("{}/", server.uri())]).await.unwrap()).await;
        let metrics = engine.asset_metrics();
        engine.stop().await.unwrap();
        (results, metrics)
    }

    let (results_a, metrics_a) = run(&server).await;
    let (results_b, _) = run(&server).await;

    assert_eq!(results_a.len(), 1);
    let page_a = results_a[0].page.as_ref().unwrap();
    let page_b = results_b[0].page.as_ref().unwrap();

    assert!(page_a.raw_html.contains("/assets/"));
    assert!(!page_a.raw_html.contains("/css/a.css"));
    assert!(page_a.raw_html.contains(".css"));
    assert_eq!(page_a.raw_html, page_b.raw_html);

    assert_eq!(metrics_a.discovered, 2);
    assert_eq!(metrics_a.selected, 2);
    assert_eq!(metrics_a.downloaded, 2);
    assert_eq!(metrics_a.failed, 0);
}

#[tokio::test]
async fn health_transition_reaches_observers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let engine = Engine::new(base_config()).unwrap();
    engine.update_telemetry_policy(Some(TelemetryPolicy {
        health_ttl: Duration::from_millis(1),
        pipeline_min_samples: 1,
        pipeline_degraded_ratio: 0.2,
        pipeline_unhealthy_ratio: 0.5,
        ..Default::default()
    }));

    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.register_event_observer(move |event| {
        if event.name == "health_change" {
            let previous = event.fields.get("previous").cloned().unwrap_or_default();
            let current = event.fields.get("current").cloned().unwrap_or_default();
            sink.lock().unwrap().push((previous, current));
        }
    });

    // First evaluation: no samples yet, overall healthy.
    let first = engine.health_snapshot().await;
    assert_eq!(first.overall.as_str(), "healthy");

    let results =
        collect(engine.start(vec![format!("{}/gone", server.uri())]).await.unwrap()).await;
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = engine.health_snapshot().await;
    assert_eq!(second.overall.as_str(), "unhealthy");

    // The observer mirror runs on its own task; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let transitions = seen.lock().unwrap().clone();
    assert!(
        transitions.contains(&("healthy".to_string(), "unhealthy".to_string())),
        "transitions seen: {transitions:?}"
    );
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn sinks_receive_every_successful_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><p>ok</p></body></html>"),
        )
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let engine = Engine::builder(base_config())
        .add_sink(Arc::clone(&sink) as Arc<dyn eddy_types::OutputSink>)
        .build()
        .unwrap();

    let seeds: Vec<String> = (0..3).map(|i| format!("{}/s{i}", server.uri())).collect();
    let results = collect(engine.start(seeds).await.unwrap()).await;
    assert_eq!(results.len(), 3);
    assert_eq!(sink.results().len(), 3);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn zero_seeds_close_the_stream_immediately() {
    let server = MockServer::start().await;
    let engine = Engine::new(base_config()).unwrap();
    let results = collect(engine.start(Vec::new()).await.unwrap()).await;
    assert!(results.is_empty());
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn cache_capacity_zero_without_spill_still_crawls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><p>ok</p></body></html>"),
        )
        .mount(&server)
        .await;

    let config = EngineConfig {
        resources: ResourceConfig {
            cache_capacity: 0,
            spill_dir: None,
            ..Default::default()
        },
        ..base_config()
    };
    let engine = Engine::new(config).unwrap();
    let results =
        collect(engine.start(vec![format!("{}/x", server.uri())]).await.unwrap()).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);

    let resources = engine.snapshot().resources.unwrap();
    assert_eq!(resources.cache_entries, 0);
    engine.stop().await.unwrap();
}
