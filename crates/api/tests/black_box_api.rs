use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use shrinkray_api::app::{build_app, build_services, AppServices};
use shrinkray_events::{FrameDecoder, Projection, QueueView, StreamEvent};
use shrinkray_infra::config::AppConfig;
use shrinkray_infra::transcode::SimulatedTranscoder;
use shrinkray_jobs::{Codec, JobStatus};

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(job_duration: Duration) -> Self {
        Self::spawn_with(AppConfig::default(), job_duration, &[Codec::Hevc]).await
    }

    async fn spawn_with(config: AppConfig, job_duration: Duration, hardware: &[Codec]) -> Self {
        // Same router as prod, bound to an ephemeral port, with a fast simulated transcoder.
        let transcoder = SimulatedTranscoder::new(job_duration)
            .with_ticks(10)
            .with_hardware(hardware.iter().copied())
            .without_source_check();
        let services = Arc::new(build_services(config, Arc::new(transcoder)));
        let app = build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    async fn submit(&self, client: &reqwest::Client, input_path: &str) -> String {
        let res = client
            .post(format!("{}/api/jobs", self.base_url))
            .json(&json!({ "input_path": input_path, "preset_id": "compress-hevc" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: serde_json::Value = res.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.services.request_shutdown();
        self.handle.abort();
    }
}

async fn job_status_eventually(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    status: &str,
) -> serde_json::Value {
    for _ in 0..300 {
        let res = client
            .get(format!("{}/api/jobs/{}", base_url, id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let job: serde_json::Value = res.json().await.unwrap();
        if job["status"] == status {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach {status} within timeout");
}

/// Reads `init`/`update` events off a live SSE response.
struct EventReader {
    response: reqwest::Response,
    decoder: FrameDecoder,
    ready: VecDeque<StreamEvent>,
}

impl EventReader {
    async fn connect(client: &reqwest::Client, base_url: &str) -> Self {
        let response = client
            .get(format!("{}/api/jobs/stream", base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"));
        Self {
            response,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
        }
    }

    async fn next(&mut self) -> StreamEvent {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return event;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.response.chunk())
                .await
                .expect("timed out waiting for an event")
                .unwrap()
                .expect("event stream ended");
            for frame in self.decoder.push(&chunk) {
                self.ready.push_back(frame.unwrap());
            }
        }
    }
}

#[tokio::test]
async fn health_config_and_presets() {
    let srv = TestServer::spawn(Duration::from_millis(100)).await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let config: serde_json::Value = client
        .get(format!("{}/api/config", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        config,
        json!({ "media_path": "/media", "workers": 1, "allow_software_fallback": false })
    );

    let presets: serde_json::Value = client
        .get(format!("{}/api/presets", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = presets
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_string())
        .collect();
    assert!(ids.contains(&"compress-hevc".to_string()));
    assert!(presets[0]["name"].is_string());
    assert!(presets[0]["description"].is_string());
}

#[tokio::test]
async fn submitted_job_runs_to_completion() {
    let srv = TestServer::spawn(Duration::from_millis(100)).await;
    let client = reqwest::Client::new();

    let id = srv.submit(&client, "shows/ep1.mkv").await;
    let job = job_status_eventually(&client, &srv.base_url, &id, "complete").await;

    assert_eq!(job["input_path"], "/media/shows/ep1.mkv");
    assert_eq!(job["preset_id"], "compress-hevc");
    assert!(job["started_at"].is_string());
    assert!(job.get("progress").is_none());

    let list: serde_json::Value = client
        .get(format!("{}/api/jobs", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id.as_str());
    assert_eq!(list[0]["status"], "complete");
}

#[tokio::test]
async fn submission_is_validated() {
    let srv = TestServer::spawn(Duration::from_millis(100)).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/jobs", srv.base_url))
        .json(&json!({ "input_path": "/media/a.mkv", "preset_id": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unknown_preset");

    let res = client
        .post(format!("{}/api/jobs", srv.base_url))
        .json(&json!({ "input_path": "  ", "preset_id": "compress-hevc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    for escaping in ["../etc/passwd", "/etc/passwd"] {
        let res = client
            .post(format!("{}/api/jobs", srv.base_url))
            .json(&json!({ "input_path": escaping, "preset_id": "compress-hevc" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
    }
}

#[tokio::test]
async fn unknown_job_is_404() {
    let srv = TestServer::spawn(Duration::from_millis(100)).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/api/jobs/does-not-exist", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client
        .post(format!("{}/api/jobs/does-not-exist/cancel", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_pending_job_then_conflict_on_repeat() {
    let srv = TestServer::spawn(Duration::from_secs(10)).await;
    let client = reqwest::Client::new();

    let running = srv.submit(&client, "/media/a.mkv").await;
    let queued = srv.submit(&client, "/media/b.mkv").await;
    job_status_eventually(&client, &srv.base_url, &running, "running").await;

    let res = client
        .post(format!("{}/api/jobs/{}/cancel", srv.base_url, queued))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: serde_json::Value = res.json().await.unwrap();
    assert_eq!(job["status"], "cancelled");

    let res = client
        .post(format!("{}/api/jobs/{}/cancel", srv.base_url, queued))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn missing_hardware_without_fallback_fails_the_job() {
    let srv = TestServer::spawn_with(AppConfig::default(), Duration::from_millis(100), &[]).await;
    let client = reqwest::Client::new();

    let id = srv.submit(&client, "/media/a.mkv").await;
    let job = job_status_eventually(&client, &srv.base_url, &id, "failed").await;
    assert!(job["error"].as_str().unwrap().contains("software fallback"));
}

#[tokio::test]
async fn software_fallback_allowed_by_config() {
    let config = AppConfig {
        allow_software_fallback: true,
        ..AppConfig::default()
    };
    let srv = TestServer::spawn_with(config, Duration::from_millis(100), &[]).await;
    let client = reqwest::Client::new();

    let id = srv.submit(&client, "/media/a.mkv").await;
    job_status_eventually(&client, &srv.base_url, &id, "complete").await;
}

#[tokio::test]
async fn event_stream_starts_with_init_then_updates() {
    let srv = TestServer::spawn(Duration::from_secs(10)).await;
    let client = reqwest::Client::new();

    let mut events = EventReader::connect(&client, &srv.base_url).await;
    match events.next().await {
        StreamEvent::Init { jobs, stats } => {
            assert!(jobs.is_empty());
            assert_eq!(stats.pending, 0);
        }
        other => panic!("expected init, got {other:?}"),
    }

    let id = srv.submit(&client, "/media/a.mkv").await;
    match events.next().await {
        StreamEvent::Update { job, stats } => {
            assert_eq!(job.id.as_str(), id);
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(stats.pending, 1);
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[tokio::test]
async fn three_jobs_one_worker_partition_on_a_late_client() {
    let srv = TestServer::spawn(Duration::from_secs(10)).await;
    let client = reqwest::Client::new();

    let a = srv.submit(&client, "/media/a.mkv").await;
    let b = srv.submit(&client, "/media/b.mkv").await;
    let c = srv.submit(&client, "/media/c.mkv").await;
    job_status_eventually(&client, &srv.base_url, &a, "running").await;

    // Attach after the first job is already running.
    let mut events = EventReader::connect(&client, &srv.base_url).await;
    let init = events.next().await;
    let stats = *init.stats();
    assert_eq!(stats.running, 1);
    assert_eq!(stats.pending, 2);

    let mut view = QueueView::new();
    view.apply(&init);

    let active: Vec<_> = view.active().iter().map(|j| j.id.to_string()).collect();
    let queued: Vec<_> = view.queued().iter().map(|j| j.id.to_string()).collect();
    assert_eq!(active, vec![a.clone()]);
    assert_eq!(queued, vec![b, c.clone()]);

    // Cancel the running job: the next job moves into the active view.
    let res = client
        .post(format!("{}/api/jobs/{}/cancel", srv.base_url, a))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let active: Vec<_> = view.active().iter().map(|j| j.id.to_string()).collect();
        if active.len() == 1 && active[0] != a {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "next job never became active");
        let event = events.next().await;
        view.apply(&event);
    }
    assert_eq!(
        view.get(&a.as_str().into()).map(|j| j.status),
        Some(JobStatus::Cancelled)
    );
    assert!(view.queued().iter().any(|j| j.id.as_str() == c));
}
