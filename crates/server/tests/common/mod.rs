//! Common test utilities for exercising the HTTP and WebSocket API.
//!
//! This module provides a test fixture that wires an in-process router over
//! a temporary database and mock stage collaborators, so the whole job
//! lifecycle can be driven without external tools.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use distillery_core::{
    testing::MockStages, BroadcastHub, Config, JobService, JobStore, QueueConfig, QueueManager,
    SqliteJobStore, StageSet,
};
use distillery_server::{create_router, AppState};

/// Re-export fixtures for test convenience
pub use distillery_core::testing::{sample_url, wait_until, StageGate};

/// Test fixture with a running worker pool and mock stages.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_job_creation() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture
///         .post("/api/v1/jobs", json!({ "source_url": sample_url(1) }))
///         .await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub service: Arc<JobService>,
    pub queue: Arc<QueueManager>,
    pub store: Arc<dyn JobStore>,
    pub hub: Arc<BroadcastHub>,
    pub stages: Arc<MockStages>,
    /// Temporary directory holding the test database
    _temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture whose stages all succeed immediately.
    pub async fn new() -> Self {
        Self::with_stages(MockStages::new()).await
    }

    /// Create a fixture over the given mock stages with one worker.
    pub async fn with_stages(stages: MockStages) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.database.path = temp_dir.path().join("test.db");
        config.server.ws_heartbeat_secs = 1;
        config.queue = QueueConfig {
            max_workers: 1,
            dequeue_timeout_ms: 50,
            error_backoff_ms: 50,
            ..Default::default()
        };

        let store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(&config.database.path).expect("Failed to create job store"),
        );
        let hub = Arc::new(BroadcastHub::new());
        let stages = Arc::new(stages);
        let queue = Arc::new(QueueManager::new(
            config.queue.clone(),
            Arc::clone(&store),
            Arc::clone(&hub),
            StageSet::from_shared(Arc::clone(&stages)),
        ));
        queue.start(config.queue.max_workers);

        let service = Arc::new(JobService::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&queue),
        ));
        let state = Arc::new(AppState::new(config, Arc::clone(&service)));
        let router = create_router(state);

        Self {
            router,
            service,
            queue,
            store,
            hub,
            stages,
            _temp_dir: temp_dir,
        }
    }

    /// Serve the router on an ephemeral local port.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("No local address");
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        addr
    }

    /// Submit a job through the API and return its uuid.
    pub async fn submit(&self, n: u32) -> String {
        let response = self
            .post("/api/v1/jobs", serde_json::json!({ "source_url": sample_url(n) }))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["uuid"]
            .as_str()
            .expect("uuid in response")
            .to_string()
    }

    /// Wait until the job reaches `status` as reported by the API.
    pub async fn wait_for_status(&self, uuid: &str, status: &str) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            let response = self.get(&format!("/api/v1/jobs/{}", uuid)).await;
            if response.body["status"] == status {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Stop the worker pool.
    pub async fn shutdown(&self) {
        self.queue.stop().await;
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into()))
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
