//! Test server harness for E2E testing
//!
//! Provides `TestRoomServer` for spawning real room service instances in
//! tests, backed by the in-memory store and the mock media server.

use crate::test_ids::{TEST_AUTH_JWT_SECRET, TEST_LIVEKIT_API_KEY, TEST_LIVEKIT_API_SECRET};
use metrics_exporter_prometheus::PrometheusBuilder;
use room_service::config::Config;
use room_service::repositories::MemorySessionStore;
use room_service::routes::{self, AppState};
use room_service::services::media::mock::MockMediaInfrastructure;
use room_service::services::{CoordinatorSettings, SessionCoordinator, SystemClock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the room service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestRoomServer::spawn().await?;
///     let client = reqwest::Client::new();
///
///     let response = client
///         .get(&format!("{}/health", server.url()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    config: Config,
    media: Arc<MockMediaInfrastructure>,
    _handle: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn a new test server instance with an empty in-memory store.
    ///
    /// The server binds to a random available port (127.0.0.1:0) and runs in
    /// the background until dropped.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(&test_vars())
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let media = Arc::new(MockMediaInfrastructure::accepting());
        let coordinator = SessionCoordinator::new(
            Arc::new(MemorySessionStore::new()),
            media.clone(),
            Arc::new(SystemClock),
            CoordinatorSettings::from_config(&config),
        );
        let state = Arc::new(AppState::new(config.clone(), coordinator));

        // Not installed globally; each server renders its own registry.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            media,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The mock media server behind this instance.
    pub fn media(&self) -> &MockMediaInfrastructure {
        &self.media
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// Environment for a memory-backed test configuration.
pub fn test_vars() -> HashMap<String, String> {
    HashMap::from([
        ("STORE_BACKEND".to_string(), "memory".to_string()),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("LIVEKIT_URL".to_string(), "ws://media.test".to_string()),
        (
            "LIVEKIT_API_KEY".to_string(),
            TEST_LIVEKIT_API_KEY.to_string(),
        ),
        (
            "LIVEKIT_API_SECRET".to_string(),
            TEST_LIVEKIT_API_SECRET.to_string(),
        ),
        (
            "AUTH_JWT_SECRET".to_string(),
            TEST_AUTH_JWT_SECRET.to_string(),
        ),
    ])
}
