//! Test server harness for E2E testing
//!
//! Provides `TestRoomServer` for spawning real Room Controller servers in tests.

use crate::fixtures::{test_config, test_state};
use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::certs::mock::FakeAuthority;
use room_controller::config::Config;
use room_controller::network::launcher::mock::FakeLauncher;
use room_controller::routes::{self, AppState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Test harness for spawning a Room Controller server in E2E tests.
///
/// Tunnel servers and the certificate authority are fakes; everything else
/// (actors, filesystem layout, HTTP stack) is the real thing.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_e2e() -> Result<(), anyhow::Error> {
///     let server = TestRoomServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    root: TempDir,
    state: Arc<AppState>,
    launcher: Arc<FakeLauncher>,
    authority: Arc<FakeAuthority>,
    _handle: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn a server with a healthy launcher and an accepting authority.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(FakeLauncher::healthy(), FakeAuthority::accepting()).await
    }

    /// Spawn a server backed by the given fakes.
    ///
    /// The server will:
    /// - Create a temporary root holding PKI files and room directories
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with(
        launcher: FakeLauncher,
        authority: FakeAuthority,
    ) -> Result<Self, anyhow::Error> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path())?;

        let launcher = Arc::new(launcher);
        let authority = Arc::new(authority);
        let state = test_state(config, Arc::clone(&launcher), Arc::clone(&authority));

        // Recorder is not installed globally; /metrics renders what it owns
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            // ConnectInfo supplies the registering user's origin address
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            root,
            state,
            launcher,
            authority,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Application state, for driving the manager directly.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn launcher(&self) -> &FakeLauncher {
        &self.launcher
    }

    pub fn authority(&self) -> &FakeAuthority {
        &self.authority
    }

    /// Temporary root holding `pki/` and `rooms/`.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Stop every room, as the binary does on SIGTERM.
    pub async fn shutdown(&self) {
        self.state.manager.shutdown().await;
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        // Abort the HTTP server task so the port is released immediately
        self._handle.abort();
    }
}
