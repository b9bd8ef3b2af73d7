//! Room Controller
//!
//! HTTP service that creates rooms, each backed by its own tunnel-server
//! process, and hands every member a signed client configuration.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the CA certificate embedded into client configurations
//! 4. Wire the tunnel launcher, certificate authority and room manager
//! 5. Serve HTTP until SIGINT/SIGTERM
//! 6. Stop every room and reap any remaining tunnel server

use room_controller::certs::OpenSslAuthority;
use room_controller::config::Config;
use room_controller::identity::IdentityRegistry;
use room_controller::network::launcher::OpenVpnLauncher;
use room_controller::observability::metrics::init_metrics_recorder;
use room_controller::rooms::{RoomServices, RoomSessionManager};
use room_controller::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        public_host = %config.public_host,
        protocol = config.protocol.server_keyword(),
        base_port = config.base_port,
        max_rooms = config.max_rooms,
        work_dir = %config.work_dir.display(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let ca_pem = tokio::fs::read(config.ca_cert_path()).await.map_err(|e| {
        error!(
            path = %config.ca_cert_path().display(),
            "Failed to read CA certificate: {}", e
        );
        e
    })?;

    tokio::fs::create_dir_all(&config.work_dir).await?;

    let launcher = Arc::new(OpenVpnLauncher::new(
        config.openvpn_binary.clone(),
        config.openssl_binary.clone(),
    ));
    let authority = Arc::new(OpenSslAuthority::new(
        config.openssl_binary.clone(),
        config.ca_config_path(),
        config.key_bits,
    ));
    let services = Arc::new(RoomServices::from_config(
        &config,
        ca_pem,
        launcher,
        authority,
    ));

    let identity = Arc::new(IdentityRegistry::new());
    let manager = Arc::new(RoomSessionManager::new(
        Arc::clone(&identity),
        services,
        config.allow_multiple_rooms_per_host,
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let state = Arc::new(AppState {
        manager: Arc::clone(&manager),
        identity,
        config,
    });
    let app = routes::build_routes(state, metrics_handle);

    info!("Room Controller listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    // Tunnel servers must not outlive the controller, even if serving failed
    manager.shutdown().await;
    served?;

    info!("Room Controller shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
