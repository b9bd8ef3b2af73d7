//! Fixtures shared by the unit-style router tests and the server harness.

use room_controller::certs::mock::FakeAuthority;
use room_controller::config::Config;
use room_controller::identity::IdentityRegistry;
use room_controller::network::launcher::mock::FakeLauncher;
use room_controller::rooms::{RoomServices, RoomSessionManager};
use room_controller::routes::AppState;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// PEM stand-in for the CA certificate embedded in client configurations.
pub const TEST_CA_PEM: &str = "-----BEGIN CERTIFICATE-----\ntest-ca\n-----END CERTIFICATE-----\n";

/// Public host advertised to clients by test servers.
pub const TEST_PUBLIC_HOST: &str = "vpn.test";

/// Grace period test servers give a tunnel server before killing it.
pub const TEST_STOP_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Write the PKI files a room controller expects under `pki_dir`.
pub fn write_pki(pki_dir: &Path) -> Result<(), anyhow::Error> {
    std::fs::create_dir_all(pki_dir)?;
    std::fs::write(pki_dir.join("ca.crt"), TEST_CA_PEM)?;
    std::fs::write(pki_dir.join("server.crt"), "server certificate")?;
    std::fs::write(pki_dir.join("server.key"), "server key")?;
    std::fs::write(pki_dir.join("openssl-ca.cnf"), "[ ca ]\n")?;
    Ok(())
}

/// Configuration rooted at `root`, with PKI files written and timings
/// shortened for tests.
pub fn test_config(root: &Path) -> Result<Config, anyhow::Error> {
    let pki_dir = root.join("pki");
    write_pki(&pki_dir)?;

    let vars = HashMap::from([
        ("RC_PUBLIC_HOST".to_string(), TEST_PUBLIC_HOST.to_string()),
        ("RC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        (
            "RC_WORK_DIR".to_string(),
            root.join("rooms").display().to_string(),
        ),
        ("RC_PKI_DIR".to_string(), pki_dir.display().to_string()),
        ("RC_MAX_ROOMS".to_string(), "16".to_string()),
        ("RC_STARTUP_PROBE_MS".to_string(), "1".to_string()),
    ]);

    let mut config =
        Config::from_vars(&vars).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;
    // Whole seconds only through the environment
    config.stop_grace_period = TEST_STOP_GRACE_PERIOD;
    Ok(config)
}

/// Application state wired to the given fakes.
pub fn test_state(
    config: Config,
    launcher: Arc<FakeLauncher>,
    authority: Arc<FakeAuthority>,
) -> Arc<AppState> {
    let services = Arc::new(RoomServices::from_config(
        &config,
        TEST_CA_PEM.as_bytes().to_vec(),
        launcher,
        authority,
    ));
    let identity = Arc::new(IdentityRegistry::new());
    let manager = Arc::new(RoomSessionManager::new(
        Arc::clone(&identity),
        services,
        config.allow_multiple_rooms_per_host,
    ));

    Arc::new(AppState {
        manager,
        identity,
        config,
    })
}
