//! Room Controller configuration.
//!
//! Configuration is loaded from `RC_*` environment variables with defaults
//! suitable for a single-host deployment. Only `RC_PUBLIC_HOST` is required.

use std::collections::HashMap;
use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default root for per-room working directories.
pub const DEFAULT_WORK_DIR: &str = "/var/lib/room-controller/rooms";

/// Default directory holding the pre-provisioned CA and server material.
pub const DEFAULT_PKI_DIR: &str = "/etc/room-controller/pki";

/// Default first tunnel port (OpenVPN's registered port).
pub const DEFAULT_BASE_PORT: u16 = 1194;

/// Default number of network slots (concurrent rooms).
pub const DEFAULT_MAX_ROOMS: u16 = 64;

/// Upper bound on slots: each slot owns one /24 in the third octet.
pub const MAX_SLOTS: u16 = 256;

/// Default base of the per-room address pools.
pub const DEFAULT_ADDRESS_POOL_BASE: Ipv4Addr = Ipv4Addr::new(10, 8, 0, 0);

/// Default graceful-termination wait before a forced kill.
pub const DEFAULT_STOP_GRACE_PERIOD_SECONDS: u64 = 5;

/// Default wait after spawn before the tunnel server must still be running.
pub const DEFAULT_STARTUP_PROBE_MS: u64 = 250;

/// Default Diffie-Hellman parameter size.
pub const DEFAULT_DH_BITS: u32 = 2048;

/// Default member key size.
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// Default size of the bounded crypto/process worker pool.
pub const DEFAULT_WORKER_PERMITS: usize = 4;

/// Transport protocol the tunnel servers listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelProtocol {
    Udp,
    Tcp,
}

impl TunnelProtocol {
    /// Protocol keyword for the server configuration.
    #[must_use]
    pub const fn server_keyword(&self) -> &'static str {
        match self {
            TunnelProtocol::Udp => "udp",
            TunnelProtocol::Tcp => "tcp-server",
        }
    }

    /// Protocol keyword for the client configuration.
    #[must_use]
    pub const fn client_keyword(&self) -> &'static str {
        match self {
            TunnelProtocol::Udp => "udp",
            TunnelProtocol::Tcp => "tcp-client",
        }
    }
}

/// Room Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Address clients use to reach the tunnel servers.
    pub public_host: String,

    /// Root directory for per-room working directories.
    pub work_dir: PathBuf,

    /// Directory with `ca.crt`, `server.crt`, `server.key` and `openssl-ca.cnf`.
    pub pki_dir: PathBuf,

    /// Tunnel-server binary.
    pub openvpn_binary: PathBuf,

    /// OpenSSL command-line binary.
    pub openssl_binary: PathBuf,

    /// Tunnel transport protocol.
    pub protocol: TunnelProtocol,

    /// First tunnel port; room slot N listens on `base_port + N`.
    pub base_port: u16,

    /// Number of network slots (1..=256).
    pub max_rooms: u16,

    /// Base address of the per-room /24 pools.
    pub address_pool_base: Ipv4Addr,

    /// Routes pushed to clients, each as "network netmask".
    pub push_routes: Vec<String>,

    /// Keepalive ping interval in seconds.
    pub keepalive_interval_seconds: u32,

    /// Keepalive timeout in seconds.
    pub keepalive_timeout_seconds: u32,

    /// Graceful-termination wait before a forced kill.
    pub stop_grace_period: Duration,

    /// Post-spawn liveness probe delay.
    pub startup_probe: Duration,

    /// Diffie-Hellman parameter size in bits.
    pub dh_bits: u32,

    /// Member key size in bits.
    pub key_bits: u32,

    /// Size of the bounded crypto/process worker pool.
    pub worker_permits: usize,

    /// Whether a host may own several rooms at once.
    pub allow_multiple_rooms_per_host: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let public_host = vars
            .get("RC_PUBLIC_HOST")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("RC_PUBLIC_HOST".to_string()))?
            .clone();

        let bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let work_dir = PathBuf::from(
            vars.get("RC_WORK_DIR")
                .map_or(DEFAULT_WORK_DIR, String::as_str),
        );

        let pki_dir = PathBuf::from(vars.get("RC_PKI_DIR").map_or(DEFAULT_PKI_DIR, String::as_str));

        let openvpn_binary = PathBuf::from(
            vars.get("RC_OPENVPN_BINARY")
                .map_or("openvpn", String::as_str),
        );

        let openssl_binary = PathBuf::from(
            vars.get("RC_OPENSSL_BINARY")
                .map_or("openssl", String::as_str),
        );

        let protocol = match vars.get("RC_PROTOCOL").map(|s| s.to_ascii_lowercase()) {
            None => TunnelProtocol::Udp,
            Some(p) if p == "udp" => TunnelProtocol::Udp,
            Some(p) if p == "tcp" => TunnelProtocol::Tcp,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "RC_PROTOCOL must be 'udp' or 'tcp', got '{other}'"
                )))
            }
        };

        let base_port = vars
            .get("RC_BASE_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BASE_PORT);

        let max_rooms = vars
            .get("RC_MAX_ROOMS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ROOMS);

        if max_rooms == 0 || max_rooms > MAX_SLOTS {
            return Err(ConfigError::InvalidValue(format!(
                "RC_MAX_ROOMS must be between 1 and {MAX_SLOTS}, got {max_rooms}"
            )));
        }

        if u32::from(base_port) + u32::from(max_rooms) > u32::from(u16::MAX) + 1 {
            return Err(ConfigError::InvalidValue(format!(
                "RC_BASE_PORT {base_port} leaves no room for {max_rooms} tunnel ports"
            )));
        }

        let address_pool_base = match vars.get("RC_ADDRESS_POOL_BASE") {
            None => DEFAULT_ADDRESS_POOL_BASE,
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "RC_ADDRESS_POOL_BASE must be an IPv4 address, got '{raw}'"
                ))
            })?,
        };

        let push_routes = vars
            .get("RC_PUSH_ROUTES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let keepalive_interval_seconds = vars
            .get("RC_KEEPALIVE_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let keepalive_timeout_seconds = vars
            .get("RC_KEEPALIVE_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(120);

        let stop_grace_period = Duration::from_secs(
            vars.get("RC_STOP_GRACE_PERIOD_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STOP_GRACE_PERIOD_SECONDS),
        );

        let startup_probe = Duration::from_millis(
            vars.get("RC_STARTUP_PROBE_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STARTUP_PROBE_MS),
        );

        let dh_bits = vars
            .get("RC_DH_BITS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DH_BITS);

        let key_bits = vars
            .get("RC_KEY_BITS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_KEY_BITS);

        let worker_permits = vars
            .get("RC_WORKER_PERMITS")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_WORKER_PERMITS);

        let allow_multiple_rooms_per_host = vars
            .get("RC_ALLOW_MULTIPLE_ROOMS_PER_HOST")
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        Ok(Config {
            bind_address,
            public_host,
            work_dir,
            pki_dir,
            openvpn_binary,
            openssl_binary,
            protocol,
            base_port,
            max_rooms,
            address_pool_base,
            push_routes,
            keepalive_interval_seconds,
            keepalive_timeout_seconds,
            stop_grace_period,
            startup_probe,
            dh_bits,
            key_bits,
            worker_permits,
            allow_multiple_rooms_per_host,
        })
    }

    /// Path of the CA certificate.
    #[must_use]
    pub fn ca_cert_path(&self) -> PathBuf {
        self.pki_dir.join("ca.crt")
    }

    /// Path of the shared tunnel-server certificate.
    #[must_use]
    pub fn server_cert_path(&self) -> PathBuf {
        self.pki_dir.join("server.crt")
    }

    /// Path of the shared tunnel-server key.
    #[must_use]
    pub fn server_key_path(&self) -> PathBuf {
        self.pki_dir.join("server.key")
    }

    /// Path of the `openssl ca` configuration (references CA key, index and serial).
    #[must_use]
    pub fn ca_config_path(&self) -> PathBuf {
        self.pki_dir.join("openssl-ca.cnf")
    }
}
