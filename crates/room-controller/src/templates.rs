//! Tunnel configuration rendering.
//!
//! Pure formatting: no I/O, no process work. The server configuration points
//! at files on disk; the client configuration carries its key material inline
//! so it can be handed to a member as a single document.

use crate::config::TunnelProtocol;
use crate::errors::RcError;
use std::net::Ipv4Addr;
use std::path::Path;

/// Netmask of every per-room address pool.
pub const ROOM_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// Inputs for `server.conf`.
#[derive(Debug, Clone)]
pub struct ServerConfigParams<'a> {
    pub protocol: TunnelProtocol,
    pub port: u16,
    pub subnet: Ipv4Addr,
    pub push_routes: &'a [String],
    pub keepalive_interval_seconds: u32,
    pub keepalive_timeout_seconds: u32,
    pub ca_path: &'a Path,
    pub cert_path: &'a Path,
    pub key_path: &'a Path,
    pub dh_path: &'a Path,
}

/// Inputs for a member's client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfigParams<'a> {
    pub protocol: TunnelProtocol,
    pub remote_host: &'a str,
    pub port: u16,
    pub ca_pem: &'a [u8],
    pub cert_pem: &'a [u8],
    pub key_pem: &'a [u8],
}

/// Render the tunnel-server configuration.
#[must_use]
pub fn render_server_config(params: &ServerConfigParams<'_>) -> String {
    let mut lines = vec![
        format!("port {}", params.port),
        format!("proto {}", params.protocol.server_keyword()),
        "dev tun".to_string(),
        format!("ca {}", params.ca_path.display()),
        format!("cert {}", params.cert_path.display()),
        format!("key {}", params.key_path.display()),
        format!("dh {}", params.dh_path.display()),
        format!("server {} {}", params.subnet, ROOM_NETMASK),
    ];

    lines.extend(
        params
            .push_routes
            .iter()
            .map(|route| format!("push \"route {route}\"")),
    );

    lines.push(format!(
        "keepalive {} {}",
        params.keepalive_interval_seconds, params.keepalive_timeout_seconds
    ));
    lines.push("persist-key".to_string());
    lines.push("persist-tun".to_string());
    lines.push("verb 3".to_string());

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Render a client configuration with inline CA, certificate and key.
///
/// # Errors
///
/// Returns `RcError::Internal` if any PEM blob is not valid UTF-8.
pub fn render_client_config(params: &ClientConfigParams<'_>) -> Result<String, RcError> {
    let ca = pem_text("CA certificate", params.ca_pem)?;
    let cert = pem_text("certificate", params.cert_pem)?;
    let key = pem_text("private key", params.key_pem)?;

    let mut rendered = [
        "client".to_string(),
        "dev tun".to_string(),
        format!("proto {}", params.protocol.client_keyword()),
        format!("remote {} {}", params.remote_host, params.port),
        "resolv-retry infinite".to_string(),
        "nobind".to_string(),
        "persist-key".to_string(),
        "persist-tun".to_string(),
        "remote-cert-tls server".to_string(),
        "verb 3".to_string(),
        inline_block("ca", ca),
        inline_block("cert", cert),
        inline_block("key", key),
    ]
    .join("\n");
    rendered.push('\n');
    Ok(rendered)
}

fn pem_text<'a>(what: &str, bytes: &'a [u8]) -> Result<&'a str, RcError> {
    std::str::from_utf8(bytes)
        .map_err(|_| RcError::Internal(format!("{what} is not valid PEM text")))
}

fn inline_block(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{}\n</{tag}>", body.trim_end())
}
