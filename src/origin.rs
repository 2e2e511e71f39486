//! Origin policy for the WebSocket endpoint
//!
//! Displays and the admin page live on the local network, so cross-site
//! upgrades are only accepted from:
//! - requests without an `Origin` header (native display clients)
//! - the same host the request was addressed to
//! - localhost
//! - IP origins inside the allowed networks (private and link-local by default)

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;

const DEFAULT_ALLOWED_NETS: &[&str] = &[
    "127.0.0.0/8",
    "::1/128",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "fe80::/10",
];

#[derive(Debug, Clone)]
pub struct OriginPolicy {
    /// When false every upgrade is accepted
    pub enabled: bool,
    pub allowed_nets: Vec<IpNet>,
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_nets: parse_nets(DEFAULT_ALLOWED_NETS.iter().copied()),
        }
    }
}

fn parse_nets<'a>(nets: impl Iterator<Item = &'a str>) -> Vec<IpNet> {
    nets.filter_map(|net| match net.trim().parse() {
        Ok(net) => Some(net),
        Err(e) => {
            tracing::warn!("Ignoring invalid network {:?}: {}", net, e);
            None
        }
    })
    .collect()
}

impl OriginPolicy {
    /// Load from `CHECK_ORIGIN` and `ALLOWED_ORIGIN_NETS` (comma-separated CIDRs)
    pub fn from_env() -> Self {
        let enabled = std::env::var("CHECK_ORIGIN")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        let allowed_nets = match std::env::var("ALLOWED_ORIGIN_NETS") {
            Ok(list) if !list.trim().is_empty() => {
                parse_nets(list.split(',').filter(|s| !s.trim().is_empty()))
            }
            _ => Self::default().allowed_nets,
        };

        tracing::info!(
            enabled,
            allowed_nets = allowed_nets.len(),
            "Origin policy loaded"
        );

        Self {
            enabled,
            allowed_nets,
        }
    }

    /// Decide whether an upgrade with this `Origin` sent to `request_host` is allowed
    pub fn allows(&self, origin: Option<&str>, request_host: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(origin) = origin else {
            return true;
        };

        let Some(origin_host) = Url::parse(origin)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
        else {
            tracing::warn!("Rejected WebSocket upgrade with invalid origin {:?}", origin);
            return false;
        };
        // IPv6 hosts come back bracketed
        let origin_host = origin_host.trim_start_matches('[').trim_end_matches(']');

        if let Some(request_host) = request_host.map(strip_port) {
            if origin_host.eq_ignore_ascii_case(request_host) {
                return true;
            }
        }

        if matches!(origin_host, "localhost" | "127.0.0.1" | "::1") {
            return true;
        }

        if let Ok(ip) = origin_host.parse::<IpAddr>() {
            if self.allowed_nets.iter().any(|net| net.contains(&ip)) {
                return true;
            }
        }

        tracing::warn!("Rejected WebSocket upgrade from origin {}", origin);
        false
    }
}

/// Host header without its port, IPv6 brackets removed
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn forbidden(message: &'static str) -> Response {
    (
        StatusCode::FORBIDDEN,
        [(header::CONTENT_TYPE, "text/plain")],
        message,
    )
        .into_response()
}

/// Middleware enforcing the origin policy on the WebSocket route
pub async fn ws_origin_middleware(
    State(policy): State<Arc<OriginPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());

    if !policy.allows(origin, host) {
        return forbidden("Origin not allowed");
    }

    next.run(request).await
}
