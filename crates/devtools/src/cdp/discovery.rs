//! Target Discovery - `GET /json/list` on the debugging endpoint
//!
//! Targets are re-fetched on every call. Nothing here checks whether a
//! target is connectable; that is the caller's job.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::protocol::TargetId;
use crate::config::{DEFAULT_HOST, DEFAULT_TIMEOUT_MS};
use crate::error::{CDPError, Result};

/// A debuggable context exposed by the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: TargetId,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devtools_frontend_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

impl Target {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// Base HTTP URL for a host/port pair, bracketing IPv6 literals
pub(crate) fn http_base(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

/// HTTP client for discovery. Ignores proxy environment variables so
/// loopback traffic never leaves the machine.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .map_err(|e| CDPError::connection(format!("Failed to build HTTP client: {e}")))
}

/// List the targets currently exposed at `host:port` (host defaults to loopback)
pub async fn discover_targets(port: u16, host: Option<&str>) -> Result<Vec<Target>> {
    let http = http_client()?;
    fetch_targets(&http, host.unwrap_or(DEFAULT_HOST), port, default_timeout()).await
}

/// Discovery with an explicit client and deadline. The deadline covers the
/// whole exchange, so an endpoint that accepts but never answers still fails.
pub(crate) async fn fetch_targets(
    http: &reqwest::Client,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Vec<Target>> {
    let url = format!("{}/json/list", http_base(host, port));
    tracing::debug!(%url, "Discovering targets");

    let targets = tokio::time::timeout(timeout, request_targets(http, host, port, &url))
        .await
        .map_err(|_| {
            CDPError::connection(format!(
                "Debugging endpoint at {host}:{port} did not answer within {timeout:?}"
            ))
        })??;

    tracing::debug!(count = targets.len(), "Discovered targets");
    Ok(targets)
}

async fn request_targets(http: &reqwest::Client, host: &str, port: u16, url: &str) -> Result<Vec<Target>> {
    let response = http.get(url).send().await.map_err(|e| {
        CDPError::connection(format!(
            "Cannot reach debugging endpoint at {host}:{port} ({e}). \
             Is the application running with remote debugging enabled?"
        ))
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(CDPError::connection(format!(
            "Target discovery at {url} failed with HTTP {}",
            status.as_u16()
        )));
    }

    let body = response.bytes().await.map_err(|e| {
        CDPError::connection(format!("Failed to read discovery response from {url}: {e}"))
    })?;
    Ok(serde_json::from_slice(&body)?)
}

fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

/// First candidate port whose discovery endpoint answers.
///
/// `candidates` normally comes from process discovery, in preference order.
pub async fn find_debug_port(candidates: &[u16], host: Option<&str>) -> Result<u16> {
    let http = http_client()?;
    let host = host.unwrap_or(DEFAULT_HOST);
    for &port in candidates {
        match fetch_targets(&http, host, port, default_timeout()).await {
            Ok(targets) => {
                tracing::info!(port, targets = targets.len(), "Found debugging endpoint");
                return Ok(port);
            }
            Err(e) => tracing::debug!(port, error = %e, "Port did not answer discovery"),
        }
    }

    Err(CDPError::connection(format!(
        "No debugging endpoint answered on candidate ports {candidates:?}"
    )))
}

/// Pick a target: exact id if given, otherwise the first page
pub(crate) fn select_target<'a>(targets: &'a [Target], target_id: Option<&str>) -> Result<&'a Target> {
    let found = match target_id {
        Some(id) => targets.iter().find(|t| t.id == id),
        None => targets.iter().find(|t| t.is_page()),
    };

    found.ok_or_else(|| {
        let wanted = match target_id {
            Some(id) => format!("target '{id}'"),
            None => "a page target".to_string(),
        };
        CDPError::connection(format!(
            "Could not find {wanted} (scanned {} targets)",
            targets.len()
        ))
    })
}
