//! App Session - the embedded web view plus, optionally, the app's own UI
//!
//! Higher layers drive the application through this pair and block until
//! the page reaches some state. Each surface gets its own protocol client.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::cdp::discovery::{fetch_targets, Target};
use crate::cdp::protocol::TargetId;
use crate::cdp::CDPClient;
use crate::config::SessionConfig;
use crate::error::{CDPError, Result};

/// Which client of the session to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    WebView,
    AppUi,
}

/// Web view + app UI connections for one running application
pub struct AppSession {
    pub config: SessionConfig,
    webview: CDPClient,
    ui: Option<CDPClient>,
}

impl AppSession {
    /// Build the clients; the loopback policy is checked here, not on start
    pub fn new(config: SessionConfig) -> Result<Self> {
        let webview = CDPClient::new(config.client.clone())?;
        let ui = match config.ui_url_pattern {
            Some(_) => Some(CDPClient::new(config.client.clone())?),
            None => None,
        };

        Ok(Self {
            config,
            webview,
            ui,
        })
    }

    /// Resolve both surfaces from one discovery pass and connect them
    pub async fn start(&self) -> Result<()> {
        let client = &self.config.client;
        let targets =
            fetch_targets(self.webview.http(), &client.host, client.port, client.timeout()).await?;

        let webview_id = match &self.config.webview_url_pattern {
            Some(pattern) => Some(find_by_url(&targets, pattern)?),
            None => None,
        };
        self.webview.connect(webview_id.as_deref()).await?;

        if let (Some(ui), Some(pattern)) = (&self.ui, &self.config.ui_url_pattern) {
            let connected = match find_by_url(&targets, pattern) {
                Ok(ui_id) => ui.connect(Some(&ui_id)).await,
                Err(e) => Err(e),
            };
            if let Err(e) = connected {
                self.webview.disconnect().await;
                return Err(e);
            }
        }

        tracing::info!(session_id = %self.config.id, app_ui = self.ui.is_some(), "Session started");
        Ok(())
    }

    /// Disconnect every surface. Idempotent.
    pub async fn stop(&self) {
        self.webview.disconnect().await;
        if let Some(ui) = &self.ui {
            ui.disconnect().await;
        }
        tracing::info!(session_id = %self.config.id, "Session stopped");
    }

    pub fn client(&self, surface: Surface) -> Result<&CDPClient> {
        match surface {
            Surface::WebView => Ok(&self.webview),
            Surface::AppUi => self
                .ui
                .as_ref()
                .ok_or_else(|| CDPError::connection("No app UI target configured for this session")),
        }
    }

    pub fn webview(&self) -> &CDPClient {
        &self.webview
    }

    /// Poll `expression` until it evaluates truthy and return that value.
    ///
    /// Evaluation errors count as "not yet" (the page may be mid-navigation);
    /// connection and request timeouts abort. `timeout` defaults to the
    /// client's request timeout.
    pub async fn wait_until(
        &self,
        surface: Surface,
        expression: &str,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let client = self.client(surface)?;
        let timeout = timeout.unwrap_or_else(|| client.config().timeout());
        let deadline = Instant::now() + timeout;
        let poll = self.config.poll_interval();

        loop {
            match client.evaluate(expression, true).await {
                Ok(value) if is_truthy(&value) => return Ok(value),
                Ok(_) => {}
                Err(CDPError::Evaluation(message)) => {
                    tracing::debug!(?surface, %message, "Condition evaluation failed, retrying");
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CDPError::ConditionTimeout {
                    expression: expression.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

fn find_by_url(targets: &[Target], pattern: &str) -> Result<TargetId> {
    targets
        .iter()
        .find(|t| t.url.contains(pattern))
        .map(|t| t.id.clone())
        .ok_or_else(|| {
            CDPError::connection(format!(
                "No target with URL matching '{pattern}' (scanned {} targets)",
                targets.len()
            ))
        })
}

/// JavaScript truthiness of a by-value result
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
