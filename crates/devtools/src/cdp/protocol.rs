//! CDP Protocol Types
//!
//! Wire frames plus the handful of typed commands the client needs.
//! Everything else goes through the untyped `send(method, params)` path.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from the discovery endpoint
pub type TargetId = String;

/// CDP Request sent to the target
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// CDP Response from the target
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ResponseError>,
}

/// Protocol-level error carried by a response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseError {
    #[serde(default)]
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from the target (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Inbound frame: a response if it carries an id, otherwise an event
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

/// A protocol method with a known params/response shape.
///
/// `METHOD` is the wire name; the implementing type serializes to `params`.
pub trait Command: Serialize {
    const METHOD: &'static str;
    type Response: DeserializeOwned;
}

/// `Runtime.evaluate`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluate {
    pub expression: String,
    pub await_promise: bool,
    pub return_by_value: bool,
}

impl Evaluate {
    pub fn new(expression: impl Into<String>, await_promise: bool) -> Self {
        Self {
            expression: expression.into(),
            await_promise,
            return_by_value: true,
        }
    }
}

impl Command for Evaluate {
    const METHOD: &'static str = "Runtime.evaluate";
    type Response = EvaluateResult;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    #[serde(default)]
    pub result: Option<RemoteObject>,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type", default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Exception description, else the details text, else a generic message.
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|ex| ex.description.clone())
            .or_else(|| self.text.clone())
            .unwrap_or_else(|| "Evaluation failed".to_string())
    }
}

/// `Page.navigate`
#[derive(Debug, Clone, Serialize)]
pub struct Navigate {
    pub url: String,
}

impl Command for Navigate {
    const METHOD: &'static str = "Page.navigate";
    type Response = NavigateResult;
}

/// Reply to `Page.navigate`. Fields without a typed slot land in `extra`,
/// so the reply survives a round trip unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    #[serde(default)]
    pub frame_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
