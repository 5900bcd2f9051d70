//! Flow definitions for the simulator.
//!
//! A flow pairs a request pattern with a response template and an optional
//! delayed webhook callback. Flows are read from JSON files and are
//! read-only once constructed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// File extensions recognized as flow definitions.
pub const FLOW_EXTENSIONS: [&str; 2] = ["whs", "json"];

/// Returns true when `path` carries a recognized flow definition extension.
pub fn has_flow_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FLOW_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// A single flow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Flow {
    /// Pattern an inbound request must satisfy
    pub request: RequestDefinition,

    /// Response returned for a matched request
    pub response: ResponseDefinition,

    /// Optional callback fired on its own delay, independent of the response
    #[serde(default)]
    pub web_hook: Option<WebHookDefinition>,
}

impl Flow {
    /// Load a flow definition from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse a flow definition from a JSON string.
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let flow: Self = serde_json::from_str(content)?;
        flow.validate()?;
        Ok(flow)
    }

    /// Validate the flow definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.request.validate()?;
        self.response.validate()?;
        if let Some(web_hook) = &self.web_hook {
            web_hook.validate()?;
        }
        Ok(())
    }
}

/// Request matching pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    /// HTTP method, matched exactly
    pub method: String,

    /// Request path, matched exactly (no patterns)
    pub path: String,

    /// Subset pattern for the decoded JSON body (absent matches any body)
    #[serde(default)]
    pub body: Option<Map<String, Value>>,

    /// Exact-value header pattern, names looked up case-insensitively
    /// (absent matches any headers)
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

impl RequestDefinition {
    /// Validate the request pattern.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.method.is_empty() {
            anyhow::bail!("request method cannot be empty");
        }
        if self.path.is_empty() {
            anyhow::bail!("request path cannot be empty");
        }
        Ok(())
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code (0 or unset means 200)
    #[serde(default)]
    pub code: u16,

    /// Delay in milliseconds before the response is written
    #[serde(default)]
    pub delay: u64,

    /// Seed the payload with a copy of the request body's top-level fields
    #[serde(default, rename = "includeRequest")]
    pub include_request: bool,

    /// Header templates, values may contain placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Body template merged over the (optionally included) request body
    #[serde(default)]
    pub body: Map<String, Value>,
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.code != 0 && !(100..=599).contains(&self.code) {
            anyhow::bail!("invalid response code: {}", self.code);
        }
        Ok(())
    }
}

/// Webhook definition. Its presence on a flow triggers a second delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebHookDefinition {
    /// HTTP method for the outbound call
    pub method: String,

    /// Target URL, taken literally (never templated)
    pub path: String,

    /// Delay in milliseconds before the webhook fires
    #[serde(default)]
    pub delay: u64,

    /// Seed the payload with a copy of the request body's top-level fields
    #[serde(default, rename = "includeRequest")]
    pub include_request: bool,

    /// Header templates, values may contain placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Body template for the webhook payload
    #[serde(default)]
    pub body: Map<String, Value>,
}

impl WebHookDefinition {
    /// Validate the webhook definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.method.is_empty() {
            anyhow::bail!("webhook method cannot be empty");
        }
        if self.path.is_empty() {
            anyhow::bail!("webhook target URL cannot be empty");
        }
        Ok(())
    }
}
