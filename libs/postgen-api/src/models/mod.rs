//! API models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Health endpoint path
pub const HEALTH_PATH: &str = "/api/health";

/// Styles endpoint path
pub const STYLES_PATH: &str = "/api/styles";

/// Generation endpoint path
pub const GENERATE_PATH: &str = "/api/generate";

/// Overall service status reported by the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ServiceStatus {
    /// Whether the service is serving traffic
    pub fn is_up(&self) -> bool {
        !matches!(self, ServiceStatus::Unhealthy)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ServiceStatus,
    pub timestamp: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Per-component checks (`openai`, `memory`, ...)
    #[serde(default)]
    pub checks: HashMap<String, serde_json::Value>,
}

/// Generation style
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleInfo {
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub description: String,
}

/// Styles list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesResponse {
    pub success: bool,
    #[serde(default)]
    pub styles: Vec<StyleInfo>,
    /// Id of the default style
    #[serde(default)]
    pub default: Option<String>,
}

/// Post generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub url: String,
    pub style: String,
    pub max_length: u32,
}

/// Post generation response.
///
/// The backend answers with the same envelope on success and failure, so the
/// payload fields are optional and `success` decides which ones are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default)]
    pub error_code: Option<String>,
}
