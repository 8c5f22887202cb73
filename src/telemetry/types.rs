//! Data types reported by the management endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream AI provider an account authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gemini,
    Claude,
    Codex,
    Qwen,
    #[serde(rename = "iflow")]
    IFlow,
    Antigravity,
    Vertex,
    Kiro,
    GithubCopilot,
    Cursor,
    /// Any provider name this build does not know.
    #[serde(other)]
    Unknown,
}

impl Provider {
    /// Every provider, in display order.
    pub const ALL: [Provider; 10] = [
        Provider::Gemini,
        Provider::Claude,
        Provider::Codex,
        Provider::Qwen,
        Provider::IFlow,
        Provider::Antigravity,
        Provider::Vertex,
        Provider::Kiro,
        Provider::GithubCopilot,
        Provider::Cursor,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::Claude => "Claude",
            Provider::Codex => "Codex",
            Provider::Qwen => "Qwen",
            Provider::IFlow => "iFlow",
            Provider::Antigravity => "Antigravity",
            Provider::Vertex => "Vertex AI",
            Provider::Kiro => "Kiro",
            Provider::GithubCopilot => "GitHub Copilot",
            Provider::Cursor => "Cursor",
            Provider::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Error,
    #[serde(other)]
    Unknown,
}

/// An authenticated account known to the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    #[serde(rename = "name", default)]
    pub display_name: String,
    pub provider: Provider,
    pub status: AccountStatus,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub token: String,
    #[serde(rename = "expire_at", default)]
    pub expiry: Option<DateTime<Utc>>,
}

/// Aggregate request statistics for the running proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub success_requests: u64,
    #[serde(default)]
    pub failed_requests: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub success_rate: f64,
    /// Local time of the last refresh; never supplied by the endpoint.
    #[serde(skip, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl UsageSnapshot {
    /// A zeroed snapshot stamped with the current time.
    pub fn empty() -> Self {
        Self {
            total_requests: 0,
            success_requests: 0,
            failed_requests: 0,
            total_tokens: 0,
            success_rate: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Keeps every counter and only moves the timestamp forward.
    pub fn refreshed(&self) -> Self {
        Self {
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl Default for UsageSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
