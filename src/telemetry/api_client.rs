//! Blocking HTTP client for the managed process's management endpoint.

use super::types::{AccountRecord, UsageSnapshot};
use crate::errors::{ManagerError, ManagerResult};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Path prefix of the management API on the proxy's port.
pub const MANAGEMENT_BASE_PATH: &str = "/v0/management";

const MANAGEMENT_KEY_HEADER: &str = "X-Management-Key";
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Client bound to one management endpoint and key.
#[derive(Clone)]
pub struct ManagementClient {
    base_url: String,
    key: String,
    agent: ureq::Agent,
}

impl std::fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ManagementClient {
    /// Client for the local proxy listening on `port`.
    pub fn local(port: u16, key: &str) -> Self {
        Self::with_base_url(management_url(port), key)
    }

    pub fn with_base_url(base_url: impl Into<String>, key: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(API_TIMEOUT))
            .build()
            .into();
        Self {
            base_url: base_url.into(),
            key: key.to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /auth-files`
    pub fn auth_files(&self) -> ManagerResult<Vec<AccountRecord>> {
        self.get_json("auth-files").map_err(ManagerError::network)
    }

    /// `GET /usage-statistics`
    pub fn usage_statistics(&self) -> ManagerResult<UsageSnapshot> {
        self.get_json("usage-statistics")
            .map_err(ManagerError::network)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        // Non-2xx statuses surface as errors from `call`.
        let body = self
            .agent
            .get(url.as_str())
            .header(MANAGEMENT_KEY_HEADER, &self.key)
            .call()
            .with_context(|| format!("Failed to fetch {}", url))?
            .body_mut()
            .read_to_string()
            .context("Failed to read management response")?;

        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

/// `http://127.0.0.1:<port>/v0/management`
pub fn management_url(port: u16) -> String {
    format!("http://127.0.0.1:{}{}", port, MANAGEMENT_BASE_PATH)
}

#[cfg(test)]
#[path = "tests/api_client_tests.rs"]
mod tests;
