//! Telemetry acquisition from the managed process.
//!
//! This module:
//! - Asks the management endpoint for accounts and usage while the proxy runs
//! - Falls back to scanning the auth directory when accounts can't be fetched
//! - Keeps the previous usage counters when usage can't be fetched
//! - Derives quotas from cached accounts through a [`quota::QuotaProvider`]
//!
//! Network failures are logged into the store and never returned.

pub mod api_client;
pub mod auth_scan;
pub mod quota;
pub mod types;

use crate::store::{LogLevel, StateStore};
use api_client::ManagementClient;
use std::path::Path;
use types::{AccountRecord, UsageSnapshot};

/// Refreshes the cached accounts and returns the new list.
///
/// `client` is `None` while the proxy is stopped, in which case the auth
/// directory is scanned without touching the network.
pub fn refresh_accounts(
    store: &StateStore,
    client: Option<&ManagementClient>,
    auth_dir: &Path,
) -> Vec<AccountRecord> {
    let accounts = match client.map(ManagementClient::auth_files) {
        None => auth_scan::scan_auth_dir(auth_dir),
        Some(Ok(accounts)) => {
            store.append_log(
                LogLevel::Debug,
                format!("Fetched {} auth files from API", accounts.len()),
            );
            accounts
        }
        Some(Err(e)) => {
            store.append_log(
                LogLevel::Warn,
                format!("{}; reading auth directory instead", e),
            );
            auth_scan::scan_auth_dir(auth_dir)
        }
    };

    store.mutate(|s| s.accounts = accounts.clone());
    accounts
}

/// Refreshes the cached usage statistics and returns the new snapshot.
///
/// While stopped the cache is reset to zeroed counters. A failed fetch keeps
/// the previous counters and only moves `updated_at` forward.
pub fn refresh_usage(store: &StateStore, client: Option<&ManagementClient>) -> UsageSnapshot {
    let Some(client) = client else {
        let usage = UsageSnapshot::empty();
        store.mutate(|s| s.usage = usage.clone());
        return usage;
    };

    match client.usage_statistics() {
        Ok(mut usage) => {
            usage.updated_at = chrono::Utc::now();
            store.mutate(|s| {
                s.usage = usage.clone();
                s.append_log(LogLevel::Debug, "Updated usage statistics");
            });
            usage
        }
        Err(e) => store.mutate(|s| {
            s.append_log(LogLevel::Warn, format!("{}; keeping previous usage", e));
            s.usage = s.usage.refreshed();
            s.usage.clone()
        }),
    }
}

#[cfg(test)]
#[path = "tests/fetcher_tests.rs"]
mod tests;
