//! Per-account quota records.
//!
//! The management API has no quota endpoint yet, so quotas come from a
//! [`QuotaProvider`]. The default provider derives placeholder numbers from
//! the cached accounts without any I/O.

use super::types::{AccountRecord, Provider};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Percent above which an account is reported as exceeded.
pub const EXCEEDED_PERCENT: f64 = 90.0;
/// Percent above which an account is reported as warning.
pub const WARNING_PERCENT: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Ok,
    Warning,
    Exceeded,
}

impl QuotaStatus {
    pub fn from_percent(percent: f64) -> Self {
        if percent > EXCEEDED_PERCENT {
            QuotaStatus::Exceeded
        } else if percent > WARNING_PERCENT {
            QuotaStatus::Warning
        } else {
            QuotaStatus::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub account_id: String,
    pub account_name: String,
    pub provider: Provider,
    pub used: u64,
    pub limit: u64,
    pub usage_percent: f64,
    pub status: QuotaStatus,
    pub reset_time: Option<DateTime<Utc>>,
}

impl QuotaRecord {
    /// Builds a record for `account`, deriving percent and status from the numbers.
    pub fn for_account(
        account: &AccountRecord,
        used: u64,
        limit: u64,
        reset_time: Option<DateTime<Utc>>,
    ) -> Self {
        let usage_percent = if limit == 0 {
            0.0
        } else {
            used as f64 * 100.0 / limit as f64
        };
        Self {
            account_id: account.id.clone(),
            account_name: account.display_name.clone(),
            provider: account.provider,
            used,
            limit,
            usage_percent,
            status: QuotaStatus::from_percent(usage_percent),
            reset_time,
        }
    }
}

/// Source of quota records for a set of accounts. Must not block.
pub trait QuotaProvider: Send + Sync {
    fn quotas(&self, accounts: &[AccountRecord]) -> Vec<QuotaRecord>;
}

/// Placeholder provider: `used = 1000 + 100 * len(id)` against a 10k limit,
/// resetting a day from now.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedQuotaProvider;

impl DerivedQuotaProvider {
    pub const LIMIT: u64 = 10_000;
}

impl QuotaProvider for DerivedQuotaProvider {
    fn quotas(&self, accounts: &[AccountRecord]) -> Vec<QuotaRecord> {
        let reset_time = Utc::now() + Duration::hours(24);
        accounts
            .iter()
            .map(|account| {
                let used = 1000 + account.id.len() as u64 * 100;
                QuotaRecord::for_account(account, used, Self::LIMIT, Some(reset_time))
            })
            .collect()
    }
}
