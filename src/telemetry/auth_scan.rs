//! Reads accounts straight from the auth directory when the proxy can't be asked.

use super::types::{AccountRecord, AccountStatus, Provider};
use std::path::Path;

/// Filename prefixes, checked in order; the first match wins, so longer
/// prefixes that share a stem (`gemini-cli` vs `gemini`) come first.
pub const AUTH_FILE_PREFIXES: &[(&str, Provider)] = &[
    ("gemini-cli", Provider::Gemini),
    ("gemini", Provider::Gemini),
    ("claude", Provider::Claude),
    ("codex", Provider::Codex),
    ("qwen", Provider::Qwen),
    ("iflow", Provider::IFlow),
    ("antigravity", Provider::Antigravity),
    ("vertex", Provider::Vertex),
    ("kiro", Provider::Kiro),
    ("github-copilot", Provider::GithubCopilot),
    ("copilot", Provider::GithubCopilot),
    ("cursor", Provider::Cursor),
];

/// Provider assumed when no prefix matches.
pub const DEFAULT_PROVIDER: Provider = Provider::Gemini;

/// Splits `<prefix>-<email>.json` into its provider and email.
///
/// Unknown prefixes map to [`DEFAULT_PROVIDER`] with the whole stem as email.
pub fn parse_auth_file_name(file_name: &str) -> (Provider, String) {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);

    for (prefix, provider) in AUTH_FILE_PREFIXES {
        if let Some(email) = stem
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('-'))
        {
            return (*provider, email.to_string());
        }
    }

    (DEFAULT_PROVIDER, stem.to_string())
}

/// Lists every `*.json` auth file in `dir`, sorted by file name.
///
/// A missing or unreadable directory yields no accounts.
pub fn scan_auth_dir(dir: &Path) -> Vec<AccountRecord> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".json"))
        .collect();
    names.sort();

    names
        .into_iter()
        .map(|name| {
            let (provider, email) = parse_auth_file_name(&name);
            AccountRecord {
                id: name,
                display_name: email.clone(),
                provider,
                status: AccountStatus::Active,
                email,
                token: String::new(),
                expiry: None,
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/auth_scan_tests.rs"]
mod tests;
