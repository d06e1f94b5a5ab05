//! Orchestrator policy metadata and its validation.
//!
//! Every mutating call names the automation that issued it. The metadata is
//! checked for completeness and for values that look like credentials;
//! errors name the offending field but never repeat its value.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorPolicy {
    #[serde(default)]
    pub orchestrator_id: Option<String>,
    #[serde(default)]
    pub orchestrator_version: Option<String>,
    #[serde(default)]
    pub agent_family: Option<String>,
    #[serde(default)]
    pub approval_mode: Option<String>,
    #[serde(default)]
    pub sandbox_mode: Option<String>,
    #[serde(default)]
    pub network_mode: Option<String>,
    /// May be empty, but must be present.
    #[serde(default)]
    pub dangerous_flags: Option<Vec<String>>,
}

/// Well-known API token shapes.
static TOKEN_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(sk-[A-Za-z0-9_-]{16,}|gh[pousr]_[A-Za-z0-9]{20,}|github_pat_[A-Za-z0-9_]{20,}|xox[abprs]-[A-Za-z0-9-]{10,}|AKIA[0-9A-Z]{16}|glpat-[A-Za-z0-9_-]{20,}|AIza[0-9A-Za-z_-]{35})",
    )
    .unwrap()
});

static PRIVATE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap());

/// `password=...`, `api_key: ...` and the like.
static ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|passwd|pwd|secret|token|api[_-]?key|access[_-]?key|auth|credentials?)\s*[=:]\s*\S+")
        .unwrap()
});

const ENTROPY_MIN_LEN: usize = 24;
const ENTROPY_THRESHOLD: f64 = 4.0;

/// Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

/// A long run of mixed-case letters and digits with near-random spread.
fn is_high_entropy(token: &str) -> bool {
    token.chars().count() >= ENTROPY_MIN_LEN
        && token.chars().any(|c| c.is_ascii_lowercase())
        && token.chars().any(|c| c.is_ascii_uppercase())
        && token.chars().any(|c| c.is_ascii_digit())
        && shannon_entropy(token) >= ENTROPY_THRESHOLD
}

/// Why `value` looks like a secret, if it does.
pub fn secret_reason(value: &str) -> Option<&'static str> {
    if PRIVATE_KEY_RE.is_match(value) {
        return Some("value contains a private key block");
    }
    if TOKEN_PREFIX_RE.is_match(value) {
        return Some("value matches a known access token format");
    }
    if ASSIGNMENT_RE.is_match(value) {
        return Some("value contains a credential assignment");
    }
    if value.split_whitespace().any(is_high_entropy) {
        return Some("value contains a high-entropy string");
    }
    None
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl OrchestratorPolicy {
    fn scalar_fields(&self) -> [(&'static str, &Option<String>); 6] {
        [
            ("orchestrator_id", &self.orchestrator_id),
            ("orchestrator_version", &self.orchestrator_version),
            ("agent_family", &self.agent_family),
            ("approval_mode", &self.approval_mode),
            ("sandbox_mode", &self.sandbox_mode),
            ("network_mode", &self.network_mode),
        ]
    }

    /// Names of required fields that are absent or blank.
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .scalar_fields()
            .iter()
            .filter(|(_, value)| blank(value))
            .map(|(name, _)| name.to_string())
            .collect();
        if self.dangerous_flags.is_none() {
            missing.push("dangerous_flags".to_string());
        }
        missing
    }

    /// # Errors
    /// - `PolicyMetadataRequired` listing every missing field
    /// - `PolicyValidationFailed` naming the first field holding a
    ///   secret-shaped value
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(Error::PolicyMetadataRequired { missing });
        }

        for (name, value) in self.scalar_fields() {
            if let Some(reason) = value.as_deref().and_then(secret_reason) {
                return Err(Error::PolicyValidationFailed {
                    field: name.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        for (i, flag) in self.dangerous_flags.iter().flatten().enumerate() {
            if let Some(reason) = secret_reason(flag) {
                return Err(Error::PolicyValidationFailed {
                    field: format!("dangerous_flags[{}]", i),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Validate the policy attached to a mutating call; no policy at all is
/// reported as every field missing.
pub fn require_policy(policy: Option<&OrchestratorPolicy>) -> Result<()> {
    match policy {
        Some(policy) => policy.validate(),
        None => OrchestratorPolicy::default().validate(),
    }
}
