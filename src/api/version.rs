//! Contract versioning between the API and the automation provider calling it.

use serde::Serialize;

use crate::{Error, Result};

pub const API_VERSION: &str = "1.0.0";
/// Oldest provider version this API accepts.
pub const MIN_PROVIDER_VERSION: &str = "1.0.0";

/// `MAJOR.MINOR.PATCH`; missing trailing parts read as zero, a leading `v`
/// and any pre-release or build suffix are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRequest(format!("invalid version '{}'", s));
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(invalid)?;

        let mut parts = [0u64; 3];
        let mut count = 0;
        for piece in core.split('.') {
            if count == parts.len() {
                return Err(invalid());
            }
            parts[count] = piece.parse().map_err(|_| invalid())?;
            count += 1;
        }
        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractInfo {
    pub api_version: String,
    pub min_provider_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_version: Option<String>,
    pub compatible: bool,
}

fn mismatch(requested: &str) -> Error {
    Error::ContractVersionMismatch {
        requested: requested.to_string(),
        provided: API_VERSION.to_string(),
        minimum: MIN_PROVIDER_VERSION.to_string(),
    }
}

/// A provider is compatible when it shares the API's major version and is
/// not older than the minimum.
///
/// # Errors
/// `ContractVersionMismatch` otherwise, including for unparseable versions.
pub fn check_compatible(provider_version: &str) -> Result<()> {
    let provider: Version = provider_version
        .parse()
        .map_err(|_| mismatch(provider_version))?;
    let api: Version = API_VERSION.parse()?;
    let minimum: Version = MIN_PROVIDER_VERSION.parse()?;
    if provider.major != api.major || provider < minimum {
        return Err(mismatch(provider_version));
    }
    Ok(())
}

pub fn contract_info(provider_version: Option<&str>) -> Result<ContractInfo> {
    if let Some(v) = provider_version {
        check_compatible(v)?;
    }
    Ok(ContractInfo {
        api_version: API_VERSION.to_string(),
        min_provider_version: MIN_PROVIDER_VERSION.to_string(),
        provider_version: provider_version.map(String::from),
        compatible: true,
    })
}
