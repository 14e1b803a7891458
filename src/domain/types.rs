//! Shared domain enumerations aligned with persisted database enums.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::Type;

use super::error::DomainError;

const MAX_EXTERNAL_ID_LEN: usize = 255;

/// Validate an identifier issued by the provider, returning it trimmed.
pub fn external_id<'a>(field: &'static str, value: &'a str) -> Result<&'a str, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid(field, "must not be empty"));
    }
    if trimmed.len() > MAX_EXTERNAL_ID_LEN {
        return Err(DomainError::invalid(
            field,
            format!("must be at most {MAX_EXTERNAL_ID_LEN} bytes"),
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(DomainError::invalid(field, "must not contain control characters"));
    }
    Ok(trimmed)
}

/// Persisted state of a tenant's refresh record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "refresh_status", rename_all = "snake_case")]
pub enum RefreshStatus {
    Active,
    Failed,
    Expired,
}

impl RefreshStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Terminal records are eligible for purging once past the retention window.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Expired)
    }
}

impl Display for RefreshStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown refresh status `{other}`")),
        }
    }
}

/// Derived classification of a credential by time remaining until expiry.
///
/// `Refreshing` is transient and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenHealth {
    Active,
    NeedsRefresh,
    Refreshing,
    Failed,
    Expired,
}

impl TokenHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::NeedsRefresh => "needs_refresh",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

/// Severity used by the periodic expiry monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryAlert {
    Critical,
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RefreshStatus::Active.is_terminal());
        assert!(RefreshStatus::Failed.is_terminal());
        assert!(RefreshStatus::Expired.is_terminal());
    }

    #[test]
    fn external_ids_are_trimmed_and_checked() {
        assert_eq!(external_id("tenant", "  C-100 ").expect("valid"), "C-100");
        assert!(matches!(
            external_id("tenant", "   "),
            Err(DomainError::Validation { field: "tenant", .. })
        ));
        assert!(external_id("tenant", "a\nb").is_err());
        assert!(external_id("tenant", &"x".repeat(256)).is_err());
    }

    #[test]
    fn status_parses_from_persisted_text() {
        assert_eq!("failed".parse::<RefreshStatus>(), Ok(RefreshStatus::Failed));
        assert!("paused".parse::<RefreshStatus>().is_err());
    }
}
