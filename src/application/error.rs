use std::error::Error as StdError;

use thiserror::Error;

use crate::application::business::BusinessError;
use crate::application::tokens::TokenError;
use crate::cache::CacheError;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;
use crate::scheduler::SchedulerError;

/// Error chain flattened into messages, outermost first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Business(#[from] BusinessError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for a failed CLI command.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Token(TokenError::NotFound(_))
            | AppError::Business(BusinessError::NotFound { .. }) => 3,
            AppError::Token(TokenError::NotDue { .. }) => 4,
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Business(BusinessError::Validation(_)) => 2,
            AppError::Infra(InfraError::Configuration { .. }) => 78,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_due_has_distinct_exit_code() {
        let err = AppError::from(TokenError::NotDue {
            tenant: "T1".into(),
            due: time::OffsetDateTime::UNIX_EPOCH,
        });
        assert_eq!(err.exit_code(), 4);
        assert_eq!(
            AppError::from(DomainError::invalid("tenant", "must not be empty")).exit_code(),
            2
        );
    }

    #[test]
    fn report_walks_source_chain() {
        let err = AppError::Infra(InfraError::Io(std::io::Error::other("disk")));
        let report = ErrorReport::from_error("test", &err);
        assert_eq!(report.messages[0], "io error: disk");
    }
}
