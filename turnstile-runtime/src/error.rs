//! Runtime error types.

use crate::config::ConfigError;
use thiserror::Error;
use turnstile_core::{CoreError, FailureKind};

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("machine type '{0}' is already registered")]
    DuplicateMachineType(String),

    #[error("monitor type '{0}' is already registered")]
    DuplicateMonitorType(String),

    #[error("machine '{0}' has private data of a different type")]
    DataTypeMismatch(String),
}

impl RuntimeError {
    /// Returns the error code as a string.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Core(e) => e.error_code(),
            RuntimeError::Config(_) => "CONFIG_ERROR",
            RuntimeError::DuplicateMachineType(_) => "DUPLICATE_MACHINE_TYPE",
            RuntimeError::DuplicateMonitorType(_) => "DUPLICATE_MONITOR_TYPE",
            RuntimeError::DataTypeMismatch(_) => "DATA_TYPE_MISMATCH",
        }
    }

    /// Returns whether this error is a bug in the modelled system rather
    /// than a misuse of the runtime.
    pub fn is_bug(&self) -> bool {
        match self {
            RuntimeError::Core(e) => e.is_bug(),
            _ => false,
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            RuntimeError::Core(e) => Some(e.kind()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_pass_through() {
        let err = RuntimeError::from(CoreError::IdentifierOverflow);
        assert_eq!(err.error_code(), "IDENTIFIER_OVERFLOW");
        assert!(err.is_bug());
        assert_eq!(err.kind(), Some(FailureKind::Assertion));

        let err = RuntimeError::DuplicateMachineType("Server".to_string());
        assert_eq!(err.error_code(), "DUPLICATE_MACHINE_TYPE");
        assert!(!err.is_bug());
        assert_eq!(err.kind(), None);
    }
}
