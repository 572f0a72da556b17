//! Core error types.

use thiserror::Error;

/// Broad classification of a failure, used by the runtime when it files a
/// bug report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An event reached an empty machine stack or a monitor state that
    /// cannot process it.
    UnhandledEvent,
    /// A hot monitor state stayed hot past the temperature threshold.
    LivenessViolation,
    /// An explicit assertion or a structural invariant was violated.
    Assertion,
    /// A failure escaped a hook or action.
    WrappedFailure,
    /// A type catalogue or registry lookup was malformed.
    Declaration,
}

/// Errors from the machine and monitor engines.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("{actor} received event '{event}' that cannot be handled{}", in_state(.state))]
    UnhandledEvent {
        actor: String,
        state: Option<String>,
        event: String,
    },

    #[error(
        "{monitor} detected potential liveness bug in hot state '{state}' \
         (temperature {temperature}, threshold {threshold})"
    )]
    LivenessViolation {
        monitor: String,
        state: String,
        temperature: u64,
        threshold: u64,
    },

    #[error("assertion failed in {origin}: {message}")]
    AssertionFailed { origin: String, message: String },

    #[error("{machine}: mailbox already holds {queued} '{event}' event(s), bound is {bound}")]
    MailboxBoundExceeded {
        machine: String,
        event: String,
        queued: usize,
        bound: usize,
    },

    #[error("identifier space exhausted")]
    IdentifierOverflow,

    #[error("{origin} failed: {message}\n{trace}")]
    ActionFailed {
        origin: String,
        message: String,
        trace: String,
    },

    #[error("invalid declaration of '{type_name}': {reason}")]
    InvalidDeclaration { type_name: String, reason: String },

    #[error("state '{state}' is not declared by '{type_name}'")]
    UnknownState { type_name: String, state: String },

    #[error("machine type not registered: {type_name}")]
    UnknownMachineType { type_name: String },

    #[error("monitor type not registered: {type_name}")]
    UnknownMonitorType { type_name: String },

    #[error("machine not found: {id}")]
    MachineNotFound { id: u64 },

    #[error("catalogue for '{type_name}' was registered with a different data type")]
    CatalogTypeMismatch { type_name: String },
}

fn in_state(state: &Option<String>) -> String {
    match state {
        Some(s) => format!(" in state '{}'", s),
        None => String::new(),
    }
}

impl CoreError {
    /// Returns the failure taxonomy bucket for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            CoreError::UnhandledEvent { .. } => FailureKind::UnhandledEvent,
            CoreError::LivenessViolation { .. } => FailureKind::LivenessViolation,
            CoreError::AssertionFailed { .. }
            | CoreError::MailboxBoundExceeded { .. }
            | CoreError::IdentifierOverflow => FailureKind::Assertion,
            CoreError::ActionFailed { .. } => FailureKind::WrappedFailure,
            CoreError::InvalidDeclaration { .. }
            | CoreError::UnknownState { .. }
            | CoreError::UnknownMachineType { .. }
            | CoreError::UnknownMonitorType { .. }
            | CoreError::MachineNotFound { .. }
            | CoreError::CatalogTypeMismatch { .. } => FailureKind::Declaration,
        }
    }

    /// Returns a stable error code suitable for reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UnhandledEvent { .. } => "UNHANDLED_EVENT",
            CoreError::LivenessViolation { .. } => "LIVENESS_VIOLATION",
            CoreError::AssertionFailed { .. } => "ASSERTION_FAILED",
            CoreError::MailboxBoundExceeded { .. } => "MAILBOX_BOUND_EXCEEDED",
            CoreError::IdentifierOverflow => "IDENTIFIER_OVERFLOW",
            CoreError::ActionFailed { .. } => "ACTION_FAILED",
            CoreError::InvalidDeclaration { .. } => "INVALID_DECLARATION",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::UnknownMachineType { .. } => "UNKNOWN_MACHINE_TYPE",
            CoreError::UnknownMonitorType { .. } => "UNKNOWN_MONITOR_TYPE",
            CoreError::MachineNotFound { .. } => "MACHINE_NOT_FOUND",
            CoreError::CatalogTypeMismatch { .. } => "CATALOG_TYPE_MISMATCH",
        }
    }

    /// Returns whether this error is a bug in the modeled system, as
    /// opposed to a malformed registration by the harness.
    pub fn is_bug(&self) -> bool {
        self.kind() != FailureKind::Declaration
    }
}

/// Failures a hook or action can return.
///
/// Everything except [`ActionError::Cancelled`] is fatal to the run.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// Cooperative cancellation: halts the running machine only.
    #[error("cancelled")]
    Cancelled,

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Fatal(#[from] CoreError),
}

impl ActionError {
    /// Wraps any displayable failure.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        ActionError::Failed(reason.to_string())
    }
}

/// Return type of every hook and action.
pub type ActionResult = Result<(), ActionError>;
