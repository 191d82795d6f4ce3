//! Crate-wide error kinds (§7).
//!
//! Each subsystem defines its own `thiserror` enum (`StoreError`, `LockError`,
//! `SchedulerError`, `TemplateError`, `ExecutorError`, `RegistryError`); this
//! module composes them into one boundary type via `#[from]`, the way the
//! teacher crate layers `PollerError`/`WorkerPoolError` over `StoreError`.

use crate::executor::{ExecutorError, RegistryError};
use crate::lock::LockError;
use crate::scheduler::SchedulerError;
use crate::store::StoreError;
use crate::template::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("illegal state transition: {from} -> {to}")]
    StateTransition { from: String, to: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("engine lost: {0}")]
    EngineLost(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller may retry the operation as-is.
    ///
    /// Mirrors §7's `retryable` flag, expressed as a method rather than a
    /// field threaded through every variant.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Timeout(_) | Self::EngineLost(_) => true,
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::StateTransition { .. } => false,
            Self::Lock(_) | Self::Scheduler(_) | Self::Template(_) | Self::Executor(_) | Self::Registry(_) => {
                false
            }
            Self::Internal(_) => false,
        }
    }

    /// Stable string code surfaced at the API boundary (§7).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::StateTransition { .. } => "state_transition",
            Self::Store(_) => "database",
            Self::Lock(_) => "conflict",
            Self::Scheduler(_) => "internal",
            Self::Template(_) => "validation",
            Self::Executor(_) => "executor_failed",
            Self::Registry(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::EngineLost(_) => "engine_lost",
            Self::Internal(_) => "internal",
        }
    }
}
