//! Executor Registry and Executor contract (§4.4).
//!
//! Mirrors the teacher's `Workflow`/`AnyWorkflow`/`WorkflowWrapper`/
//! `WorkflowRegistry` split: a typed [`Executor`] trait for ergonomic
//! implementation, an object-safe [`AnyExecutor`] trait for storage, and
//! an [`ExecutorRegistry`] mapping names to `Arc<dyn AnyExecutor>`.

mod context;
mod registry;

pub use context::{ExecutionContext, ExecutionResult, ProgressCallback};
pub use registry::{ExecutorRegistry, RegistryError};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Ergonomic, typed contract for one named executor.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Unique registration name.
    const NAME: &'static str;

    type Input: serde::de::DeserializeOwned + Send;
    type Output: serde::Serialize + Send;

    fn description(&self) -> &'static str {
        ""
    }

    fn version(&self) -> &'static str {
        "1"
    }

    /// Optional static validation of a node's `inputData` shape before the
    /// run starts.
    fn validate_config(&self, _config: &Value) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        input: Self::Input,
    ) -> Result<Self::Output, ExecutorError>;

    /// Best-effort liveness probe, used by the admin surface (§6.2).
    async fn health_check(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// Object-safe counterpart of [`Executor`], storing JSON in and out so the
/// registry can hold heterogeneous executors behind one trait object.
#[async_trait]
pub trait AnyExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn validate_config(&self, config: &Value) -> Result<(), ExecutorError>;
    async fn execute_json(&self, ctx: &ExecutionContext, input: Value) -> Result<Value, ExecutorError>;
    async fn health_check(&self) -> Result<(), ExecutorError>;
}

struct ExecutorWrapper<E: Executor> {
    inner: E,
}

#[async_trait]
impl<E: Executor> AnyExecutor for ExecutorWrapper<E> {
    fn name(&self) -> &'static str {
        E::NAME
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn version(&self) -> &'static str {
        self.inner.version()
    }

    fn validate_config(&self, config: &Value) -> Result<(), ExecutorError> {
        self.inner.validate_config(config)
    }

    async fn execute_json(&self, ctx: &ExecutionContext, input: Value) -> Result<Value, ExecutorError> {
        let typed_input: E::Input = serde_json::from_value(input)
            .map_err(|e| ExecutorError::InvalidInput(e.to_string()))?;
        let output = self.inner.execute(ctx, typed_input).await?;
        serde_json::to_value(output).map_err(|e| ExecutorError::Serialization(e.to_string()))
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        self.inner.health_check().await
    }
}

pub fn wrap<E: Executor>(inner: E) -> Arc<dyn AnyExecutor> {
    Arc::new(ExecutorWrapper { inner })
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("executor failed: {message}")]
    Failed {
        message: String,
        should_retry: bool,
    },

    #[error("executor timed out")]
    Timeout,

    #[error("executor cancelled")]
    Cancelled,
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            should_retry: true,
        }
    }

    pub fn failed_non_retryable(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            should_retry: false,
        }
    }

    pub fn should_retry(&self) -> bool {
        match self {
            Self::Failed { should_retry, .. } => *should_retry,
            Self::Timeout => true,
            Self::NotFound(_)
            | Self::InvalidInput(_)
            | Self::InvalidConfig(_)
            | Self::Serialization(_)
            | Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Executor for Echo {
        const NAME: &'static str = "echo";
        type Input = serde_json::Value;
        type Output = serde_json::Value;

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            input: Self::Input,
        ) -> Result<Self::Output, ExecutorError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn wrapped_executor_roundtrips_json() {
        let wrapped = wrap(Echo);
        let ctx = ExecutionContext::for_test();
        let out = wrapped
            .execute_json(&ctx, serde_json::json!({"msg": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"msg": "hi"}));
    }

    #[test]
    fn failed_non_retryable_is_not_retryable() {
        let err = ExecutorError::failed_non_retryable("bad input");
        assert!(!err.should_retry());
    }
}
