//! Name → executor lookup (§4.4). Grounded on the teacher's `WorkflowRegistry`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{AnyExecutor, ExecutionContext, ExecutorError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown executor: {0}")]
    UnknownExecutor(String),

    #[error("executor already registered: {0}")]
    AlreadyRegistered(String),
}

/// Pluggable executors registered at engine startup by name. An executor
/// may be replaced between runs but never during a run (§6.1).
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn AnyExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn AnyExecutor>) -> Result<(), RegistryError> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    /// Replace (or insert) an executor registration unconditionally. Callers
    /// are responsible for only doing this between runs (§6.1).
    pub fn replace(&mut self, executor: Arc<dyn AnyExecutor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AnyExecutor>, RegistryError> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownExecutor(name.to_string()))
    }

    pub async fn execute(
        &self,
        name: &str,
        ctx: &ExecutionContext,
        input: Value,
    ) -> Result<Value, ExecutorError> {
        let executor = self
            .get(name)
            .map_err(|e| ExecutorError::NotFound(e.to_string()))?;
        executor.execute_json(ctx, input).await
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::wrap;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl crate::executor::Executor for Echo {
        const NAME: &'static str = "echo";
        type Input = Value;
        type Output = Value;

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            input: Self::Input,
        ) -> Result<Self::Output, ExecutorError> {
            Ok(input)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register(wrap(Echo)).unwrap();
        assert!(registry.contains("echo"));
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry.register(wrap(Echo)).unwrap();
        let err = registry.register(wrap(Echo)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn execute_roundtrips() {
        let mut registry = ExecutorRegistry::new();
        registry.register(wrap(Echo)).unwrap();
        let ctx = ExecutionContext::for_test();
        let out = registry
            .execute("echo", &ctx, serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"x": 1}));
    }
}
