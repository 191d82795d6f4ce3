//! Workflow definitions: the immutable, versioned graph template.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One node in a workflow graph.
///
/// `nodeId` is unique within its owning [`WorkflowDefinition`]; it is not a
/// database primary key, just an adjacency-list label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDefinition {
    pub node_id: String,
    pub node_type: NodeType,

    /// Name of the registered executor to invoke. Required for `simple` nodes;
    /// unused by composite node types, which dispatch internally.
    pub executor: Option<String>,

    pub depends_on: Vec<String>,

    #[serde(default)]
    pub max_retries: u32,

    pub timeout_seconds: Option<u64>,

    /// `${path}`-templated boolean expression gating whether this node runs.
    pub condition: Option<String>,

    #[serde(default)]
    pub input_data: HashMap<String, Value>,

    #[serde(default)]
    pub error_handling: ErrorHandling,

    /// Present for `parallel` nodes: one sub-definition per branch.
    #[serde(default)]
    pub branches: Vec<NodeDefinition>,

    /// Present for `parallel` nodes.
    pub join_type: Option<JoinType>,

    /// Present for `parallel`/`loop` nodes.
    pub max_concurrency: Option<usize>,

    /// Present for `loop` nodes: fixed iteration count.
    pub loop_count: Option<usize>,

    /// Present for `loop` nodes: `${path}` expression resolving to an array.
    pub source_expression: Option<String>,

    /// Body of a `loop` node's single iteration.
    pub loop_body: Option<Box<NodeDefinition>>,

    /// Present for `subprocess` nodes.
    pub subprocess: Option<SubprocessSpec>,
}

impl NodeDefinition {
    pub fn simple(node_id: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: NodeType::Simple,
            executor: Some(executor.into()),
            depends_on: Vec::new(),
            max_retries: 0,
            timeout_seconds: None,
            condition: None,
            input_data: HashMap::new(),
            error_handling: ErrorHandling::default(),
            branches: Vec::new(),
            join_type: None,
            max_concurrency: None,
            loop_count: None,
            source_expression: None,
            loop_body: None,
            subprocess: None,
        }
    }

    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input_data.insert(key.into(), value);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Simple,
    Parallel,
    Loop,
    Subprocess,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    All,
    Any,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    #[default]
    Stop,
    Continue,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubprocessSpec {
    pub workflow_definition_name: String,
    pub workflow_definition_version: Option<i32>,
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub wait_for_completion: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub value_type: String,
    pub default: Option<Value>,
    pub validation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSpec {
    pub name: String,
    pub value_type: String,
    /// `${path}` expression referencing the instance's `contextData`.
    pub source: String,
}

/// Immutable, versioned workflow graph template.
///
/// Identity is `(name, version)`; a new version is always a new row, never
/// an in-place mutation of an existing one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: i64,
    pub name: String,
    pub version: i32,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowDefinition {
    /// Build an arena-style lookup from node id to its definition, as §9
    /// requires ("do not rely on in-memory cyclic references").
    pub fn node_map(&self) -> HashMap<&str, &NodeDefinition> {
        self.nodes.iter().map(|n| (n.node_id.as_str(), n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_map_indexes_by_id() {
        let def = WorkflowDefinition {
            id: 1,
            name: "t".into(),
            version: 1,
            nodes: vec![
                NodeDefinition::simple("a", "echo"),
                NodeDefinition::simple("b", "echo").with_depends_on(["a"]),
            ],
            inputs: vec![],
            outputs: vec![],
            created_at: chrono::Utc::now(),
        };
        let map = def.node_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["b"].depends_on, vec!["a".to_string()]);
    }
}
