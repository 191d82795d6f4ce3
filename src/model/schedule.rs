//! Cron-triggered instance factories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub workflow_definition_id: Option<i64>,
    pub executor_name: Option<String>,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub max_instances: u32,
    pub input_data: Value,
    pub context_data: Value,
    pub business_key: Option<String>,
    pub mutex_key: Option<String>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleExecutionStatus {
    Success,
    Failed,
    Timeout,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleExecution {
    pub id: i64,
    pub schedule_id: i64,
    pub workflow_instance_id: Option<i64>,
    pub fired_at: DateTime<Utc>,
    pub status: ScheduleExecutionStatus,
    pub error: Option<String>,
}
