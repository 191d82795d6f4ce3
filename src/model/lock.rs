//! `DistributedLock`: a row-backed lease used for cross-replica exclusion (§4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Workflow,
    Resource,
    Mutex,
    Business,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedLock {
    pub lock_key: String,
    pub owner: String,
    pub lock_type: LockType,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

impl DistributedLock {
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EngineInstance {
    pub instance_id: uuid::Uuid,
    pub hostname: String,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    pub active_workflows: u32,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
}
