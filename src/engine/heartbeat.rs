//! Background heartbeat ticker (§4.5 step 3): renews `lastHeartbeat` and
//! extends the instance lock TTL every `heartbeat_interval`, following the
//! teacher's `tokio::time::interval` background-loop idiom.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::lock::DistributedLockManager;
use crate::store::WorkflowStore;

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    store: Arc<dyn WorkflowStore>,
    locks: Arc<DistributedLockManager>,
    instance_id: i64,
    lock_key: String,
    interval: Duration,
    lock_ttl: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.heartbeat_instance(instance_id, Utc::now()).await {
                        warn!(%instance_id, error = %e, "heartbeat write failed");
                    }
                    if let Err(e) = locks.renew(&lock_key, lock_ttl).await {
                        warn!(%instance_id, error = %e, "lock renewal failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}
