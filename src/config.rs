//! Engine-wide configuration (§10.3 of SPEC_FULL.md).
//!
//! Follows the teacher's builder-struct idiom (`ExecutorConfig`,
//! `WorkerPoolConfig`, `PollerConfig`): a `Default` impl carrying the spec's
//! stated typicals, plus `with_*` methods. `dotenvy` loads a `.env` file for
//! local development; `config` layers environment variables over the
//! defaults for deployed settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Size of the bounded pool of instance-advancement workers.
    /// Default: CPU count × 4 (§5).
    pub worker_pool_size: usize,

    /// TTL of the `workflow:instance:<id>` lock. Typical 120s (§4.5 step 1).
    #[serde(with = "duration_millis")]
    pub instance_lock_ttl: Duration,

    /// Heartbeat renewal interval. Typical 30s, at least 3x smaller than
    /// `instance_lock_ttl` (§4.5 step 3).
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Scheduler scan period. Typical 5s (§4.6).
    #[serde(with = "duration_millis")]
    pub scheduler_scan_period: Duration,

    /// Recovery scan period. Typical 60s, never less frequent than
    /// `heartbeat_timeout * 1.5` (§4.8).
    #[serde(with = "duration_millis")]
    pub recovery_scan_period: Duration,

    /// How long a running instance may go without a heartbeat before
    /// Recovery considers its engine dead.
    #[serde(with = "duration_millis")]
    pub heartbeat_timeout: Duration,

    /// TTL for the `scheduler:leader` lock.
    #[serde(with = "duration_millis")]
    pub scheduler_leader_lock_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: num_cpus() * 4,
            instance_lock_ttl: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(30),
            scheduler_scan_period: Duration::from_secs(5),
            recovery_scan_period: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(90),
            scheduler_leader_lock_ttl: Duration::from_secs(15),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    pub fn with_instance_lock_ttl(mut self, ttl: Duration) -> Self {
        self.instance_lock_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_scheduler_scan_period(mut self, period: Duration) -> Self {
        self.scheduler_scan_period = period;
        self
    }

    pub fn with_recovery_scan_period(mut self, period: Duration) -> Self {
        self.recovery_scan_period = period.max(self.heartbeat_timeout.mul_f64(1.5));
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Load configuration from environment, layered over [`Default`], using
    /// the `STRATIX_DURABLE__` prefix (double underscore nesting separator).
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(
                config::Environment::with_prefix("STRATIX_DURABLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        settings.try_deserialize()
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
