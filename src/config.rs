//! Engine configuration.
//!
//! Every section has sensible defaults, so an empty YAML document yields a
//! working configuration. Durations are expressed in milliseconds in the
//! serialized form (`ttl_ms`, `sweep_interval_ms`, ...).
//!
//! # Example
//! ```rust
//! use bastion_policy::EngineConfig;
//!
//! let config = EngineConfig::from_yaml_str(
//!     "scope_cache:\n  ttl_ms: 5000\naudit:\n  queue_capacity: 256\n",
//! )
//! .unwrap();
//! assert_eq!(config.scope_cache.ttl_ms, 5000);
//! assert_eq!(config.pattern_cache.max_size, 1000);
//! ```

use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Compiled regex cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternCacheConfig {
    /// Maximum number of compiled patterns kept.
    ///
    /// **Default**: 1000
    pub max_size: usize,
}

impl Default for PatternCacheConfig {
    fn default() -> Self {
        Self { max_size: 1000 }
    }
}

/// Attribute cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeCacheConfig {
    /// Maximum number of cached entities across users and assets.
    pub max_size: usize,
    /// How long fetched attributes are trusted.
    pub ttl_ms: u64,
    /// Minimum time between two sweeps of expired entries.
    pub sweep_interval_ms: u64,
}

impl ScopeCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for ScopeCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl_ms: 30_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Rule snapshot cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCacheConfig {
    /// Upper bound on snapshot age, on top of version-based invalidation.
    pub ttl_ms: u64,
}

impl RuleCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for RuleCacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 10_000 }
    }
}

/// Audit queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Records buffered before the oldest one is dropped.
    pub queue_capacity: usize,
    /// How long an evaluation may wait for queue space before dropping.
    /// Zero never waits.
    pub enqueue_timeout_ms: u64,
    /// Disabled auditing discards records without queueing them.
    pub enabled: bool,
}

impl AuditConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            enqueue_timeout_ms: 0,
            enabled: true,
        }
    }
}

/// Top-level engine configuration.
///
/// # Example
/// ```rust
/// use bastion_policy::EngineConfig;
///
/// let config = EngineConfig::high_throughput().with_metrics(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pattern_cache: PatternCacheConfig,
    pub scope_cache: ScopeCacheConfig,
    pub rule_cache: RuleCacheConfig,
    pub audit: AuditConfig,
    /// Collect latency and counter metrics during evaluation.
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pattern_cache: PatternCacheConfig::default(),
            scope_cache: ScopeCacheConfig::default(),
            rule_cache: RuleCacheConfig::default(),
            audit: AuditConfig::default(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Larger caches and a deeper audit queue for busy bastions.
    pub fn high_throughput() -> Self {
        Self {
            pattern_cache: PatternCacheConfig { max_size: 5000 },
            scope_cache: ScopeCacheConfig {
                max_size: 50_000,
                ttl_ms: 60_000,
                sweep_interval_ms: 120_000,
            },
            rule_cache: RuleCacheConfig { ttl_ms: 30_000 },
            audit: AuditConfig {
                queue_capacity: 8192,
                ..Default::default()
            },
            enable_metrics: true,
        }
    }

    /// Small caches for constrained deployments.
    pub fn low_memory() -> Self {
        Self {
            pattern_cache: PatternCacheConfig { max_size: 200 },
            scope_cache: ScopeCacheConfig {
                max_size: 1000,
                ttl_ms: 15_000,
                sweep_interval_ms: 30_000,
            },
            rule_cache: RuleCacheConfig::default(),
            audit: AuditConfig {
                queue_capacity: 128,
                ..Default::default()
            },
            enable_metrics: false,
        }
    }

    /// Short TTLs so edits show up almost immediately.
    pub fn development() -> Self {
        Self {
            pattern_cache: PatternCacheConfig::default(),
            scope_cache: ScopeCacheConfig {
                max_size: 1000,
                ttl_ms: 1000,
                sweep_interval_ms: 2000,
            },
            rule_cache: RuleCacheConfig { ttl_ms: 1000 },
            audit: AuditConfig {
                queue_capacity: 64,
                enqueue_timeout_ms: 10,
                enabled: true,
            },
            enable_metrics: true,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Reject sizes and durations that would disable a cache outright.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.pattern_cache.max_size == 0, "pattern_cache.max_size must be positive"),
            (self.scope_cache.max_size == 0, "scope_cache.max_size must be positive"),
            (self.scope_cache.ttl_ms == 0, "scope_cache.ttl_ms must be positive"),
            (
                self.scope_cache.sweep_interval_ms == 0,
                "scope_cache.sweep_interval_ms must be positive",
            ),
            (self.rule_cache.ttl_ms == 0, "rule_cache.ttl_ms must be positive"),
            (self.audit.queue_capacity == 0, "audit.queue_capacity must be positive"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(PolicyError::Config((*message).to_string())),
            None => Ok(()),
        }
    }

    pub fn with_pattern_cache_size(mut self, size: usize) -> Self {
        self.pattern_cache.max_size = size;
        self
    }

    pub fn with_scope_ttl(mut self, ttl: Duration) -> Self {
        self.scope_cache.ttl_ms = duration_ms(ttl);
        self
    }

    pub fn with_rule_ttl(mut self, ttl: Duration) -> Self {
        self.rule_cache.ttl_ms = duration_ms(ttl);
        self
    }

    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit.queue_capacity = capacity;
        self
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit.enabled = enabled;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
