use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Tuple slots per tile group. Every tile group of a table has this
    /// fixed capacity; a full group triggers allocation of the next one.
    pub tuples_per_tile_group: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tuples_per_tile_group: 1000,
        }
    }
}

/// Commit-log collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether transaction lifecycle records are emitted at all.
    pub enabled: bool,
    /// Synchronous commit: block the committing transaction until the
    /// backend logger reports the COMMIT record flushed.
    pub sync_commit: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_commit: false,
        }
    }
}

/// GC collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// Whether sweeps reclaim slots at all.
    pub enabled: bool,
    /// Interval between sweeps (milliseconds); the collaborator's cadence.
    pub interval_ms: u64,
    /// Maximum slots reclaimed per sweep (0 = unlimited).
    pub batch_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000, // 1 second
            batch_size: 0,     // unlimited
        }
    }
}
