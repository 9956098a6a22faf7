//! Configuration knobs shared across the workspace, grouped the way the
//! original `sm_*` flags were grouped by subsystem. Each struct derives
//! `serde` so a deployment can load it from the TOML manifest the root
//! binary reads, with `Default` matching the documented defaults.

use serde::{Deserialize, Serialize};

/// Log sizing and flush behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub logdir: String,
    pub logsize_bytes: u64,
    pub log_page_flushers: usize,
    pub logbuf_seg_count: usize,
    pub logbuf_flush_trigger: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            logdir: "log".to_string(),
            logsize_bytes: 64 * 1024 * 1024,
            log_page_flushers: 1,
            logbuf_seg_count: 8,
            logbuf_flush_trigger: 1,
        }
    }
}

/// Archiver behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    pub archdir: String,
    pub workspace_size_bytes: u64,
    pub block_size_bytes: usize,
    pub bucket_size: usize,
    pub eager: bool,
    pub read_whole_blocks: bool,
    pub slow_log_grace_period_millis: u64,
    pub merge_factor: usize,
    pub async_merging: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            archdir: "archive".to_string(),
            workspace_size_bytes: 16 * 1024 * 1024,
            block_size_bytes: 1024 * 1024,
            bucket_size: 128,
            eager: true,
            read_whole_blocks: false,
            slow_log_grace_period_millis: 1000,
            merge_factor: 4,
            async_merging: true,
        }
    }
}

/// Buffer pool sizing and background cleaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    pub bufpoolsize_pages: usize,
    pub bufferpool_swizzle: bool,
    pub cleaner_interval_millis: u64,
    pub cleaner_write_buffer_pages: usize,
    pub num_page_writers: usize,
    pub backgroundflush: bool,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            bufpoolsize_pages: 4096,
            bufferpool_swizzle: false,
            cleaner_interval_millis: 1000,
            cleaner_write_buffer_pages: 64,
            num_page_writers: 1,
            backgroundflush: true,
        }
    }
}

/// Restart policy: instant vs. classical, log-based vs. page-based REDO.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub instant: bool,
    pub log_based_redo: bool,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            instant: true,
            log_based_redo: true,
        }
    }
}

/// Restore scheduling and segment sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub segsize_pages: usize,
    pub instant: bool,
    pub sched_singlepass: bool,
    pub sched_ondemand: bool,
    pub sched_random: bool,
    pub reuse_buffer: bool,
    pub multiple_segments: bool,
    pub min_read_size_bytes: usize,
    pub max_read_size_bytes: usize,
    pub preemptive: bool,
    pub backup_prefetcher_segments: usize,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            segsize_pages: 1024,
            instant: true,
            sched_singlepass: true,
            sched_ondemand: true,
            sched_random: false,
            reuse_buffer: true,
            multiple_segments: false,
            min_read_size_bytes: 64 * 1024,
            max_read_size_bytes: 8 * 1024 * 1024,
            preemptive: false,
            backup_prefetcher_segments: 4,
        }
    }
}

/// Lock manager sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub locktablesize: usize,
    pub rawlock_initial_trials: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            locktablesize: 1024,
            rawlock_initial_trials: 1,
        }
    }
}

/// Checkpoint policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub interval_secs: u64,
    pub preventive: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            preventive: true,
        }
    }
}

/// Top-level aggregate of every `sm_*` knob group, loadable from a single
/// TOML manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub log: LogConfig,
    pub archiver: ArchiverConfig,
    pub buffer_pool: BufferPoolConfig,
    pub restart: RestartConfig,
    pub restore: RestoreConfig,
    pub lock: LockConfig,
    pub checkpoint: CheckpointConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = StorageConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: StorageConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.log.logsize_bytes, config.log.logsize_bytes);
        assert_eq!(parsed.restore.segsize_pages, config.restore.segsize_pages);
    }

    #[test]
    fn partial_manifest_falls_back_to_defaults() {
        let text = "[archiver]\nmerge_factor = 8\n";
        let parsed: StorageConfig = toml::from_str(text).unwrap();
        assert_eq!(parsed.archiver.merge_factor, 8);
        assert_eq!(parsed.log.logsize_bytes, LogConfig::default().logsize_bytes);
    }
}
