use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    pub nas: NasConfig,
    #[serde(default)]
    pub users: UsersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
}

fn default_retention_days() -> u32 {
    30
}

fn default_prune_interval_secs() -> u64 {
    3600
}

/// Local-host counter sampling.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Deadline for every suspending call in one poll (counter read, echo, store).
    #[serde(default = "default_sample_timeout_ms")]
    pub timeout_ms: u64,
    /// Volume whose free space goes into each snapshot.
    #[serde(default = "default_volume")]
    pub volume: String,
    /// Echo target for the snapshot latency field; unset means no latency sample.
    #[serde(default)]
    pub latency_target: Option<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_sample_timeout_ms(),
            volume: default_volume(),
            latency_target: None,
        }
    }
}

fn default_sample_timeout_ms() -> u64 {
    5000
}

fn default_volume() -> String {
    "/".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NasConfig {
    /// Where the remote volume is mounted locally.
    pub mount_point: String,
    #[serde(default)]
    pub share_name: String,
    /// Loopback targets are replaced by the host behind the mount, when one can be found.
    #[serde(default)]
    pub latency_target: Option<String>,
    #[serde(default = "default_throughput_block_mb")]
    pub throughput_block_mb: u64,
    #[serde(default = "default_iops_operations")]
    pub iops_operations: u32,
    #[serde(default = "default_iops_block_size")]
    pub iops_block_size: usize,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_file_count_limit")]
    pub file_count_limit: u64,
    /// Only probe `mount_point` while it is a mount target. Disable for a local directory share.
    #[serde(default = "default_require_mount")]
    pub require_mount: bool,
}

fn default_require_mount() -> bool {
    true
}

fn default_throughput_block_mb() -> u64 {
    16
}

fn default_iops_operations() -> u32 {
    100
}

fn default_iops_block_size() -> usize {
    4096
}

fn default_ping_timeout_ms() -> u64 {
    800
}

fn default_io_timeout_ms() -> u64 {
    15_000
}

fn default_file_count_limit() -> u64 {
    100_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsersConfig {
    /// Users seen within this many seconds count as active.
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Local port of the file-share service whose sessions are the secondary signal.
    #[serde(default = "default_share_port")]
    pub share_port: u16,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            active_window_secs: default_active_window_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            share_port: default_share_port(),
        }
    }
}

fn default_active_window_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    5
}

fn default_share_port() -> u16 {
    445
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.database.prune_interval_secs > 0,
            "database.prune_interval_secs must be > 0, got {}",
            self.database.prune_interval_secs
        );
        anyhow::ensure!(
            self.sampling.timeout_ms > 0,
            "sampling.timeout_ms must be > 0, got {}",
            self.sampling.timeout_ms
        );
        anyhow::ensure!(
            !self.sampling.volume.is_empty(),
            "sampling.volume must be non-empty"
        );
        anyhow::ensure!(
            !self.nas.mount_point.is_empty(),
            "nas.mount_point must be non-empty"
        );
        anyhow::ensure!(
            self.nas.throughput_block_mb > 0,
            "nas.throughput_block_mb must be > 0, got {}",
            self.nas.throughput_block_mb
        );
        anyhow::ensure!(
            self.nas.iops_operations > 0,
            "nas.iops_operations must be > 0, got {}",
            self.nas.iops_operations
        );
        anyhow::ensure!(
            self.nas.iops_block_size > 0,
            "nas.iops_block_size must be > 0, got {}",
            self.nas.iops_block_size
        );
        anyhow::ensure!(
            self.nas.ping_timeout_ms > 0 && self.nas.ping_timeout_ms < 1000,
            "nas.ping_timeout_ms must be between 1 and 999, got {}",
            self.nas.ping_timeout_ms
        );
        anyhow::ensure!(
            self.nas.io_timeout_ms > 0,
            "nas.io_timeout_ms must be > 0, got {}",
            self.nas.io_timeout_ms
        );
        anyhow::ensure!(
            self.users.active_window_secs > 0,
            "users.active_window_secs must be > 0, got {}",
            self.users.active_window_secs
        );
        if let Some(ref schedule) = self.database.vacuum_schedule {
            anyhow::ensure!(
                <cron::Schedule as std::str::FromStr>::from_str(schedule).is_ok(),
                "database.vacuum_schedule is not a valid cron expression: {}",
                schedule
            );
        }
        Ok(())
    }
}
