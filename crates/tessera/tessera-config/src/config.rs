use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tessera_ipc::ReceiverStart;

#[derive(Deserialize, Debug, Clone)]
pub struct TesseraConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Directory the region files live in; `/dev/shm` keeps them in RAM.
    #[serde(default = "defaults::dir")]
    pub dir: PathBuf,
    #[serde(default = "defaults::idle_sleep_us")]
    pub idle_sleep_us: u64,
    #[serde(default)]
    pub ring_buffer: RingBufferConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub counters: CountersConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RingBufferConfig {
    #[serde(default = "defaults::ring_buffer_file")]
    pub file: String,
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    /// How long the consumer may see no progress with bytes pending before
    /// it calls `unblock`.
    #[serde(default = "defaults::unblock_timeout_ms")]
    pub unblock_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BroadcastConfig {
    #[serde(default = "defaults::broadcast_file")]
    pub file: String,
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub receiver_start: ReceiverStartConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CountersConfig {
    #[serde(default = "defaults::counters_file")]
    pub file: String,
    #[serde(default = "defaults::max_counters")]
    pub max_counters: usize,
    #[serde(default)]
    pub reuse_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverStartConfig {
    #[default]
    Origin,
    Latest,
    Tail,
}

impl From<ReceiverStartConfig> for ReceiverStart {
    fn from(value: ReceiverStartConfig) -> Self {
        match value {
            ReceiverStartConfig::Origin => ReceiverStart::Origin,
            ReceiverStartConfig::Latest => ReceiverStart::Latest,
            ReceiverStartConfig::Tail => ReceiverStart::Tail,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

mod defaults {
    use std::path::PathBuf;

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn dir() -> PathBuf {
        PathBuf::from("/dev/shm/tessera")
    }

    pub fn idle_sleep_us() -> u64 {
        50
    }

    pub fn ring_buffer_file() -> String {
        "to-relay.ring".into()
    }

    pub fn broadcast_file() -> String {
        "from-relay.bcast".into()
    }

    pub fn counters_file() -> String {
        "counters.dat".into()
    }

    pub fn capacity() -> usize {
        1 << 20
    }

    pub fn unblock_timeout_ms() -> u64 {
        1_000
    }

    pub fn max_counters() -> usize {
        1024
    }
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            file: defaults::ring_buffer_file(),
            capacity: defaults::capacity(),
            unblock_timeout_ms: defaults::unblock_timeout_ms(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            file: defaults::broadcast_file(),
            capacity: defaults::capacity(),
            receiver_start: ReceiverStartConfig::default(),
        }
    }
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            file: defaults::counters_file(),
            max_counters: defaults::max_counters(),
            reuse_timeout_ms: 0,
        }
    }
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            dir: defaults::dir(),
            idle_sleep_us: defaults::idle_sleep_us(),
            ring_buffer: RingBufferConfig::default(),
            broadcast: BroadcastConfig::default(),
            counters: CountersConfig::default(),
        }
    }
}

impl TesseraConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let toml_to_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    /// Parses and validates a TOML document.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: TesseraConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_capacity("ring_buffer.capacity", self.ring_buffer.capacity)?;
        check_capacity("broadcast.capacity", self.broadcast.capacity)?;

        if self.counters.max_counters == 0 {
            return Err(ConfigError::Invalid {
                field: "counters.max_counters",
                reason: "must be at least 1".into(),
            });
        }
        if self.counters.max_counters > i32::MAX as usize {
            return Err(ConfigError::Invalid {
                field: "counters.max_counters",
                reason: format!("must not exceed {}", i32::MAX),
            });
        }
        Ok(())
    }

    pub fn ring_buffer_path(&self) -> PathBuf {
        self.dir.join(&self.ring_buffer.file)
    }

    pub fn broadcast_path(&self) -> PathBuf {
        self.dir.join(&self.broadcast.file)
    }

    pub fn counters_path(&self) -> PathBuf {
        self.dir.join(&self.counters.file)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }

    pub fn unblock_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_buffer.unblock_timeout_ms)
    }

    pub fn reuse_timeout(&self) -> Duration {
        Duration::from_millis(self.counters.reuse_timeout_ms)
    }
}

/// Data sections must be a power of two that can hold at least one record
/// of the smallest alignment and whose lengths fit the `i32` record header.
fn check_capacity(field: &'static str, capacity: usize) -> Result<(), ConfigError> {
    if !capacity.is_power_of_two() || capacity < tessera_ipc::RECORD_ALIGNMENT {
        return Err(ConfigError::Invalid {
            field,
            reason: format!(
                "{capacity} is not a power of two of at least {}",
                tessera_ipc::RECORD_ALIGNMENT
            ),
        });
    }
    if capacity > tessera_ipc::MAX_CAPACITY {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{capacity} exceeds {}", tessera_ipc::MAX_CAPACITY),
        });
    }
    Ok(())
}
