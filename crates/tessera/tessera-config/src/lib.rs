mod config;

pub use config::{
    BroadcastConfig, ConfigError, CountersConfig, ReceiverStartConfig, RingBufferConfig,
    TesseraConfig,
};
