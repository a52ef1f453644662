// config/mod.rs
use config::Config;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub camera: CameraConfig,
    pub lamp: LampConfig,
}

#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct CameraConfig {
    pub index: u32,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct LampConfig {
    pub name: String,
    pub height: usize,
    pub width: usize,
}

impl AppConfig {
    pub fn new() -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config/config"))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
