use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError};
use serde::Deserialize;

pub mod domain;
pub mod infrastructure;
pub mod service;

#[derive(Clone, Debug, Deserialize)]
pub struct PatronConfig {
    pub server: Server,
    pub storage: Storage,
    pub snowflake: Snowflake,
    pub logger: Logger,
}

impl PatronConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(config::File::with_name("patron").required(false))
            .add_source(config::Environment::with_prefix("PATRON").separator("_"))
            .build()?
            .try_deserialize::<PatronConfig>()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.address", "0.0.0.0:8080")?
            .set_default("storage.kind", "memory")?
            .set_default("storage.url", "esdb://localhost:2113?tls=false")?
            .set_default("snowflake.machine", 1)?
            .set_default("snowflake.node", 1)?
            .set_default("logger.level", "INFO")
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub address: String,
    pub tls: Option<Tls>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tls {
    pub cert: String,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    pub kind: StorageKind,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    EventStore,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Snowflake {
    pub machine: i32,
    pub node: i32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Logger {
    pub level: Level,
}

#[derive(Clone, Debug, Deserialize)]
pub enum Level {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<&Level> for tracing::Level {
    fn from(value: &Level) -> Self {
        match value {
            Level::TRACE => tracing::Level::TRACE,
            Level::DEBUG => tracing::Level::DEBUG,
            Level::INFO => tracing::Level::INFO,
            Level::WARN => tracing::Level::WARN,
            Level::ERROR => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use config::{File, FileFormat};

    use super::*;

    fn parse(toml: &str) -> PatronConfig {
        PatronConfig::defaults()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("");
        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert!(config.server.tls.is_none());
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert_eq!(config.snowflake.machine, 1);
        assert_eq!(tracing::Level::from(&config.logger.level), tracing::Level::INFO);
    }

    #[test]
    fn test_file_overrides() {
        let config = parse(
            r#"
            [server]
            address = "127.0.0.1:3000"

            [server.tls]
            cert = "localhost.pem"
            key = "localhost.key"

            [storage]
            kind = "eventstore"
            url = "esdb://eventstore:2113?tls=false"

            [logger]
            level = "DEBUG"
            "#,
        );
        assert_eq!(config.server.address, "127.0.0.1:3000");
        assert_eq!(config.server.tls.unwrap().key, "localhost.key");
        assert_eq!(config.storage.kind, StorageKind::EventStore);
        assert_eq!(config.storage.url, "esdb://eventstore:2113?tls=false");
        assert_eq!(tracing::Level::from(&config.logger.level), tracing::Level::DEBUG);
    }
}
