use std::env;

use alloy::primitives::Address;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use sip_core::constants::{AVALANCHE_FUJI_CHAIN_ID, DEFAULT_SIP_CONTRACT_ADDRESS};
use sip_discovery::config::{DiscoveryConfig, RefreshConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub rpc_api_key: Option<String>,
    pub contract_address: Address,
    pub explorer_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub base_url: String,
    pub ecosystem: String,
    pub limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".into(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: AVALANCHE_FUJI_CHAIN_ID,
            rpc_url: "https://api.avax-test.network/ext/bc/C/rpc".into(),
            rpc_api_key: None,
            contract_address: DEFAULT_SIP_CONTRACT_ADDRESS,
            explorer_url: "https://testnet.snowtrace.io/".into(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://cdn.testnet.routescan.io/api/evm/all/".into(),
            ecosystem: "avalanche".into(),
            limit: 100,
        }
    }
}

pub fn get_config() -> Result<EngineConfig, ConfigError> {
    let base_path = env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {e}")))?;
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let environment_filename = format!("server_{}.yaml", environment.as_str());

    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("server_base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)).required(false))
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?;

    config.try_deserialize::<EngineConfig>()
}

/// The possible runtime environment for our application.
#[derive(Debug, PartialEq, Eq)]
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local`, `development`, or `production`."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn environment_parsing() {
        assert_eq!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        );
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn yaml_layers_fill_defaults() {
        let yaml = r#"
server:
  port: 8080
  log_format: json
redis:
  url: redis://127.0.0.1:6379/
discovery:
  batch_size: 5
history:
  enabled: false
"#;
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.chain.chain_id, AVALANCHE_FUJI_CHAIN_ID);
        assert_eq!(config.chain.contract_address, DEFAULT_SIP_CONTRACT_ADDRESS);
        assert_eq!(config.discovery.batch_size, 5);
        assert_eq!(config.discovery.max_candidates, 30);
        assert_eq!(config.refresh.block_poll_interval_ms, 5_000);
        assert!(!config.history.enabled);
        assert_eq!(config.redis.namespace, None);
    }
}
