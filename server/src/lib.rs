pub mod config;
pub mod http;

pub use config::{ChainConfig, EngineConfig, HistoryConfig, LogFormat, RedisConfig, ServerConfig};
pub use http::server::{EngineDiscoveryService, EngineServer, EngineServerState};
