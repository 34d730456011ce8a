pub mod chain;
pub mod commands;
pub mod constants;
pub mod contract;
pub mod error;
pub mod plan;
pub mod rpc_clients;
