use alloy::{
    primitives::Address,
    transports::{RpcError as AlloyRpcError, TransportErrorKind},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::Chain;

/// How a JSON-RPC request to the node went wrong
#[derive(Debug, Error, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// The node answered with a JSON-RPC error object
    #[error("node error {code}: {message}")]
    NodeError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("node returned null")]
    NullResponse,

    /// The endpoint answered with a non-success HTTP status
    #[error("HTTP status {status}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed payload: {message}")]
    Payload { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },
}

impl From<&AlloyRpcError<TransportErrorKind>> for RpcErrorKind {
    fn from(err: &AlloyRpcError<TransportErrorKind>) -> Self {
        match err {
            AlloyRpcError::ErrorResp(payload) => RpcErrorKind::NodeError {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload.data.as_ref().map(|data| data.to_string()),
            },
            AlloyRpcError::NullResp => RpcErrorKind::NullResponse,
            AlloyRpcError::SerError(e) => RpcErrorKind::Payload {
                message: e.to_string(),
            },
            AlloyRpcError::DeserError { err, text } => RpcErrorKind::Payload {
                message: format!("{err}: {text}"),
            },
            AlloyRpcError::Transport(TransportErrorKind::HttpError(e)) => RpcErrorKind::HttpStatus {
                status: e.status,
                body: e.body.clone(),
            },
            other => RpcErrorKind::Connection {
                message: other.to_string(),
            },
        }
    }
}

/// Why a `getPlan` call produced no usable record
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractInteractionErrorKind {
    /// The contract returned no data ("0x"). For a point lookup this means
    /// the key was never created.
    #[error("contract call to `{function}` returned no data (\"0x\")")]
    ZeroData { function: String, message: String },

    /// The return data did not match the `SipPlan` layout
    #[error("ABI error: {message}")]
    AbiError { message: String },

    #[error("transport error: {kind}")]
    TransportError { kind: RpcErrorKind },

    #[error("{message}")]
    Other { message: String },
}

#[derive(Error, Debug, Serialize, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum SipError {
    #[error("RPC error on chain {chain_id} at {rpc_url}: {message}")]
    #[serde(rename_all = "camelCase")]
    RpcError {
        chain_id: u64,
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },

    #[error("Contract interaction error: {message}")]
    #[serde(rename_all = "camelCase")]
    ContractInteractionError {
        contract_address: Option<Address>,
        chain_id: u64,
        message: String,
        kind: ContractInteractionErrorKind,
    },

    /// The transaction history indexer could not be reached or answered badly
    #[error("Transaction history error: {message}")]
    HistoryError { message: String, status: Option<u16> },

    /// Call data that does not follow the expected ABI layout
    #[error("Decode error: {message}")]
    DecodeError { message: String },

    /// A record that exists on chain but breaks the plan invariants
    #[error("Invalid plan record for `{plan_key}`: {message}")]
    #[serde(rename_all = "camelCase")]
    InvalidPlanRecord { plan_key: String, message: String },

    #[error("Registry error: {message}")]
    RegistryError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// Every discovery strategy failed for transport reasons
    #[error("Discovery failed: {message}")]
    DiscoveryFailed { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl SipError {
    pub fn rpc(chain: &impl Chain, err: &AlloyRpcError<TransportErrorKind>) -> Self {
        SipError::RpcError {
            chain_id: chain.chain_id(),
            rpc_url: chain.rpc_url().to_string(),
            message: err.to_string(),
            kind: err.into(),
        }
    }

    /// A failed call against the plan manager at `contract_address`
    pub fn contract_call(
        chain_id: u64,
        contract_address: Address,
        err: alloy::contract::Error,
    ) -> Self {
        let kind = match err {
            alloy::contract::Error::ZeroData(function, e) => ContractInteractionErrorKind::ZeroData {
                function,
                message: e.to_string(),
            },
            alloy::contract::Error::AbiError(e) => ContractInteractionErrorKind::AbiError {
                message: e.to_string(),
            },
            alloy::contract::Error::TransportError(e) => ContractInteractionErrorKind::TransportError {
                kind: (&e).into(),
            },
            other => ContractInteractionErrorKind::Other {
                message: other.to_string(),
            },
        };

        SipError::ContractInteractionError {
            contract_address: Some(contract_address),
            chain_id,
            message: kind.to_string(),
            kind,
        }
    }

    /// Whether retrying later (on the next refresh) can change the outcome
    pub fn is_retryable(&self) -> bool {
        match self {
            SipError::RpcError { kind, .. } => !matches!(kind, RpcErrorKind::Payload { .. }),
            SipError::ContractInteractionError { kind, .. } => {
                matches!(kind, ContractInteractionErrorKind::TransportError { .. })
            }
            SipError::HistoryError { .. } | SipError::DiscoveryFailed { .. } => true,
            _ => false,
        }
    }
}
