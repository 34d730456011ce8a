use alloy::{
    providers::RootProvider,
    rpc::client::RpcClient,
    transports::http::reqwest::{Client, ClientBuilder as HttpClientBuilder, Url},
};

use crate::{error::SipError, rpc_clients::RpcTransport};

/// Local anvil node, always reached without an API key
pub const ANVIL_CHAIN_ID: u64 = 31337;

pub trait Chain: Send + Sync {
    fn chain_id(&self) -> u64;
    fn rpc_url(&self) -> Url;
    fn provider(&self) -> &RootProvider;
}

pub struct SipChainConfig<'a> {
    pub chain_id: u64,
    pub rpc_url: &'a str,
    pub rpc_api_key: Option<&'a str>,
}

#[derive(Clone)]
pub struct SipChain {
    chain_id: u64,
    transport: RpcTransport,
    pub provider: RootProvider,
}

impl Chain for SipChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn rpc_url(&self) -> Url {
        self.transport.endpoint().clone()
    }

    fn provider(&self) -> &RootProvider {
        &self.provider
    }
}

impl SipChain {
    /// The pooled HTTP client, shared with other HTTP collaborators
    pub fn http_client(&self) -> &Client {
        self.transport.client()
    }
}

impl SipChainConfig<'_> {
    pub fn to_chain(&self) -> Result<SipChain, SipError> {
        let local = self.chain_id == ANVIL_CHAIN_ID;
        let raw_url = if local {
            "http://127.0.0.1:8545"
        } else {
            self.rpc_url
        };
        let rpc_url = Url::parse(raw_url).map_err(|e| SipError::RpcConfigError {
            message: format!("Failed to parse RPC URL `{raw_url}`: {e}"),
        })?;

        let client = HttpClientBuilder::new()
            .build()
            .map_err(|e| SipError::RpcConfigError {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        let api_key = self.rpc_api_key.filter(|_| !local);
        let transport = RpcTransport::new(client, rpc_url, api_key)?;
        let provider = RootProvider::new(RpcClient::builder().transport(transport.clone(), local));

        Ok(SipChain {
            chain_id: self.chain_id,
            transport,
            provider,
        })
    }
}
