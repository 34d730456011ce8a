pub mod decoder;

use std::str::FromStr;

use alloy::{
    consensus::Transaction as _,
    primitives::{Address, B256, Bytes, Selector, U256, hex},
    providers::{Provider, RootProvider},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sip_core::error::SipError;
use url::Url;

use crate::metrics;

pub use decoder::{DecodedCreation, decode_create_plan_keys, decode_plan_key};

/// One past transaction from the owner to the plan manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTransaction {
    pub tx_hash: B256,
    /// Hex selector reported by the indexer, e.g. `0xe1dc1c04`
    pub call_signature_tag: String,
    pub call_data: Bytes,
    pub value: U256,
    pub timestamp: Option<DateTime<Utc>>,
    pub status: bool,
}

impl HistoryTransaction {
    pub fn has_tag(&self, selector: Selector) -> bool {
        tag_matches(&self.call_signature_tag, selector)
    }
}

pub(crate) fn tag_matches(tag: &str, selector: Selector) -> bool {
    let tag = tag.strip_prefix("0x").unwrap_or(tag);
    tag.eq_ignore_ascii_case(&hex::encode(selector))
}

/// Source of an owner's past transactions to a contract. Best effort and
/// possibly truncated.
pub trait TransactionHistory: Send + Sync {
    fn transactions(
        &self,
        owner: Address,
        contract: Address,
    ) -> impl Future<Output = Result<Vec<HistoryTransaction>, SipError>> + Send;
}

/// Rows stay raw so one malformed row only costs that row
#[derive(Debug, Deserialize)]
struct RoutescanPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl RoutescanPage {
    fn into_transactions(self) -> Vec<HistoryTransaction> {
        let mut transactions = Vec::with_capacity(self.items.len());
        for (index, row) in self.items.into_iter().enumerate() {
            match serde_json::from_value::<RoutescanItem>(row) {
                Ok(item) => transactions.push(item.into()),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping malformed indexer row");
                    metrics::record_skipped_transaction();
                }
            }
        }
        transactions
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutescanItem {
    tx_hash: B256,
    #[serde(default)]
    method_id: Option<String>,
    #[serde(default)]
    status: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    input: Option<Bytes>,
}

impl From<RoutescanItem> for HistoryTransaction {
    fn from(item: RoutescanItem) -> Self {
        let value = item
            .value
            .as_deref()
            .and_then(|v| U256::from_str(v).ok())
            .unwrap_or_default();

        HistoryTransaction {
            tx_hash: item.tx_hash,
            call_signature_tag: item.method_id.unwrap_or_default(),
            call_data: item.input.unwrap_or_default(),
            value,
            timestamp: item.timestamp,
            status: item.status,
        }
    }
}

pub struct RoutescanHistoryBuilder {
    base_url: Url,
    ecosystem: String,
    limit: u32,
    hydrate_selector: Option<Selector>,
    provider: Option<RootProvider>,
    client: Option<reqwest::Client>,
}

impl RoutescanHistoryBuilder {
    pub fn new(base_url: &str) -> Result<Self, SipError> {
        let mut parsed = Url::parse(base_url).map_err(|e| SipError::ValidationError {
            message: format!("Invalid history base url {base_url}: {e}"),
        })?;
        // `join` replaces the last segment unless the path ends with a slash
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }

        Ok(Self {
            base_url: parsed,
            ecosystem: "avalanche".to_string(),
            limit: 100,
            hydrate_selector: None,
            provider: None,
            client: None,
        })
    }

    pub fn with_ecosystem(mut self, ecosystem: impl Into<String>) -> Self {
        self.ecosystem = ecosystem.into();
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Reuse a pooled client instead of building one
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// The indexer omits call data. Successful rows tagged with `selector`
    /// get their input fetched from `provider`.
    pub fn with_input_provider(mut self, provider: RootProvider, selector: Selector) -> Self {
        self.provider = Some(provider);
        self.hydrate_selector = Some(selector);
        self
    }

    pub fn build(self) -> Result<RoutescanHistory, SipError> {
        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| SipError::HistoryError {
                    message: format!("Failed to build http client: {e}"),
                    status: None,
                })?,
        };

        Ok(RoutescanHistory {
            client,
            base_url: self.base_url,
            ecosystem: self.ecosystem,
            limit: self.limit,
            hydrate_selector: self.hydrate_selector,
            provider: self.provider,
        })
    }
}

/// Transaction history from the Routescan indexer API
pub struct RoutescanHistory {
    client: reqwest::Client,
    base_url: Url,
    ecosystem: String,
    limit: u32,
    hydrate_selector: Option<Selector>,
    provider: Option<RootProvider>,
}

impl RoutescanHistory {
    fn transactions_url(&self, owner: Address, contract: Address) -> Result<Url, SipError> {
        let mut url = self
            .base_url
            .join("transactions")
            .map_err(|e| SipError::ValidationError {
                message: format!("Invalid history url: {e}"),
            })?;

        url.query_pairs_mut()
            .append_pair("ecosystem", &self.ecosystem)
            .append_pair("fromAddresses", &owner.to_string())
            .append_pair("toAddresses", &contract.to_string())
            .append_pair("sort", "desc")
            .append_pair("limit", &self.limit.to_string())
            .append_pair("count", "true");

        Ok(url)
    }

    async fn fetch_page(&self, url: Url) -> Result<RoutescanPage, SipError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SipError::HistoryError {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SipError::HistoryError {
                message: format!("Indexer responded with {status}"),
                status: Some(status.as_u16()),
            });
        }

        response
            .json::<RoutescanPage>()
            .await
            .map_err(|e| SipError::HistoryError {
                message: format!("Malformed indexer response: {e}"),
                status: Some(status.as_u16()),
            })
    }

    async fn hydrate_input(&self, tx: &mut HistoryTransaction) {
        let (Some(provider), Some(selector)) = (&self.provider, self.hydrate_selector) else {
            return;
        };
        if !tx.call_data.is_empty() || !tx.status || !tx.has_tag(selector) {
            return;
        }

        match provider.get_transaction_by_hash(tx.tx_hash).await {
            Ok(Some(full)) => tx.call_data = full.input().clone(),
            Ok(None) => {
                tracing::warn!(tx_hash = %tx.tx_hash, "Indexed transaction not known to the node");
            }
            Err(e) => {
                tracing::warn!(tx_hash = %tx.tx_hash, error = %e, "Failed to fetch transaction input");
            }
        }
    }
}

impl TransactionHistory for RoutescanHistory {
    async fn transactions(
        &self,
        owner: Address,
        contract: Address,
    ) -> Result<Vec<HistoryTransaction>, SipError> {
        let url = self.transactions_url(owner, contract)?;
        tracing::debug!(owner = %owner, url = %url, "Fetching transaction history");

        let mut transactions = self.fetch_page(url).await?.into_transactions();
        for tx in &mut transactions {
            self.hydrate_input(tx).await;
        }

        tracing::debug!(
            owner = %owner,
            transactions = transactions.len(),
            "Fetched transaction history"
        );

        Ok(transactions)
    }
}
