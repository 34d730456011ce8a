use std::collections::HashMap;

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use sip_core::error::SipError;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Malformed registry entry for `{plan_key}`: {source}")]
    MalformedEntry {
        plan_key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<RegistryError> for SipError {
    fn from(err: RegistryError) -> Self {
        SipError::RegistryError {
            message: err.to_string(),
        }
    }
}

/// A plan key the engine has confirmed for an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredKey {
    pub plan_key: String,
    pub creation_tx: Option<B256>,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    first_seen_at: DateTime<Utc>,
}

/// Append-only owner to plan key store. Keys are never removed and the first
/// creation transaction recorded for a key is kept.
pub trait PlanKeyStore: Send + Sync {
    /// Every key recorded for `owner`, oldest first
    fn plan_keys(
        &self,
        owner: Address,
    ) -> impl Future<Output = Result<Vec<RegisteredKey>, RegistryError>> + Send;

    /// Records `plan_key`. Returns whether the key was new.
    fn record(
        &self,
        owner: Address,
        plan_key: &str,
        creation_tx: Option<B256>,
    ) -> impl Future<Output = Result<bool, RegistryError>> + Send;

    fn creation_transaction(
        &self,
        owner: Address,
        plan_key: &str,
    ) -> impl Future<Output = Result<Option<B256>, RegistryError>> + Send;
}

fn sort_keys(keys: &mut [RegisteredKey]) {
    keys.sort_by(|a, b| {
        a.first_seen_at
            .cmp(&b.first_seen_at)
            .then_with(|| a.plan_key.cmp(&b.plan_key))
    });
}

/// Registry in two Redis hashes per owner: the key set and the creation
/// transaction map
pub struct RedisPlanKeyRegistry {
    redis: ConnectionManager,
    namespace: Option<String>,
}

impl RedisPlanKeyRegistry {
    pub fn new(redis: ConnectionManager, namespace: Option<String>) -> Self {
        Self { redis, namespace }
    }

    fn prefixed(&self, name: &str, owner: Address) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{name}:{owner}"),
            None => format!("{name}:{owner}"),
        }
    }

    fn keys_hash(&self, owner: Address) -> String {
        self.prefixed("sip_registry", owner)
    }

    fn creation_tx_hash(&self, owner: Address) -> String {
        self.prefixed("sip_creation_tx", owner)
    }
}

impl PlanKeyStore for RedisPlanKeyRegistry {
    async fn plan_keys(&self, owner: Address) -> Result<Vec<RegisteredKey>, RegistryError> {
        let mut conn = self.redis.clone();
        let entries: HashMap<String, String> = conn.hgetall(self.keys_hash(owner)).await?;
        let creation_txs: HashMap<String, String> =
            conn.hgetall(self.creation_tx_hash(owner)).await?;

        let mut keys = Vec::with_capacity(entries.len());
        for (plan_key, raw) in entries {
            let entry: StoredEntry =
                serde_json::from_str(&raw).map_err(|source| RegistryError::MalformedEntry {
                    plan_key: plan_key.clone(),
                    source,
                })?;

            let creation_tx = creation_txs
                .get(&plan_key)
                .and_then(|tx| tx.parse::<B256>().ok());

            keys.push(RegisteredKey {
                plan_key,
                creation_tx,
                first_seen_at: entry.first_seen_at,
            });
        }

        sort_keys(&mut keys);
        Ok(keys)
    }

    async fn record(
        &self,
        owner: Address,
        plan_key: &str,
        creation_tx: Option<B256>,
    ) -> Result<bool, RegistryError> {
        let entry = serde_json::to_string(&StoredEntry {
            first_seen_at: Utc::now(),
        })?;

        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .hset_nx(self.keys_hash(owner), plan_key, entry);
        if let Some(tx) = creation_tx {
            pipeline.hset_nx(self.creation_tx_hash(owner), plan_key, tx.to_string());
        }

        let mut conn = self.redis.clone();
        let inserted: Vec<bool> = pipeline.query_async(&mut conn).await?;
        let is_new = inserted.first().copied().unwrap_or(false);

        if is_new {
            tracing::debug!(owner = %owner, plan_key = %plan_key, "Registered plan key");
        }
        Ok(is_new)
    }

    async fn creation_transaction(
        &self,
        owner: Address,
        plan_key: &str,
    ) -> Result<Option<B256>, RegistryError> {
        let mut conn = self.redis.clone();
        let tx: Option<String> = conn.hget(self.creation_tx_hash(owner), plan_key).await?;
        Ok(tx.and_then(|tx| tx.parse().ok()))
    }
}

#[derive(Default)]
struct OwnerKeys {
    keys: HashMap<String, DateTime<Utc>>,
    creation_txs: HashMap<String, B256>,
}

/// Process-local registry for tests and single-node runs without Redis
#[derive(Default)]
pub struct MemoryPlanKeyStore {
    owners: RwLock<HashMap<Address, OwnerKeys>>,
}

impl MemoryPlanKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanKeyStore for MemoryPlanKeyStore {
    async fn plan_keys(&self, owner: Address) -> Result<Vec<RegisteredKey>, RegistryError> {
        let owners = self.owners.read().await;
        let Some(entry) = owners.get(&owner) else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<RegisteredKey> = entry
            .keys
            .iter()
            .map(|(plan_key, first_seen_at)| RegisteredKey {
                plan_key: plan_key.clone(),
                creation_tx: entry.creation_txs.get(plan_key).copied(),
                first_seen_at: *first_seen_at,
            })
            .collect();
        sort_keys(&mut keys);
        Ok(keys)
    }

    async fn record(
        &self,
        owner: Address,
        plan_key: &str,
        creation_tx: Option<B256>,
    ) -> Result<bool, RegistryError> {
        let mut owners = self.owners.write().await;
        let entry = owners.entry(owner).or_default();

        let is_new = !entry.keys.contains_key(plan_key);
        if is_new {
            entry.keys.insert(plan_key.to_string(), Utc::now());
        }
        if let Some(tx) = creation_tx {
            entry.creation_txs.entry(plan_key.to_string()).or_insert(tx);
        }
        Ok(is_new)
    }

    async fn creation_transaction(
        &self,
        owner: Address,
        plan_key: &str,
    ) -> Result<Option<B256>, RegistryError> {
        let owners = self.owners.read().await;
        Ok(owners
            .get(&owner)
            .and_then(|entry| entry.creation_txs.get(plan_key).copied()))
    }
}
