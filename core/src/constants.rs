use alloy::primitives::{Address, address};

/// Plan manager deployment on Avalanche Fuji
pub const DEFAULT_SIP_CONTRACT_ADDRESS: Address =
    address!("0xd8540A08f770BAA3b66C4d43728CDBDd1d7A9c3b");

pub const AVALANCHE_FUJI_CHAIN_ID: u64 = 43113;

/// Plan key every owner may have used, independent of the naming convention
pub const DEFAULT_PLAN_KEY: &str = "default";

/// Prefix of generated plan keys: `sip_{fingerprint}_{unix_seconds}`
pub const PLAN_KEY_PREFIX: &str = "sip";
