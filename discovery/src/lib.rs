pub mod candidates;
pub mod config;
pub mod events;
pub mod fetcher;
pub mod history;
pub mod metrics;
pub mod pipeline;
pub mod reconcile;
pub mod refresh;
pub mod registry;
pub mod service;
pub mod view;

pub use candidates::{CandidateKeyGenerator, plan_key_for};
pub use pipeline::{Discover, DiscoveryPipeline, DiscoveryRun};
pub use refresh::{BlockWatcher, DiscoverySnapshot, RefreshController, Trigger};
pub use service::{DiscoveryService, RefreshStatus};
