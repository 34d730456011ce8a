use std::{
    sync::{
        Arc, Mutex, MutexGuard, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sip_core::{contract::LogSource, error::SipError, plan::Plan};
use tokio::{sync::watch, task::JoinHandle};

use crate::{metrics, pipeline::Discover};

/// The last published discovery result
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySnapshot {
    pub owner: Option<Address>,
    pub plans: Vec<Plan>,
    /// Generation of the run that produced `plans`
    pub generation: u64,
    pub last_error: Option<SipError>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl DiscoverySnapshot {
    /// A run has completed for the current owner
    pub fn is_ready(&self) -> bool {
        self.refreshed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshState {
    Idle,
    Running,
}

#[derive(Debug)]
pub enum RunOutcome {
    Published { plans: usize, new_keys: usize },
    /// Every strategy failed, the previous plans were kept
    Failed(SipError),
    /// The owner changed while this run was in flight
    Discarded,
}

/// What a refresh request turned into
#[derive(Debug)]
pub enum Trigger {
    /// A run started. The handle resolves with the outcome of the last run
    /// the task drove, queued follow-ups included.
    Started(JoinHandle<RunOutcome>),
    /// A run is in flight; one follow-up run starts when it finishes
    Queued,
}

#[derive(Debug, Default)]
struct Schedule {
    running: bool,
    pending: bool,
}

enum Claim {
    Drive(u64, Address),
    Queued,
    NoOwner,
}

/// Releases the run slot if a driving task is dropped mid-run
struct RunSlot<'a> {
    schedule: &'a Mutex<Schedule>,
    held: bool,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut schedule = self
                .schedule
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *schedule = Schedule::default();
        }
    }
}

/// Re-runs discovery on owner change or external trigger.
///
/// At most one run is in flight per controller. Triggers that arrive during
/// a run collapse into a single follow-up run, so a slow run still publishes
/// under a steady stream of new blocks. An owner change advances the
/// generation at once; the in-flight run is then discarded without touching
/// the registry. The generation check and the registry commit happen under
/// `commit_lock`, which owner changes also take, so a run can never be
/// superseded halfway through its commit.
pub struct RefreshController<D> {
    discover: Arc<D>,
    generation: AtomicU64,
    owner: RwLock<Option<Address>>,
    schedule: Mutex<Schedule>,
    commit_lock: tokio::sync::Mutex<()>,
    snapshot: watch::Sender<DiscoverySnapshot>,
}

impl<D: Discover + 'static> RefreshController<D> {
    pub fn new(discover: Arc<D>) -> Self {
        let (snapshot, _) = watch::channel(DiscoverySnapshot::default());
        Self {
            discover,
            generation: AtomicU64::new(0),
            owner: RwLock::new(None),
            schedule: Mutex::new(Schedule::default()),
            commit_lock: tokio::sync::Mutex::new(()),
            snapshot,
        }
    }

    pub fn for_owner(discover: Arc<D>, owner: Address) -> Self {
        let controller = Self::new(discover);
        controller.reset_owner(owner);
        controller
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn owner(&self) -> Option<Address> {
        *self.owner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> RefreshState {
        if self.schedule().running {
            RefreshState::Running
        } else {
            RefreshState::Idle
        }
    }

    pub fn snapshot(&self) -> DiscoverySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscoverySnapshot> {
        self.snapshot.subscribe()
    }

    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reset_owner(&self, owner: Address) -> u64 {
        let generation = {
            let mut current = self.owner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = Some(owner);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        // plans of the previous owner must not leak into the new one
        self.snapshot.send_replace(DiscoverySnapshot {
            owner: Some(owner),
            generation,
            ..Default::default()
        });
        generation
    }

    /// Switches to `owner` and asks for a run. Waits for an in-flight
    /// registry commit to finish first.
    pub async fn set_owner(self: &Arc<Self>, owner: Address) -> Option<Trigger> {
        let generation = {
            let _commit = self.commit_lock.lock().await;
            self.reset_owner(owner)
        };
        tracing::debug!(owner = %owner, generation, "Owner changed");
        self.trigger()
    }

    /// Starts a run under a fresh generation, or queues a follow-up when one
    /// is in flight. `None` when no owner is set.
    pub fn trigger(self: &Arc<Self>) -> Option<Trigger> {
        match self.claim() {
            Claim::Drive(generation, owner) => {
                let controller = self.clone();
                Some(Trigger::Started(tokio::spawn(async move {
                    controller.drive(generation, owner).await
                })))
            }
            Claim::Queued => {
                tracing::trace!(owner = ?self.owner(), "Run in flight, follow-up queued");
                Some(Trigger::Queued)
            }
            Claim::NoOwner => None,
        }
    }

    /// Runs inline and waits for it. `None` when no owner is set, or when a
    /// run is already in flight and a follow-up was queued instead.
    pub async fn refresh_now(&self) -> Option<RunOutcome> {
        match self.claim() {
            Claim::Drive(generation, owner) => Some(self.drive(generation, owner).await),
            Claim::Queued | Claim::NoOwner => None,
        }
    }

    /// Reads the owner and advances the generation under the owner lock, so
    /// the pair is consistent with concurrent owner changes
    fn next_run(&self) -> Option<(u64, Address)> {
        let owner = self.owner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let owner = (*owner)?;
        Some((self.generation.fetch_add(1, Ordering::SeqCst) + 1, owner))
    }

    fn claim(&self) -> Claim {
        let mut schedule = self.schedule();
        if schedule.running {
            schedule.pending = true;
            return Claim::Queued;
        }
        match self.next_run() {
            Some((generation, owner)) => {
                schedule.running = true;
                Claim::Drive(generation, owner)
            }
            None => Claim::NoOwner,
        }
    }

    /// Hands the slot to the queued follow-up run, or releases it
    fn follow_up(&self, slot: &mut RunSlot<'_>) -> Option<(u64, Address)> {
        let mut schedule = self.schedule();
        if schedule.pending {
            schedule.pending = false;
            if let Some(next) = self.next_run() {
                return Some(next);
            }
        }
        schedule.running = false;
        slot.held = false;
        None
    }

    async fn drive(&self, mut generation: u64, mut owner: Address) -> RunOutcome {
        let mut slot = RunSlot {
            schedule: &self.schedule,
            held: true,
        };

        loop {
            let outcome = self.run(generation, owner).await;
            match self.follow_up(&mut slot) {
                Some((next_generation, next_owner)) => {
                    generation = next_generation;
                    owner = next_owner;
                }
                None => return outcome,
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn discard(&self, owner: Address, generation: u64, started: Instant) -> RunOutcome {
        tracing::debug!(
            owner = %owner,
            generation,
            current = self.generation(),
            "Discarding superseded discovery run"
        );
        metrics::record_discarded_run();
        metrics::record_run("discarded", started.elapsed().as_secs_f64());
        RunOutcome::Discarded
    }

    /// Publishes under the watch lock so an older run can never overwrite a
    /// newer one
    fn publish(&self, generation: u64, update: impl FnOnce(&mut DiscoverySnapshot)) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if !self.is_current(generation) {
                return false;
            }
            update(snapshot);
            snapshot.generation = generation;
            snapshot.refreshed_at = Some(Utc::now());
            true
        })
    }

    async fn run(&self, generation: u64, owner: Address) -> RunOutcome {
        let started = Instant::now();

        let run = self.discover.collect(owner).await;

        // held until published; owner changes wait for it
        let _commit = self.commit_lock.lock().await;

        if !self.is_current(generation) {
            return self.discard(owner, generation, started);
        }

        if let Some(error) = run.total_failure() {
            tracing::error!(
                owner = %owner,
                generation,
                error = %error,
                "Discovery failed, keeping last known plans"
            );
            let published = self.publish(generation, |snapshot| {
                snapshot.last_error = Some(error.clone());
            });
            if !published {
                return self.discard(owner, generation, started);
            }
            metrics::record_run("failed", started.elapsed().as_secs_f64());
            return RunOutcome::Failed(error);
        }

        let (new_keys, registry_error) = match self.discover.commit(&run).await {
            Ok(new_keys) => (new_keys, None),
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Failed to record plan keys");
                (0, Some(e))
            }
        };

        let plans = run.merged.plans;
        let plan_count = plans.len();
        let published = self.publish(generation, move |snapshot| {
            snapshot.owner = Some(owner);
            snapshot.plans = plans;
            snapshot.last_error = registry_error;
        });
        if !published {
            return self.discard(owner, generation, started);
        }

        tracing::info!(
            owner = %owner,
            generation,
            plans = plan_count,
            new_keys,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Published discovery result"
        );
        metrics::record_run("published", started.elapsed().as_secs_f64());

        RunOutcome::Published {
            plans: plan_count,
            new_keys,
        }
    }
}

/// Polls the latest block number and broadcasts every advance
pub struct BlockWatcher<L> {
    source: Arc<L>,
    interval: Duration,
    latest: watch::Sender<u64>,
}

impl<L: LogSource + 'static> BlockWatcher<L> {
    pub fn new(source: Arc<L>, interval: Duration) -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            source,
            interval,
            latest,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.latest.subscribe()
    }

    /// One poll. Returns the new block number when the chain advanced.
    pub async fn poll_once(&self) -> Result<Option<u64>, SipError> {
        let block = self.source.latest_block().await?;
        let advanced = self.latest.send_if_modified(|latest| {
            if block > *latest {
                *latest = block;
                true
            } else {
                false
            }
        });
        Ok(advanced.then_some(block))
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(Some(block)) => tracing::trace!(block, "New block"),
                            Ok(None) => {}
                            Err(e) => tracing::warn!(error = %e, "Failed to poll latest block"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Block watcher shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
