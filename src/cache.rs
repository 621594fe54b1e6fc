//! Freshness-bounded view of the current dataset.
//!
//! A [`DatasetCache`] owns one [`EntryStore`] holding the current
//! [`CacheEntry`]. Entries are never mutated: a refresh builds a complete
//! dataset outside any lock and the store swaps the `Arc` in one step, so a
//! reader sees either the previous entry or the next one.
//!
//! Two refresh strategies are supported:
//! - [`RefreshStrategy::Push`]: [`spawn_refresher`] refreshes on a fixed
//!   interval and `get` returns whatever is installed without waiting.
//! - [`RefreshStrategy::Pull`]: `get` notices an empty or stale entry and
//!   refreshes before returning. Concurrent stale readers share one refresh.

use crate::dataset::Dataset;
use crate::error::CacheError;
use crate::fetcher::{FetchReport, SourceFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub dataset: Dataset,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(dataset: Dataset, created_at: DateTime<Utc>) -> Self {
        Self {
            dataset,
            created_at,
        }
    }

    /// Stale once strictly older than `ttl`. A timestamp in the future
    /// (clock skew on a cache file) counts as fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Populated,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStrategy {
    Pull,
    Push,
}

impl RefreshStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStrategy::Pull => "pull",
            RefreshStrategy::Push => "push",
        }
    }
}

/// Backing storage for the current entry.
///
/// `install` and `clear` replace the whole entry; `current` hands out a
/// shared reference that stays valid after later installs. `current` must
/// not block; `install` and `clear` may do I/O off the runtime threads.
#[async_trait]
pub trait EntryStore: Send + Sync {
    fn current(&self) -> Option<Arc<CacheEntry>>;
    async fn install(
        &self,
        dataset: Dataset,
        now: DateTime<Utc>,
    ) -> Result<Arc<CacheEntry>, CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Process-memory store: an `Arc` slot behind a lock held only for the swap.
#[derive(Default)]
pub struct MemoryStore {
    slot: RwLock<Option<Arc<CacheEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&self, entry: Option<Arc<CacheEntry>>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = entry;
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    fn current(&self) -> Option<Arc<CacheEntry>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn install(
        &self,
        dataset: Dataset,
        now: DateTime<Utc>,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let entry = Arc::new(CacheEntry::new(dataset, now));
        self.put(Some(entry.clone()));
        Ok(entry)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.put(None);
        Ok(())
    }
}

/// Result of the most recent fetch cycle.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub finished_at: DateTime<Utc>,
    pub installed: bool,
    pub report: FetchReport,
}

pub struct DatasetCache {
    fetcher: SourceFetcher,
    store: Box<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    strategy: RefreshStrategy,
    // serialises refreshers; readers never take it
    refresh_gate: tokio::sync::Mutex<()>,
    refresh_generation: AtomicU64,
    last_refresh: RwLock<Option<RefreshOutcome>>,
}

impl DatasetCache {
    pub fn new(
        fetcher: SourceFetcher,
        store: Box<dyn EntryStore>,
        ttl: Duration,
        strategy: RefreshStrategy,
    ) -> Self {
        Self {
            fetcher,
            store,
            clock: Arc::new(SystemClock),
            ttl,
            strategy,
            refresh_gate: tokio::sync::Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
            last_refresh: RwLock::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn strategy(&self) -> RefreshStrategy {
        self.strategy
    }

    /// The installed entry, without any refresh.
    pub fn snapshot(&self) -> Option<Arc<CacheEntry>> {
        self.store.current()
    }

    pub fn state(&self) -> CacheState {
        match self.snapshot() {
            None => CacheState::Empty,
            Some(entry) if entry.is_stale(self.clock.now(), self.ttl) => CacheState::Stale,
            Some(_) => CacheState::Populated,
        }
    }

    pub fn last_refresh(&self) -> Option<RefreshOutcome> {
        self.last_refresh
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current dataset, empty while nothing has been loaded.
    ///
    /// Under the pull strategy an empty or stale cache is refreshed first; if
    /// that refresh yields nothing the previous entry (possibly stale) is
    /// returned.
    pub async fn get(&self) -> Dataset {
        if self.strategy == RefreshStrategy::Pull && self.state() != CacheState::Populated {
            self.refresh_if_stale().await;
        }
        self.snapshot()
            .map(|entry| entry.dataset.clone())
            .unwrap_or_default()
    }

    /// Run a fetch cycle and install its result if it is non-empty.
    ///
    /// Returns whether a new entry was installed. A cycle that yields no
    /// records leaves the current entry untouched.
    pub async fn refresh(&self) -> bool {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Refresh unless the entry is fresh or another refresh completed while
    /// this caller was waiting for its turn.
    pub async fn refresh_if_stale(&self) -> bool {
        let seen = self.refresh_generation.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_generation.load(Ordering::Acquire) != seen {
            return false;
        }
        if self.state() == CacheState::Populated {
            return false;
        }
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> bool {
        let (dataset, report) = self.fetcher.fetch().await;

        let installed = if dataset.is_empty() {
            match self.state() {
                CacheState::Empty => {
                    log::warn!("refresh produced no rows, cache stays empty")
                }
                _ => log::warn!("refresh produced no rows, keeping the previous dataset"),
            }
            false
        } else {
            match self.store.install(dataset, self.clock.now()).await {
                Ok(entry) => {
                    log::info!(
                        "installed dataset with {} rows from {} sheet(s)",
                        entry.dataset.len(),
                        report.loaded.len()
                    );
                    true
                }
                Err(err) => {
                    log::error!("failed to install refreshed dataset: {}", err);
                    false
                }
            }
        };

        *self
            .last_refresh
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(RefreshOutcome {
            finished_at: self.clock.now(),
            installed,
            report,
        });
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        installed
    }

    /// Install a dataset that did not come from the fetcher (an upload).
    pub async fn install(&self, dataset: Dataset) -> Result<Arc<CacheEntry>, CacheError> {
        let entry = self.store.install(dataset, self.clock.now()).await?;
        log::info!("installed uploaded dataset with {} rows", entry.dataset.len());
        Ok(entry)
    }

    /// Drop the current entry and go back to `Empty`.
    pub async fn invalidate(&self) -> Result<(), CacheError> {
        self.store.clear().await?;
        log::info!("dataset cache invalidated");
        Ok(())
    }
}

/// Refresh `cache` now and then every `interval`, for the push strategy.
pub fn spawn_refresher(cache: Arc<DatasetCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            log::debug!("background refresh starting");
            cache.refresh().await;
        }
    })
}
