//! Bounded resource pool backing each address pool
//!
//! [`ResourcePool`] is the contract an address pool needs from its backing
//! pool: get a resource (reused or freshly created), put one back (or only
//! free its slot), and close. [`BoundedPool`] is the default implementation:
//! - A semaphore with `capacity` permits counts checked-out resources
//! - Idle resources wait in a FIFO queue tagged with the time they were returned
//! - Resources idle longer than the idle timeout are evicted, lazily on `get`
//!   and by a background sweep

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::error::ResourceError;
use crate::config::PoolConfig;

/// Creates a new resource on demand
pub type CreateFn<R> = Arc<dyn Fn() -> BoxFuture<'static, Result<R, ResourceError>> + Send + Sync>;

/// Contract between an address pool and the pool that actually holds its resources
#[async_trait]
pub trait ResourcePool: Send + Sync + 'static {
    type Resource: Send + 'static;

    /// Reuse an idle resource or create one, waiting while the pool is at capacity
    async fn get(&self) -> Result<Self::Resource, ResourceError>;

    /// Like [`ResourcePool::get`] but fails with [`ResourceError::Exhausted`]
    /// instead of waiting for a slot
    async fn try_get(&self) -> Result<Self::Resource, ResourceError>;

    /// Return a resource obtained from `get`
    ///
    /// `None` frees the slot without recycling anything.
    fn put(&self, resource: Option<Self::Resource>);

    /// Stop handing out resources and drop the idle ones
    fn close(&self);

    fn stats(&self) -> PoolStats;
}

/// Builds the resource pool for one address
pub trait MakeResourcePool<R>: Send + Sync + 'static {
    fn make_pool(
        &self,
        label: &str,
        config: &PoolConfig,
        create: CreateFn<R>,
    ) -> Box<dyn ResourcePool<Resource = R>>;
}

/// Builds [`BoundedPool`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeBounded;

impl<R: Send + 'static> MakeResourcePool<R> for MakeBounded {
    fn make_pool(
        &self,
        label: &str,
        config: &PoolConfig,
        create: CreateFn<R>,
    ) -> Box<dyn ResourcePool<Resource = R>> {
        Box::new(BoundedPool::new(label, config, create))
    }
}

/// Statistics for a resource pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Maximum number of resources
    pub capacity: usize,

    /// Resources currently checked out
    pub in_use: usize,

    /// Resources waiting for reuse
    pub idle: usize,

    /// Total resources created
    pub total_created: u64,

    /// Total resources handed out again after a put
    pub total_reused: u64,

    /// Slots freed without a reusable resource
    pub total_discarded: u64,

    /// Idle resources dropped for exceeding the idle timeout
    pub total_evicted: u64,

    /// Failed creation attempts
    pub failed_attempts: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
    failed: AtomicU64,
}

struct IdleResource<R> {
    resource: R,
    idle_since: Instant,
}

struct State<R> {
    idle: VecDeque<IdleResource<R>>,
    closed: bool,
}

struct Shared<R> {
    label: String,
    create: CreateFn<R>,
    permits: Semaphore,
    state: Mutex<State<R>>,
    in_use: AtomicUsize,
    capacity: usize,
    idle_timeout: Duration,
    acquire_timeout: Option<Duration>,
    counters: Counters,
}

/// Fixed-capacity pool with idle eviction
pub struct BoundedPool<R> {
    shared: Arc<Shared<R>>,
}

impl<R: Send + 'static> BoundedPool<R> {
    /// Create a pool labelled `label` (used in logs)
    ///
    /// When called inside a tokio runtime a background task sweeps expired
    /// idle resources every `config.eviction_interval()`. Without a runtime
    /// eviction only happens on `get`. An idle timeout of zero turns
    /// eviction off entirely.
    pub fn new(label: &str, config: &PoolConfig, create: CreateFn<R>) -> Self {
        let capacity = config.capacity.max(1);
        let shared = Arc::new(Shared {
            label: label.to_string(),
            create,
            permits: Semaphore::new(capacity),
            state: Mutex::new(State {
                idle: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            in_use: AtomicUsize::new(0),
            capacity,
            idle_timeout: config.idle_timeout(),
            acquire_timeout: config.acquire_timeout(),
            counters: Counters::default(),
        });

        spawn_reaper(&shared, config.eviction_interval());

        Self { shared }
    }

    /// Sweep idle resources past the idle timeout, returning how many were dropped
    pub fn evict_idle(&self) -> usize {
        self.shared.evict_idle().unwrap_or(0)
    }
}

#[async_trait]
impl<R: Send + 'static> ResourcePool for BoundedPool<R> {
    type Resource = R;

    async fn get(&self) -> Result<R, ResourceError> {
        let shared = &self.shared;
        let permit = match shared.acquire_timeout {
            Some(limit) => time::timeout(limit, shared.permits.acquire())
                .await
                .map_err(|_| ResourceError::Timeout(limit))?,
            None => shared.permits.acquire().await,
        }
        .map_err(|_| ResourceError::Closed)?;

        shared.checkout(permit).await
    }

    async fn try_get(&self) -> Result<R, ResourceError> {
        let permit = self.shared.permits.try_acquire().map_err(|e| match e {
            TryAcquireError::Closed => ResourceError::Closed,
            TryAcquireError::NoPermits => ResourceError::Exhausted,
        })?;

        self.shared.checkout(permit).await
    }

    fn put(&self, resource: Option<R>) {
        self.shared.put(resource)
    }

    fn close(&self) {
        self.shared.close()
    }

    fn stats(&self) -> PoolStats {
        self.shared.stats()
    }
}

impl<R: Send + 'static> Shared<R> {
    async fn checkout(&self, permit: SemaphorePermit<'_>) -> Result<R, ResourceError> {
        if let Some(resource) = self.pop_idle()? {
            permit.forget();
            self.in_use.fetch_add(1, Ordering::SeqCst);
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            debug!(pool = %self.label, "Reusing idle resource");
            return Ok(resource);
        }

        // permit is dropped on failure, handing the slot to the next waiter
        let resource = match (self.create)().await {
            Ok(resource) => resource,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %self.label, error = %e, "Failed to create resource");
                return Err(e);
            }
        };

        if self.state.lock().closed {
            debug!(pool = %self.label, "Pool closed during creation, dropping new resource");
            return Err(ResourceError::Closed);
        }

        permit.forget();
        self.in_use.fetch_add(1, Ordering::SeqCst);
        let total = self.counters.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(pool = %self.label, total_created = total, "Created new resource");
        Ok(resource)
    }

    fn pop_idle(&self) -> Result<Option<R>, ResourceError> {
        let mut expired = Vec::new();
        let found = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ResourceError::Closed);
            }

            let mut found = None;
            while let Some(idle) = state.idle.pop_front() {
                if self.is_expired(&idle) {
                    expired.push(idle.resource);
                    continue;
                }
                found = Some(idle.resource);
                break;
            }
            found
        };

        if !expired.is_empty() {
            self.counters
                .evicted
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(pool = %self.label, evicted = expired.len(), "Evicted expired idle resources");
        }

        Ok(found)
    }

    // a zero idle timeout keeps idle resources forever
    fn is_expired(&self, idle: &IdleResource<R>) -> bool {
        !self.idle_timeout.is_zero() && idle.idle_since.elapsed() > self.idle_timeout
    }

    fn put(&self, resource: Option<R>) {
        if self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            warn!(pool = %self.label, "Put without a checked out resource, ignoring");
            return;
        }

        match resource {
            None => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.label, "Slot freed without a reusable resource");
            }
            Some(resource) => {
                let mut state = self.state.lock();
                if state.closed {
                    drop(state);
                    drop(resource);
                    debug!(pool = %self.label, "Pool closed, dropping returned resource");
                    return;
                }
                state.idle.push_back(IdleResource {
                    resource,
                    idle_since: Instant::now(),
                });
            }
        }

        self.permits.add_permits(1);
    }

    fn close(&self) {
        let drained = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        self.permits.close();

        info!(
            pool = %self.label,
            idle_dropped = drained.len(),
            in_use = self.in_use.load(Ordering::SeqCst),
            "Closed resource pool"
        );
    }

    /// `None` once the pool is closed
    fn evict_idle(&self) -> Option<usize> {
        let mut expired = Vec::new();
        {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            // front of the queue holds the longest-idle resources
            while state
                .idle
                .front()
                .is_some_and(|idle| self.is_expired(idle))
            {
                if let Some(idle) = state.idle.pop_front() {
                    expired.push(idle.resource);
                }
            }
        }

        let evicted = expired.len();
        if evicted > 0 {
            self.counters
                .evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(pool = %self.label, evicted, "Evicted idle resources");
        }
        Some(evicted)
    }

    fn stats(&self) -> PoolStats {
        let idle = self.state.lock().idle.len();
        PoolStats {
            capacity: self.capacity,
            in_use: self.in_use.load(Ordering::SeqCst),
            idle,
            total_created: self.counters.created.load(Ordering::Relaxed),
            total_reused: self.counters.reused.load(Ordering::Relaxed),
            total_discarded: self.counters.discarded.load(Ordering::Relaxed),
            total_evicted: self.counters.evicted.load(Ordering::Relaxed),
            failed_attempts: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

fn spawn_reaper<R: Send + 'static>(shared: &Arc<Shared<R>>, every: Duration) {
    if every.is_zero() || shared.idle_timeout.is_zero() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!(pool = %shared.label, "No runtime, idle eviction runs on get only");
        return;
    };

    let weak: Weak<Shared<R>> = Arc::downgrade(shared);
    runtime.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + every, every);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else { break };
            if shared.evict_idle().is_none() {
                break;
            }
        }
    });
}
