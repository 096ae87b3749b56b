//! Registry of per-address pools
//!
//! [`Pools`] creates one [`AddrPool`] the first time an address is acquired
//! and routes every later acquire and release for that address to it. The
//! registry mutex only guards the address map: it is never held while an
//! address pool waits for capacity, so a saturated address cannot stall
//! acquisitions for any other address.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::addr::AddrPool;
use super::conn::{Addr, Conn, Connector};
use super::error::PoolError;
use super::resource::{MakeBounded, MakeResourcePool, PoolStats};
use crate::config::PoolConfig;

struct Registry<T> {
    pools: HashMap<Addr, Arc<AddrPool<T>>>,
    closed: bool,
}

/// Connection pools for many addresses behind one acquire/release/close API
///
/// Share it between tasks with an `Arc`. Once [`Pools::close`] has run the
/// registry stays closed; build a new one to resume.
pub struct Pools<T> {
    registry: Mutex<Registry<T>>,
    config: PoolConfig,
    connector: Connector<T>,
    make: Arc<dyn MakeResourcePool<Conn<T>>>,
}

impl<T: Send + 'static> Pools<T> {
    /// Create a registry whose address pools are [`BoundedPool`](super::BoundedPool)s
    pub fn new(config: PoolConfig, connector: Connector<T>) -> Self {
        Self::with_resource_pool(config, connector, MakeBounded)
    }

    /// Create a registry whose address pools are backed by whatever `make` builds
    pub fn with_resource_pool<M>(mut config: PoolConfig, connector: Connector<T>, make: M) -> Self
    where
        M: MakeResourcePool<Conn<T>>,
    {
        if config.capacity == 0 {
            warn!("Pool capacity of 0 requested, using 1");
            config.capacity = 1;
        }

        Self {
            registry: Mutex::new(Registry {
                pools: HashMap::new(),
                closed: false,
            }),
            config,
            connector,
            make: Arc::new(make),
        }
    }

    /// Settings every address pool is created with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a connection to `addr`
    ///
    /// The pool for `addr` is created on first use. Waits while that pool is
    /// at capacity; other addresses are unaffected.
    pub async fn acquire(&self, addr: &str) -> Result<Conn<T>, PoolError> {
        let pool = self.pool_for(addr)?;
        pool.acquire().await
    }

    /// Check out a connection to `addr`, failing instead of waiting when the
    /// pool is at capacity
    pub async fn try_acquire(&self, addr: &str) -> Result<Conn<T>, PoolError> {
        let pool = self.pool_for(addr)?;
        pool.try_acquire().await
    }

    /// Hand a connection back to the pool of its address
    ///
    /// `None` is ignored. If no pool is registered for the connection's
    /// address (the registry was closed, or the connection came from
    /// elsewhere) the connection is closed on the spot.
    pub fn release(&self, conn: impl Into<Option<Conn<T>>>) {
        let Some(mut conn) = conn.into() else {
            return;
        };

        let pool = {
            let registry = self.registry.lock();
            registry.pools.get(conn.addr()).cloned()
        };

        match pool {
            Some(pool) => pool.release(conn),
            None => {
                warn!(addr = %conn.addr(), "No pool registered for address, closing connection");
                conn.close();
                conn.free_slot();
            }
        }
    }

    /// Close every address pool and forget them
    ///
    /// Pending and later acquisitions fail; connections released afterwards
    /// are closed directly. Calling this again does nothing.
    pub fn close(&self) {
        let mut registry = self.registry.lock();
        if registry.closed {
            debug!("Pool registry already closed");
            return;
        }

        for (addr, pool) in registry.pools.iter() {
            debug!(addr = %addr, "Closing address pool");
            pool.close();
        }

        let count = registry.pools.len();
        registry.pools = HashMap::new();
        registry.closed = true;

        info!(pools = count, "Closed pool registry");
    }

    /// Whether [`Pools::close`] has run
    pub fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }

    /// Number of address pools created so far
    pub fn len(&self) -> usize {
        self.registry.lock().pools.len()
    }

    /// Whether no address pool exists yet (or any more)
    pub fn is_empty(&self) -> bool {
        self.registry.lock().pools.is_empty()
    }

    /// Whether a pool for `addr` has been created
    pub fn contains(&self, addr: &str) -> bool {
        self.registry.lock().pools.contains_key(addr)
    }

    /// Addresses that currently have a pool, in no particular order
    pub fn addrs(&self) -> Vec<Addr> {
        self.registry.lock().pools.keys().cloned().collect()
    }

    /// Statistics for the pool of `addr`, if one exists
    pub fn stats(&self, addr: &str) -> Option<PoolStats> {
        let pool = self.registry.lock().pools.get(addr).cloned();
        pool.map(|pool| pool.stats())
    }

    /// Statistics for every address pool
    pub fn all_stats(&self) -> HashMap<Addr, PoolStats> {
        let pools: Vec<_> = {
            let registry = self.registry.lock();
            registry
                .pools
                .iter()
                .map(|(addr, pool)| (addr.clone(), Arc::clone(pool)))
                .collect()
        };

        pools
            .into_iter()
            .map(|(addr, pool)| (addr, pool.stats()))
            .collect()
    }

    // find-or-create under the registry lock; the caller acquires after the
    // lock is released
    fn pool_for(&self, addr: &str) -> Result<Arc<AddrPool<T>>, PoolError> {
        let mut registry = self.registry.lock();
        if registry.closed {
            return Err(PoolError::RegistryClosed);
        }

        if let Some(pool) = registry.pools.get(addr) {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(AddrPool::with_resource_pool(
            addr,
            &self.config,
            self.connector.clone(),
            self.make.as_ref(),
        ));
        registry.pools.insert(addr.to_string(), Arc::clone(&pool));

        info!(
            addr = %addr,
            capacity = self.config.capacity,
            pools = registry.pools.len(),
            "Created address pool"
        );

        Ok(pool)
    }
}
