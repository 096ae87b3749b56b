//! Bounded pool of connections to a single address

use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::conn::{Addr, Conn, Connector, Lease};
use super::error::{PoolError, ResourceError};
use super::resource::{CreateFn, MakeBounded, MakeResourcePool, PoolStats, ResourcePool};
use crate::config::PoolConfig;

/// Reusable connections to one address
///
/// Translates acquire/release into calls on the backing [`ResourcePool`] and
/// keeps closed connections from being recycled.
pub struct AddrPool<T> {
    addr: Addr,
    pool: Arc<dyn ResourcePool<Resource = Conn<T>>>,
}

impl<T: Send + 'static> AddrPool<T> {
    /// Create a pool for `addr` backed by a [`BoundedPool`](super::BoundedPool)
    pub fn new(addr: impl Into<Addr>, config: &PoolConfig, connector: Connector<T>) -> Self {
        Self::with_resource_pool(addr, config, connector, &MakeBounded)
    }

    /// Create a pool for `addr` backed by whatever `make` builds
    pub fn with_resource_pool(
        addr: impl Into<Addr>,
        config: &PoolConfig,
        connector: Connector<T>,
        make: &dyn MakeResourcePool<Conn<T>>,
    ) -> Self {
        let addr = addr.into();
        let pool = make.make_pool(&addr, config, create_fn(addr.clone(), connector));
        Self {
            addr,
            pool: Arc::from(pool),
        }
    }

    /// Address every connection of this pool is dialed to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Check out an open connection, creating one if none is idle
    ///
    /// Waits while every slot is taken, unless the pool was configured with
    /// an acquire timeout.
    pub async fn acquire(&self) -> Result<Conn<T>, PoolError> {
        loop {
            let conn = self.pool.get().await.map_err(|source| self.error(source))?;
            if let Some(conn) = self.ensure_open(conn) {
                return Ok(conn);
            }
        }
    }

    /// Check out an open connection without waiting for a free slot
    pub async fn try_acquire(&self) -> Result<Conn<T>, PoolError> {
        loop {
            let conn = self.pool.try_get().await.map_err(|source| self.error(source))?;
            if let Some(conn) = self.ensure_open(conn) {
                return Ok(conn);
            }
        }
    }

    /// Hand a connection back
    ///
    /// Open connections become idle and reusable. Closed ones only free
    /// their slot. `None` is ignored. A connection for another address is
    /// closed and its slot goes back to the pool it came from.
    pub fn release(&self, conn: impl Into<Option<Conn<T>>>) {
        let Some(mut conn) = conn.into() else {
            return;
        };

        if conn.addr() != self.addr {
            warn!(
                pool = %self.addr,
                addr = %conn.addr(),
                "Connection released to a pool for another address, closing it"
            );
            conn.close();
            conn.free_slot();
            return;
        }

        conn.end_lease();
        if conn.is_closed() {
            debug!(addr = %self.addr, "Discarding closed connection");
            self.pool.put(None);
        } else {
            self.pool.put(Some(conn));
        }
    }

    /// Stop the backing pool: waiters fail, idle connections are dropped
    pub fn close(&self) {
        self.pool.close();
    }

    /// Statistics of the backing pool
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    // a backing pool should never hand out a closed connection; if one does,
    // free its slot and ask again
    fn ensure_open(&self, mut conn: Conn<T>) -> Option<Conn<T>> {
        if conn.is_closed() {
            warn!(addr = %self.addr, "Backing pool returned a closed connection");
            self.pool.put(None);
            return None;
        }
        conn.lease(self.lease());
        Some(conn)
    }

    fn lease(&self) -> Lease {
        let pool = Arc::downgrade(&self.pool);
        Box::new(move || {
            if let Some(pool) = pool.upgrade() {
                pool.put(None);
            }
        })
    }

    fn error(&self, source: ResourceError) -> PoolError {
        PoolError::Acquire {
            addr: self.addr.clone(),
            source,
        }
    }
}

fn create_fn<T: Send + 'static>(addr: Addr, connector: Connector<T>) -> CreateFn<Conn<T>> {
    Arc::new(move || {
        let addr = addr.clone();
        let connector = connector.clone();
        async move {
            match connector.connect(addr.clone()).await {
                Ok(Some(inner)) => Ok(Conn::new(addr, inner)),
                Ok(None) => Err(ResourceError::CreationFailed(
                    format!("connector returned no connection for {}", addr).into(),
                )),
                Err(e) => Err(ResourceError::CreationFailed(e)),
            }
        }
        .boxed()
    })
}
