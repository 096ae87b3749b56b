//! Address-tagged connection handles and the connector that produces them
//!
//! A [`Conn`] is owned by exactly one side at a time: the address pool while
//! it sits idle, or the caller while it is checked out. Closing a handle drops
//! its payload, which releases the underlying resource. A checked-out handle
//! that is dropped instead of released gives its slot back on drop.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Network destination a connection belongs to (e.g. "10.0.0.7:6379")
pub type Addr = String;

/// Boxed error returned by connectors
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type ConnectFn<T> = dyn Fn(Addr) -> BoxFuture<'static, Result<Option<T>, BoxError>> + Send + Sync;

/// Frees the capacity slot of a checked-out handle
pub(crate) type Lease = Box<dyn FnOnce() + Send + Sync>;

/// A pooled connection tagged with its destination address
pub struct Conn<T> {
    addr: Addr,
    inner: Option<T>,
    lease: Option<Lease>,
}

impl<T> Conn<T> {
    /// Wrap a live connection for `addr`
    pub fn new(addr: impl Into<Addr>, inner: T) -> Self {
        Self {
            addr: addr.into(),
            inner: Some(inner),
            lease: None,
        }
    }

    /// Destination address this connection was created for
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the connection has been closed
    ///
    /// A closed handle is never recycled; releasing it only frees its slot.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Close the connection, dropping the underlying resource
    ///
    /// Calling this more than once has no further effect.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!(addr = %self.addr, "Closed connection");
        }
    }

    /// Shared access to the live connection, `None` once closed
    pub fn get(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Mutable access to the live connection, `None` once closed
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut()
    }

    /// Detach the live connection from the handle
    ///
    /// The handle is closed afterwards and must still be released so the
    /// pool can reclaim its slot.
    pub fn take(&mut self) -> Option<T> {
        self.inner.take()
    }

    pub(crate) fn lease(&mut self, lease: Lease) {
        self.lease = Some(lease);
    }

    /// Forget the lease without freeing the slot; the pool takes over
    pub(crate) fn end_lease(&mut self) {
        self.lease = None;
    }

    /// Free the slot this handle holds, if it holds one
    pub(crate) fn free_slot(&mut self) {
        if let Some(free) = self.lease.take() {
            free();
        }
    }
}

impl<T> Drop for Conn<T> {
    fn drop(&mut self) {
        if self.lease.is_some() {
            warn!(addr = %self.addr, "Connection dropped without being released, freeing its slot");
            self.inner.take();
            self.free_slot();
        }
    }
}

impl<T> fmt::Debug for Conn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Factory for new connections, shared by every pool of a registry
///
/// Wraps an async function from address to connection. A connector may
/// report success without producing a connection (see [`Connector::optional`]);
/// the pool treats that as a creation failure.
pub struct Connector<T> {
    connect: Arc<ConnectFn<T>>,
}

impl<T> Clone for Connector<T> {
    fn clone(&self) -> Self {
        Self {
            connect: Arc::clone(&self.connect),
        }
    }
}

impl<T: Send + 'static> Connector<T> {
    /// Build a connector from a function that always yields a connection on success
    pub fn new<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Addr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            connect: Arc::new(move |addr: Addr| {
                let fut = f(addr);
                async move { fut.await.map(Some).map_err(Into::<BoxError>::into) }.boxed()
            }),
        }
    }

    /// Build a connector from a function that may succeed without a connection
    pub fn optional<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Addr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            connect: Arc::new(move |addr: Addr| {
                let fut = f(addr);
                async move { fut.await.map_err(Into::<BoxError>::into) }.boxed()
            }),
        }
    }

    /// Dial `addr`
    pub async fn connect(&self, addr: Addr) -> Result<Option<T>, BoxError> {
        (self.connect)(addr).await
    }
}

impl<T> fmt::Debug for Connector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector").finish_non_exhaustive()
    }
}
