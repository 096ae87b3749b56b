use std::time::Duration;

use super::conn::{Addr, BoxError};

/// Errors produced by a bounded resource pool
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource pool exhausted")]
    Exhausted,

    #[error("timed out after {0:?} waiting for a free resource")]
    Timeout(Duration),

    #[error("resource pool is closed")]
    Closed,

    #[error("failed to create resource: {0}")]
    CreationFailed(#[source] BoxError),
}

/// Errors surfaced to callers of the pool registry
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to acquire connection to {addr}: {source}")]
    Acquire {
        addr: Addr,
        #[source]
        source: ResourceError,
    },

    #[error("pool registry is closed")]
    RegistryClosed,
}

impl PoolError {
    /// No slot became free (immediately for `try_acquire`, or within the acquire timeout)
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            PoolError::Acquire {
                source: ResourceError::Exhausted | ResourceError::Timeout(_),
                ..
            }
        )
    }

    /// The registry or the address pool was shut down
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            PoolError::RegistryClosed
                | PoolError::Acquire {
                    source: ResourceError::Closed,
                    ..
                }
        )
    }

    /// The connector failed or produced no connection
    pub fn is_creation_failed(&self) -> bool {
        matches!(
            self,
            PoolError::Acquire {
                source: ResourceError::CreationFailed(_),
                ..
            }
        )
    }

    /// Address the failed acquisition targeted, if any
    pub fn addr(&self) -> Option<&str> {
        match self {
            PoolError::Acquire { addr, .. } => Some(addr.as_str()),
            PoolError::RegistryClosed => None,
        }
    }
}
