//! Per-address connection pooling
//!
//! This module provides:
//! - Address-tagged connection handles and the connector that dials them
//! - A bounded, idle-evicting resource pool per address
//! - A registry that creates address pools lazily and closes them all at once

pub mod addr;
pub mod conn;
pub mod error;
pub mod registry;
pub mod resource;

pub use addr::AddrPool;
pub use conn::{Addr, BoxError, Conn, Connector};
pub use error::{PoolError, ResourceError};
pub use registry::Pools;
pub use resource::{BoundedPool, CreateFn, MakeBounded, MakeResourcePool, PoolStats, ResourcePool};
