//! addrpool - connection pools for many backend addresses behind one registry
//!
//! ```rust,no_run
//! use addrpool::{tcp, PoolConfig, Pools};
//!
//! # async fn example() -> Result<(), addrpool::PoolError> {
//! let config = PoolConfig::with_capacity(8);
//! let pools = Pools::new(config.clone(), tcp::connector(config.connect_timeout()));
//!
//! let conn = pools.acquire("10.0.0.7:6379").await?;
//! // ... talk to the backend, call `conn.close()` on protocol errors ...
//! pools.release(conn);
//!
//! pools.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pool;
pub mod tcp;

pub use config::{Config, PoolConfig};
pub use pool::{Conn, Connector, PoolError, PoolStats, Pools};
