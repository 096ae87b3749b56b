//! Integration tests for the pool registry
//!
//! These tests drive `Pools` through its public API the way a client of many
//! backend shards would: concurrent acquisitions, releases of healthy and
//! broken connections, and shutdown.

use addrpool::pool::{Conn, Connector, Pools};
use addrpool::{tcp, PoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Fake backend connection that records when it is torn down
struct FakeConn {
    id: usize,
    dropped: Arc<AtomicUsize>,
}

impl Drop for FakeConn {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

struct Backend {
    dialed: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl Backend {
    fn new() -> Self {
        Self {
            dialed: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn connector(&self) -> Connector<FakeConn> {
        let dialed = self.dialed.clone();
        let dropped = self.dropped.clone();
        Connector::new(move |_addr| {
            let id = dialed.fetch_add(1, Ordering::SeqCst);
            let dropped = dropped.clone();
            async move { Ok::<_, std::io::Error>(FakeConn { id, dropped }) }
        })
    }

    fn dialed(&self) -> usize {
        self.dialed.load(Ordering::SeqCst)
    }

    fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_round_trip_reuses_connection() {
    let backend = Backend::new();
    let pools = Pools::new(PoolConfig::with_capacity(4), backend.connector());

    let conn = pools.acquire("A").await.unwrap();
    let first_id = conn.get().unwrap().id;
    pools.release(conn);

    let conn = pools.acquire("A").await.unwrap();
    assert_eq!(conn.get().unwrap().id, first_id);
    assert_eq!(backend.dialed(), 1);

    let stats = pools.stats("A").unwrap();
    assert_eq!(stats.total_created, 1);
    assert_eq!(stats.total_reused, 1);
    assert_eq!(stats.in_use, 1);
}

#[tokio::test]
async fn test_addresses_get_separate_pools() {
    let backend = Backend::new();
    let pools = Pools::new(PoolConfig::with_capacity(1), backend.connector());

    let a = pools.acquire("A").await.unwrap();
    // "A" is at capacity; "B" must not be affected
    let b = pools.try_acquire("B").await.unwrap();

    assert_eq!(a.addr(), "A");
    assert_eq!(b.addr(), "B");
    assert_eq!(pools.len(), 2);

    let mut addrs = pools.addrs();
    addrs.sort();
    assert_eq!(addrs, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capacity_one_blocks_until_release() {
    let backend = Backend::new();
    let pools = Arc::new(Pools::new(PoolConfig::with_capacity(1), backend.connector()));

    let held = pools.acquire("A").await.unwrap();
    assert!(pools.try_acquire("A").await.unwrap_err().is_exhausted());

    let waiter = {
        let pools = pools.clone();
        tokio::spawn(async move { pools.acquire("A").await.map(|c| c.get().map(|f| f.id)) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    let held_id = held.get().unwrap().id;
    pools.release(held);

    let got = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter should be woken by release")
        .unwrap()
        .unwrap();
    assert_eq!(got, Some(held_id));
    assert_eq!(backend.dialed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_saturated_address_does_not_block_others() {
    let backend = Backend::new();
    let pools = Arc::new(Pools::new(PoolConfig::with_capacity(1), backend.connector()));

    let _held = pools.acquire("A").await.unwrap();
    let blocked = {
        let pools = pools.clone();
        tokio::spawn(async move { pools.acquire("A").await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // a waiter on "A" must not hold the registry lock
    let other = tokio::time::timeout(Duration::from_secs(5), pools.acquire("B"))
        .await
        .expect("acquire for B should not wait on A")
        .unwrap();
    assert_eq!(other.addr(), "B");

    blocked.abort();
}

#[tokio::test]
async fn test_closed_connection_is_never_handed_out_again() {
    let backend = Backend::new();
    let pools = Pools::new(PoolConfig::with_capacity(2), backend.connector());

    let mut conn = pools.acquire("A").await.unwrap();
    let broken_id = conn.get().unwrap().id;
    conn.close();
    assert_eq!(backend.dropped(), 1);
    pools.release(conn);

    for _ in 0..4 {
        let conn = pools.acquire("A").await.unwrap();
        assert_ne!(conn.get().unwrap().id, broken_id);
        pools.release(conn);
    }

    let stats = pools.stats("A").unwrap();
    assert_eq!(stats.total_discarded, 1);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn test_release_none_is_noop() {
    let backend = Backend::new();
    let pools = Pools::new(PoolConfig::with_capacity(1), backend.connector());

    pools.release(None::<Conn<FakeConn>>);
    assert!(pools.is_empty());

    let conn = pools.acquire("A").await.unwrap();
    let before = pools.all_stats();
    pools.release(None::<Conn<FakeConn>>);
    assert_eq!(pools.all_stats(), before);
    pools.release(conn);
}

#[tokio::test]
async fn test_release_for_unknown_address_closes_connection() {
    let backend = Backend::new();
    let pools = Pools::new(PoolConfig::with_capacity(1), backend.connector());

    let stray = Conn::new(
        "B",
        FakeConn {
            id: 42,
            dropped: backend.dropped.clone(),
        },
    );
    pools.release(stray);

    assert_eq!(backend.dropped(), 1);
    assert!(!pools.contains("B"));
    assert!(pools.is_empty());
}

#[tokio::test]
async fn test_close_drains_all_pools() {
    let backend = Backend::new();
    let pools = Pools::new(PoolConfig::with_capacity(2), backend.connector());

    let a = pools.acquire("A").await.unwrap();
    let b = pools.acquire("B").await.unwrap();
    let still_out = pools.acquire("B").await.unwrap();
    pools.release(a);
    pools.release(b);

    pools.close();
    assert!(pools.is_empty());
    assert!(pools.is_closed());
    // both idle connections were torn down by the close
    assert_eq!(backend.dropped(), 2);

    // handed back after close: closed directly
    pools.release(still_out);
    assert_eq!(backend.dropped(), 3);

    let err = pools.acquire("A").await.unwrap_err();
    assert!(err.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_fails_pending_acquire() {
    let backend = Backend::new();
    let pools = Arc::new(Pools::new(PoolConfig::with_capacity(1), backend.connector()));

    let held = pools.acquire("A").await.unwrap();
    let waiter = {
        let pools = pools.clone();
        tokio::spawn(async move { pools.acquire("A").await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pools.close();

    let err = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("close should wake waiters")
        .unwrap()
        .unwrap_err();
    assert!(err.is_closed());

    pools.release(held);
}

#[tokio::test]
async fn test_close_during_connect_drops_new_connection() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let dialing = Arc::new(Notify::new());
    let finish = Arc::new(Notify::new());

    let connector = {
        let dropped = dropped.clone();
        let dialing = dialing.clone();
        let finish = finish.clone();
        Connector::new(move |_addr| {
            let dropped = dropped.clone();
            let dialing = dialing.clone();
            let finish = finish.clone();
            async move {
                dialing.notify_one();
                finish.notified().await;
                Ok::<_, std::io::Error>(FakeConn { id: 0, dropped })
            }
        })
    };
    let pools = Arc::new(Pools::new(PoolConfig::with_capacity(1), connector));

    let pending = {
        let pools = pools.clone();
        tokio::spawn(async move { pools.acquire("A").await.map(|_| ()) })
    };
    dialing.notified().await;

    pools.close();
    finish.notify_one();

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_closed());
    assert_eq!(err.addr(), Some("A"));
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_connection_returns_its_slot() {
    let backend = Backend::new();
    let pools = Pools::new(PoolConfig::with_capacity(1), backend.connector());

    let conn = pools.acquire("A").await.unwrap();
    drop(conn);
    assert_eq!(backend.dropped(), 1);

    let stats = pools.stats("A").unwrap();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, 0);

    let conn = pools.try_acquire("A").await.unwrap();
    assert_eq!(conn.get().unwrap().id, 1);
    pools.release(conn);
}

#[tokio::test]
async fn test_zero_idle_timeout_keeps_connections() {
    let backend = Backend::new();
    let config = PoolConfig {
        idle_timeout_secs: 0,
        ..PoolConfig::with_capacity(1)
    };
    config.validate().unwrap();
    let pools = Pools::new(config, backend.connector());

    let conn = pools.acquire("A").await.unwrap();
    pools.release(conn);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let conn = pools.acquire("A").await.unwrap();
    assert_eq!(conn.get().unwrap().id, 0);
    assert_eq!(backend.dialed(), 1);
    pools.release(conn);
}

#[tokio::test]
async fn test_connector_failure_propagates() {
    let pools = Pools::new(
        PoolConfig::with_capacity(1),
        Connector::<FakeConn>::new(|addr| async move {
            Err::<FakeConn, _>(format!("{} refused the connection", addr))
        }),
    );

    let err = pools.acquire("A").await.unwrap_err();
    assert!(err.is_creation_failed());
    assert_eq!(err.addr(), Some("A"));

    // failed creation does not consume the slot
    let stats = pools.stats("A").unwrap();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.failed_attempts, 1);
}

#[tokio::test]
async fn test_acquire_timeout_is_reported_as_exhausted() {
    let backend = Backend::new();
    let config = PoolConfig {
        acquire_timeout_ms: Some(20),
        ..PoolConfig::with_capacity(1)
    };
    let pools = Pools::new(config, backend.connector());

    let _held = pools.acquire("A").await.unwrap();
    let err = pools.acquire("A").await.unwrap_err();
    assert!(err.is_exhausted());
}

#[tokio::test]
async fn test_tcp_connections_are_reused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));

    let server_accepted = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            server_accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let pools = Pools::new(
        PoolConfig::with_capacity(2),
        tcp::connector(Duration::from_secs(2)),
    );

    for round in 0..3u8 {
        let mut conn = pools.acquire(&addr).await.unwrap();
        let stream = conn.get_mut().unwrap();
        stream.write_all(&[round]).await.unwrap();
        let mut echo = [0u8; 1];
        stream.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo[0], round);
        pools.release(conn);
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(pools.stats(&addr).unwrap().total_created, 1);
    pools.close();
}

#[tokio::test]
async fn test_tcp_connect_failure() {
    // bind then drop to get a port nothing listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let pools = Pools::new(
        PoolConfig::with_capacity(1),
        tcp::connector(Duration::from_millis(500)),
    );

    let err = pools.acquire(&addr).await.unwrap_err();
    assert!(err.is_creation_failed());
}
