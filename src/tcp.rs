//! TCP connector for plain socket backends

use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::pool::{Addr, Connector};

/// Connector that dials `host:port` addresses over TCP
pub fn connector(connect_timeout: Duration) -> Connector<TcpStream> {
    Connector::new(move |addr: Addr| async move { dial(&addr, connect_timeout).await })
}

/// Dial `addr` with a timeout, enabling TCP keep-alive and disabling Nagle
pub async fn dial(addr: &str, connect_timeout: Duration) -> io::Result<TcpStream> {
    debug!(addr = %addr, timeout_ms = connect_timeout.as_millis() as u64, "Dialing backend");

    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", addr, connect_timeout),
            )
        })??;

    stream.set_nodelay(true)?;
    socket2::SockRef::from(&stream).set_keepalive(true)?;

    Ok(stream)
}
