//! Reuse-aware TCP socket construction.
//!
//! Both the client and the server dial outbound connections from
//! endpoints that are simultaneously used as listening endpoints (the
//! client reuses its outbound local endpoint as its probe listener; the
//! server dials outbound probes from endpoints it never listens on but
//! that must still coexist with the listener on a platform that treats
//! `SO_REUSEADDR`/`SO_REUSEPORT` as a package deal). Every socket this
//! crate creates therefore has both options set before bind.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to create socket: {0}")]
    Create(#[source] io::Error),
    #[error("failed to set reuse options: {0}")]
    Reuse(#[source] io::Error),
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DialError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused by {addr}")]
    Refused { addr: SocketAddr },
    #[error("network error dialing {addr}: {source}")]
    Network {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

fn reuse_socket(addr: SocketAddr) -> Result<TcpSocket, BindError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(BindError::Create)?;

    socket.set_reuseaddr(true).map_err(BindError::Reuse)?;
    #[cfg(unix)]
    socket.set_reuseport(true).map_err(BindError::Reuse)?;

    Ok(socket)
}

/// Bind a TCP listening socket to `local` with address/port reuse
/// enabled, so the exact (IP, port) can simultaneously be used to dial
/// outbound connections elsewhere in the process.
pub fn listen(local: SocketAddr) -> Result<TcpListener, BindError> {
    let socket = reuse_socket(local)?;

    socket
        .bind(local)
        .map_err(|source| BindError::Bind { addr: local, source })?;

    // Backlog of 128 matches the default Tokio/libstd listener backlog.
    socket
        .listen(128)
        .map_err(|source| BindError::Bind { addr: local, source })
}

/// Dial a TCP connection from `local` to `remote`, with address/port
/// reuse enabled on the connecting socket and a wall-clock `timeout` on
/// the connect phase. `local.port() == 0` lets the OS pick an ephemeral
/// port.
pub async fn dial(local: SocketAddr, remote: SocketAddr, connect_timeout: Duration) -> Result<TcpStream, DialError> {
    let socket = reuse_socket(local)?;

    socket
        .bind(local)
        .map_err(|source| BindError::Bind { addr: local, source })?;

    match timeout(connect_timeout, socket.connect(remote)).await {
        Err(_) => Err(DialError::Timeout(connect_timeout)),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            Err(DialError::Refused { addr: remote })
        }
        Ok(Err(source)) => Err(DialError::Network { addr: remote, source }),
        Ok(Ok(stream)) => {
            log::debug!("dialed {remote} from {local}");
            Ok(stream)
        }
    }
}

/// Dial `remote` from `local` and immediately close, reporting only
/// whether the attempt succeeded. Used by tooling, not by the
/// classification protocol itself.
pub async fn is_reachable(local: SocketAddr, remote: SocketAddr, connect_timeout: Duration) -> bool {
    dial(local, remote, connect_timeout).await.is_ok()
}

/// Open a throwaway UDP socket toward a well-known public address purely
/// to let the kernel choose a source address, and read it back. No bytes
/// are ever sent.
pub async fn outbound_ip() -> io::Result<std::net::IpAddr> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(("8.8.8.8", 80)).await?;
    Ok(socket.local_addr()?.ip())
}

/// Disable Nagle's algorithm on a freshly accepted or dialed socket.
/// Best-effort: failure is logged, not propagated, since it never
/// affects correctness of the classification, only latency.
pub fn tune(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("failed to set TCP_NODELAY: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn listen_and_dial_loopback() {
        let listener = listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let bound = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await });

        let stream = dial("127.0.0.1:0".parse().unwrap(), bound, Duration::from_secs(1))
            .await
            .unwrap();

        let (accepted, peer) = accept.await.unwrap().unwrap();
        assert_eq!(peer, stream.local_addr().unwrap());
        drop(accepted);
    }

    #[tokio::test]
    async fn dial_to_closed_port_fails() {
        // Bind a listener, learn the port, then drop it so nothing is
        // listening there anymore.
        let listener = listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = dial("127.0.0.1:0".parse().unwrap(), addr, Duration::from_millis(500)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn same_local_endpoint_can_listen_and_be_reused_as_dial_source() {
        // Exercise the exact discipline the client run loop relies on:
        // bind a listener, then dial *from* that same (IP, port).
        let listener = listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let local = listener.local_addr().unwrap();
        drop(listener);

        let listener = listen(local).unwrap();
        assert_eq!(listener.local_addr().unwrap(), local);

        let peer_listener = listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let peer_addr = peer_listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { peer_listener.accept().await });

        let _stream = dial(local, peer_addr, Duration::from_secs(1)).await.unwrap();
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn outbound_ip_resolves_to_a_real_address() {
        let ip = outbound_ip().await.unwrap();
        assert!(matches!(ip, IpAddr::V4(v4) if v4 != Ipv4Addr::UNSPECIFIED));
    }
}
