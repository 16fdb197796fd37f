use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use proto::{ClientRequest, ClientResponse, NatClass, RequestType, ServerRequest, ServerResponse};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::config::{ConfigError, ServerConfig};

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bind(#[from] net::BindError),
}

/// A running server. Dropping or calling [`Handle::stop`] cooperatively
/// terminates the accept loop; in-flight handlers and probes are left to
/// finish naturally.
pub struct Handle {
    stop: Arc<Notify>,
    local_addr: SocketAddr,
}

impl Handle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.stop.notify_waiters();
    }
}

/// Validate `config`, then bind `(host1, port1)` and accept client
/// requests indefinitely. Each connection is handled independently and
/// concurrently. Returns a [`Handle`] immediately after the listen
/// socket is bound; the accept loop itself runs in a spawned task.
pub async fn start(config: Arc<ServerConfig>) -> Result<Handle, StartError> {
    config.validate()?;

    let listen_addr = SocketAddr::new(config.host1, config.port1);
    let listener = net::listen(listen_addr)?;
    let local_addr = listener.local_addr().unwrap_or(listen_addr);
    let stop = Arc::new(Notify::new());
    let stop_task = stop.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop_task.notified() => {
                    log::info!("server accept loop stopping: addr={local_addr}");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let config = config.clone();
                            net::tune(&socket);
                            log::info!("accepted connection: peer={peer}");
                            tokio::spawn(handle_connection(socket, peer, config));
                        }
                        Err(e) => {
                            log::error!("accept failed fatally: {e}");
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(Handle { stop, local_addr })
}

async fn handle_connection(mut socket: TcpStream, peer: SocketAddr, config: Arc<ServerConfig>) {
    let request = match ClientRequest::read_from(&mut socket).await {
        Ok(req) => req,
        Err(e) => {
            log::warn!("decode client request failed: peer={peer}, err={e}");
            return;
        }
    };

    log::debug!("decoded client request: peer={peer}, request={request:?}");

    let response = ServerResponse {
        client_local_host: request.local_host,
        client_local_port: request.local_port,
        client_mapped_host: peer.ip(),
        client_mapped_port: peer.port(),
        server_host1: config.host1,
        server_host2: config.host2.unwrap_or(config.host1),
        server_port1: config.port1,
        server_port2: config.port2.unwrap_or(config.port1),
    };

    if let Err(e) = response.write_to(&mut socket).await {
        log::warn!("encode server response failed: peer={peer}, err={e}");
        return;
    }

    drop(socket);
    log::info!(
        "responded to {peer}: claimed={}:{}, mapped={}:{}",
        response.client_local_host,
        response.client_local_port,
        response.client_mapped_host,
        response.client_mapped_port,
    );

    let no_nat = response.client_mapped_host == response.client_local_host
        && response.client_mapped_port == response.client_local_port;

    if config.basic || request.request_type == RequestType::ExternalAddressDiscovery || no_nat {
        return;
    }

    let mapped = SocketAddr::new(response.client_mapped_host, response.client_mapped_port);
    for (local, label) in config.probe_plan() {
        tokio::spawn(send_probe(local, mapped, label, config.timeout));
    }
}

async fn send_probe(local: SocketAddr, mapped: SocketAddr, label: NatClass, timeout: Duration) {
    let mut stream = match net::dial(local, mapped, timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            log::debug!("probe dial failed: local={local}, target={mapped}, label={label}, err={e}");
            return;
        }
    };

    let request = ServerRequest { label };
    if let Err(e) = request.write_to(&mut stream).await {
        log::debug!("probe encode failed: target={mapped}, label={label}, err={e}");
        return;
    }

    match ClientResponse::read_from(&mut stream).await {
        Ok(_) => log::info!("probe succeeded: target={mapped}, label={label}"),
        Err(e) => log::debug!("probe ack not received: target={mapped}, label={label}, err={e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[tokio::test]
    async fn no_nat_skips_probes_and_responds_once() {
        let config = Arc::new(ServerConfig {
            host1: loopback(),
            host2: Some(loopback()),
            port1: 0,
            port2: Some(0),
            timeout: Duration::from_millis(300),
            basic: false,
        });

        let handle = start(config).await.unwrap();
        let server_addr = handle.local_addr();

        let local = net::listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let client_local = local.local_addr().unwrap();
        drop(local);

        let mut stream = net::dial(client_local, server_addr, Duration::from_secs(1))
            .await
            .unwrap();

        let req = ClientRequest {
            request_type: RequestType::NatTypeDiscovery,
            local_host: client_local.ip(),
            local_port: client_local.port(),
        };
        req.write_to(&mut stream).await.unwrap();

        let res = ServerResponse::read_from(&mut stream).await.unwrap();
        assert_eq!(res.client_mapped_host, client_local.ip());
        assert_eq!(res.client_mapped_port, client_local.port());

        handle.stop();
    }

    #[tokio::test]
    async fn basic_mode_server_allows_missing_host2() {
        let config = ServerConfig {
            host1: loopback(),
            host2: None,
            port1: 0,
            port2: None,
            timeout: Duration::from_millis(300),
            basic: true,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_basic_mode_requires_host2_and_port2() {
        let config = ServerConfig {
            host1: loopback(),
            host2: None,
            port1: 3478,
            port2: None,
            timeout: Duration::from_secs(3),
            basic: false,
        };

        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn start_rejects_invalid_config_instead_of_panicking() {
        // A caller that skips `validate()` and hands a non-basic config
        // with no host2/port2 straight to `start` must get a
        // `StartError::Config`, not a panic the first time a classifying
        // request reaches `probe_plan`.
        let config = Arc::new(ServerConfig {
            host1: loopback(),
            host2: None,
            port1: 0,
            port2: None,
            timeout: Duration::from_millis(300),
            basic: false,
        });

        let err = start(config).await.unwrap_err();
        assert!(matches!(err, StartError::Config(_)));
    }
}
