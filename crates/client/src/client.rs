use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use proto::{merge, ClientRequest, ClientResponse, NatClass, RequestType, ServerRequest, ServerResponse};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::{ClientConfig, ConfigError};

/// Current NAT class and observed mapped endpoint, guarded by one
/// mutex: read for the early-exit check and for the final report,
/// written by the initial response path and by each probe handler.
/// Writes only ever move the class up the lattice via [`merge`].
#[derive(Default)]
struct Shared {
    class: NatClass,
    mapped: Option<SocketAddr>,
}

pub struct NatResult {
    pub class: NatClass,
    pub local: SocketAddr,
    pub mapped: Option<SocketAddr>,
    pub basic: bool,
}

struct ProbeListener {
    task: JoinHandle<()>,
}

impl ProbeListener {
    /// Cooperative cancellation: aborting the accept-loop task drops its
    /// listening socket, releasing the port.
    fn cancel(self) {
        self.task.abort();
    }
}

fn spawn_probe_listener(listener: TcpListener, shared: Arc<Mutex<Shared>>) -> ProbeListener {
    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    log::debug!("probe connection accepted: peer={peer}");
                    tokio::spawn(handle_probe(socket, shared.clone()));
                }
                Err(e) => {
                    log::debug!("probe listener accept error: {e}");
                    break;
                }
            }
        }
    });

    ProbeListener { task }
}

async fn handle_probe(mut socket: TcpStream, shared: Arc<Mutex<Shared>>) {
    let request = match ServerRequest::read_from(&mut socket).await {
        Ok(req) => req,
        Err(e) => {
            log::debug!("decode server request failed: {e}");
            return;
        }
    };

    if let Err(e) = ClientResponse.write_to(&mut socket).await {
        log::debug!("encode client response failed: {e}");
    }

    let mut shared = shared.lock().await;
    shared.class = merge(shared.class, request.label);
    log::info!("probe arrived: label={}, class is now {}", request.label, shared.class);
}

/// Run the full classification algorithm described by the client state
/// machine: dial the server, interpret its response, and (unless in
/// basic mode) wait for probes to arrive and refine the NAT class.
pub async fn run(config: &ClientConfig) -> Result<NatResult, ConfigError> {
    let mut local = config.resolve_local_addr().await?;
    let shared = Arc::new(Mutex::new(Shared::default()));

    let mut listener_task = None;
    if !config.basic {
        match net::listen(local) {
            Ok(listener) => {
                local = listener.local_addr().unwrap_or(local);
                listener_task = Some(spawn_probe_listener(listener, shared.clone()));
            }
            Err(e) => {
                log::warn!("probe listener bind failed, proceeding without NAT classification: {e}");
            }
        }
    }

    let result = run_dial_and_wait(config, local, &shared).await;

    if let Some(listener) = listener_task {
        listener.cancel();
    }

    result
}

async fn run_dial_and_wait(
    config: &ClientConfig,
    local: SocketAddr,
    shared: &Arc<Mutex<Shared>>,
) -> Result<NatResult, ConfigError> {
    let remote = match resolve_server_addr(config).await {
        Ok(addr) => addr,
        Err(e) => {
            log::warn!("failed to resolve server address: {e}");
            return Ok(blocked_result(config, local));
        }
    };

    let mut stream = match net::dial(local, remote, config.timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("dial to server failed: {e}");
            return Ok(blocked_result(config, local));
        }
    };

    let request_type = if config.basic {
        RequestType::ExternalAddressDiscovery
    } else {
        RequestType::NatTypeDiscovery
    };

    let actual_local = stream.local_addr().unwrap_or(local);
    let request = ClientRequest {
        request_type,
        local_host: actual_local.ip(),
        local_port: actual_local.port(),
    };

    if let Err(e) = request.write_to(&mut stream).await {
        log::warn!("encode client request failed: {e}");
        return Ok(blocked_result(config, actual_local));
    }

    let response = match ServerResponse::read_from(&mut stream).await {
        Ok(res) => res,
        Err(e) => {
            log::warn!("decode server response failed: {e}");
            return Ok(blocked_result(config, actual_local));
        }
    };

    drop(stream);

    let mapped = SocketAddr::new(response.client_mapped_host, response.client_mapped_port);
    let claimed_local = SocketAddr::new(response.client_local_host, response.client_local_port);
    let no_nat = mapped == claimed_local;

    {
        let mut shared = shared.lock().await;
        shared.mapped = Some(mapped);
        shared.class = if no_nat {
            NatClass::OpenInternet
        } else if config.basic {
            // Basic mode only performs external-address discovery; it
            // never exercises the probe choreography, so it cannot
            // claim any class more specific than "unknown".
            NatClass::Blocked
        } else {
            NatClass::Symmetric
        };
    }

    if no_nat || config.basic {
        let shared = shared.lock().await;
        return Ok(NatResult {
            class: shared.class,
            local: actual_local,
            mapped: shared.mapped,
            basic: config.basic,
        });
    }

    wait_for_probes(config.timeout, shared).await;

    let shared = shared.lock().await;
    Ok(NatResult {
        class: shared.class,
        local: actual_local,
        mapped: shared.mapped,
        basic: config.basic,
    })
}

async fn resolve_server_addr(config: &ClientConfig) -> std::io::Result<SocketAddr> {
    tokio::net::lookup_host((config.server_host.as_str(), config.server_port))
        .await?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "server host did not resolve"))
}

fn blocked_result(config: &ClientConfig, local: SocketAddr) -> NatResult {
    NatResult {
        class: NatClass::Blocked,
        local,
        mapped: None,
        basic: config.basic,
    }
}

/// Poll the shared class once a second for `timeout + 1` seconds total,
/// exiting early the moment a `FullCone` probe has arrived.
async fn wait_for_probes(timeout: Duration, shared: &Arc<Mutex<Shared>>) {
    let ticks = timeout.as_secs() + 1;

    for _ in 0..ticks {
        sleep(Duration::from_secs(1)).await;

        let class = shared.lock().await.class;
        if class == NatClass::FullCone {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration as StdDuration;

    fn cfg() -> ClientConfig {
        ClientConfig {
            server_host: "127.0.0.1".into(),
            server_port: 0,
            local_addr: Some("127.0.0.1:0".into()),
            timeout: StdDuration::from_millis(300),
            basic: false,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn unreachable_server_reports_blocked() {
        // Port 0 never accepts connections, and "connect" to port 0 is
        // refused immediately on loopback.
        let config = cfg();
        let result = run(&config).await.unwrap();
        assert_eq!(result.class, NatClass::Blocked);
        assert!(result.mapped.is_none());
    }

    #[tokio::test]
    async fn handle_probe_merges_label_into_shared_class() {
        let shared = Arc::new(Mutex::new(Shared::default()));

        let listener = net::listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let shared_for_server = shared.clone();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_probe(socket, shared_for_server).await;
        });

        let mut stream = net::dial(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            addr,
            StdDuration::from_secs(1),
        )
        .await
        .unwrap();

        ServerRequest {
            label: NatClass::FullCone,
        }
        .write_to(&mut stream)
        .await
        .unwrap();

        let _ack = ClientResponse::read_from(&mut stream).await.unwrap();

        // give the spawned handler a moment to take the lock after ack
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(shared.lock().await.class, NatClass::FullCone);
    }
}
