use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use natstun_server::ServerConfig;

/// TCP NAT-classification server. Requires two public IPs and two
/// ports unless `-B` (basic mode) is set.
#[derive(Parser)]
#[command(
    about = "TCP NAT-classification server",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Opts {
    /// first public IP address
    #[arg(long = "h1")]
    host1: IpAddr,

    /// second public IP address (required unless -B)
    #[arg(long = "h2")]
    host2: Option<IpAddr>,

    /// first port
    #[arg(long = "p1")]
    port1: u16,

    /// second port (required unless -B)
    #[arg(long = "p2")]
    port2: Option<u16>,

    /// connection / probe timeout, in seconds
    #[arg(short = 'O', long = "timeout", default_value_t = 3)]
    timeout: u64,

    /// basic mode: disable probes and relax the h2/p2 requirement
    #[arg(short = 'B', long = "basic")]
    basic: bool,

    /// enable debug logging
    #[arg(short = 'D', long = "debug")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let level = if opts.debug { log::Level::Debug } else { log::Level::Info };
    simple_logger::init_with_level(level)?;

    let config = Arc::new(ServerConfig {
        host1: opts.host1,
        host2: opts.host2,
        port1: opts.port1,
        port2: opts.port2,
        timeout: Duration::from_secs(opts.timeout),
        basic: opts.basic,
    });

    if let Err(e) = config.validate() {
        log::error!("configuration error: {e}");
        std::process::exit(1);
    }

    let handle = natstun_server::start(config).await?;
    log::info!("listening on {}", handle.local_addr());

    // The accept loop runs in its own task; keep the process alive
    // until it is interrupted.
    std::future::pending::<()>().await;
    Ok(())
}
