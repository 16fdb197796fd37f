use std::time::Duration;

use clap::Parser;
use natstun_client::ClientConfig;

/// TCP NAT-classification client.
#[derive(Parser)]
#[command(
    about = "TCP NAT-classification client",
    version = env!("CARGO_PKG_VERSION"),
    disable_version_flag = true,
)]
struct Opts {
    /// server host to dial
    #[arg(short = 'H', long = "host")]
    host: String,

    /// server port
    #[arg(short = 'P', long = "port", default_value_t = 3478)]
    port: u16,

    /// dial / wait timeout, in seconds
    #[arg(short = 'O', long = "timeout", default_value_t = 3)]
    timeout: u64,

    /// local bind address: empty, a bare IP, or IP:port
    #[arg(short = 'i', long = "local")]
    local: Option<String>,

    /// basic mode: external-address discovery only, no probe listener
    #[arg(short = 'B', long = "basic")]
    basic: bool,

    /// enable debug logging
    #[arg(short = 'D', long = "debug")]
    debug: bool,

    /// print local address alongside the result
    #[arg(short = 'V', long = "verbose")]
    verbose: bool,

    /// print version and exit
    #[arg(long = "version", action = clap::ArgAction::Version)]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let level = if opts.debug { log::Level::Debug } else { log::Level::Info };
    simple_logger::init_with_level(level)?;

    let config = ClientConfig {
        server_host: opts.host,
        server_port: opts.port,
        local_addr: opts.local,
        timeout: Duration::from_secs(opts.timeout),
        basic: opts.basic,
        verbose: opts.verbose,
    };

    let result = match natstun_client::run(&config).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let hint = if result.basic {
        " (NAT Type detection not enabled in basic mode)"
    } else {
        ""
    };
    println!("NAT Type: {}{hint}", result.class);

    if config.verbose {
        println!("Local IP: {}", result.local.ip());
        println!("Local Port: {}", result.local.port());
    }

    if let Some(mapped) = result.mapped {
        println!("External IP: {}", mapped.ip());
        println!("External Port: {}", mapped.port());
    }

    Ok(())
}
