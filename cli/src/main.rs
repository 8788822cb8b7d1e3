//! skypipe command line tool
//!
//! ```text
//! skypipe -d                  # run the broker
//! echo hello | skypipe chat   # input mode: stdin is not a terminal
//! skypipe chat                # output mode: print one chunk
//! ```

mod modes;

use std::io::{IsTerminal, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Result;
use clap::Parser;
use skypipe::config::DEFAULT_PORT;
use skypipe::wire::DEFAULT_MAX_MESSAGE_SIZE;
use skypipe::{ClientConfig, PipeName, ServerConfig, PROTOCOL_TAG};
use tracing_subscriber::EnvFilter;

/// Pipe name used when none is given
const DEFAULT_PIPE: &str = "__DEFAULT__";

#[derive(Parser, Debug)]
#[command(name = "skypipe", version, about = "Pipe bytes between machines through a relay broker")]
struct Args {
    /// Name of the pipe to write to or read from
    #[arg(default_value = DEFAULT_PIPE)]
    pipe: String,

    /// Run the broker daemon
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Broker host to connect to
    #[arg(long, env = "SKYPIPE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Broker port (to connect to, or to listen on with --daemon)
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Full broker address, overrides --host and --port
    #[arg(long, env = "SATELLITE")]
    satellite: Option<String>,

    /// Address the daemon listens on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Largest accepted message in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Print the protocol tag and exit
    #[arg(long)]
    protocol: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_bind(SocketAddr::new(self.bind, self.port))
            .with_max_message_size(self.max_message_size)
    }

    fn client_config(&self) -> ClientConfig {
        let address = self
            .satellite
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port));
        let mut config = ClientConfig::default().with_address(&address);
        config.max_message_size = self.max_message_size;
        config
    }
}

/// Answer `--protocol`
fn print_protocol(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "{PROTOCOL_TAG}")
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.protocol {
        print_protocol(&mut std::io::stdout())?;
        return Ok(());
    }

    if args.daemon {
        init_logging("info");
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        return modes::run_daemon(args.server_config(), shutdown).await;
    }

    init_logging("warn");
    let pipe = PipeName::new(args.pipe.as_str())?;
    let config = args.client_config();

    if std::io::stdin().is_terminal() {
        modes::run_output(&config, &pipe, tokio::io::stdout()).await
    } else {
        modes::run_input(&config, &pipe, tokio::io::stdin()).await
    }
}
