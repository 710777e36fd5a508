use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pixsync::server::Server;
use pixsync::{ClientConfig, DeviceClient, ServerConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pixsync", version, about = "Pixel slot store and device sync service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,
        /// JSON file to persist slots and sync state in (memory only when omitted)
        #[arg(long)]
        data: Option<PathBuf>,
        /// Request-handling threads (defaults to the number of CPUs)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// List slots stored on a server
    Slots(Remote),
    /// Print synced/pending status
    Status(Remote),
    /// Report the version this device has consumed
    Report {
        #[command(flatten)]
        remote: Remote,
        version: u64,
    },
    /// Run one device pull cycle
    Pull(Remote),
}

#[derive(Args)]
struct Remote {
    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,
    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 10000)]
    timeout_ms: u64,
}

impl Remote {
    fn client(&self) -> anyhow::Result<DeviceClient> {
        let config = ClientConfig {
            base_url: self.server.clone(),
            timeout_ms: self.timeout_ms,
            ..Default::default()
        };
        DeviceClient::new(config).context("creating client")
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            bind,
            data,
            workers,
        } => {
            let mut config = ServerConfig {
                bind_addr: bind,
                data_path: data,
                ..Default::default()
            };
            if let Some(n) = workers {
                config.workers = n;
            }
            let server = Server::from_config(&config).context("starting server")?;
            server.run()?;
        }
        Command::Slots(remote) => {
            for slot in remote.client()?.slots()? {
                println!(
                    "{:>2}  {:<16} {:>2} painted  {}",
                    slot.id,
                    slot.name,
                    slot.grid.painted(),
                    chrono::DateTime::from_timestamp_millis(slot.last_modified)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                );
            }
        }
        Command::Status(remote) => {
            let report = remote.client()?.status()?;
            println!(
                "{} (web {}, device {})",
                report.status, report.web_version, report.device_version
            );
        }
        Command::Report { remote, version } => {
            let state = remote.client()?.report_device_version(version)?;
            println!(
                "{} (web {}, device {})",
                state.status(),
                state.web_version,
                state.device_version
            );
        }
        Command::Pull(remote) => {
            let mut client = remote.client()?;
            let outcome = client.pull()?;
            if outcome.fetched {
                println!(
                    "pulled {} slots at version {}",
                    client.mirror().len(),
                    outcome.state.device_version
                );
            } else {
                println!("already synced at version {}", outcome.state.web_version);
            }
        }
    }
    Ok(())
}
