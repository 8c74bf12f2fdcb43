//! Entry point for `rudp`.
//!
//! Parses CLI arguments and dispatches into either **send** (data source) or
//! **recv** (data sink) mode.  All protocol work is delegated to the library;
//! `main.rs` owns only process setup (logging, argument parsing, file I/O).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;

use rudp::directory::{Directory, FixedLease, LeaseService, StaticDirectory};
use rudp::{Config, Sink, Socket, Source};

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a sink to connect, then stream data to it.
    Send {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// File to send.
        #[arg(short, long, conflicts_with = "bytes")]
        file: Option<PathBuf>,
        /// Send this many generated bytes instead of a file.
        #[arg(long)]
        bytes: Option<usize>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Connect to a source and receive its stream.
    Recv {
        /// Peer name or IP:PORT.
        #[arg(short, long)]
        peer: String,
        /// Name table entry NAME=IP:PORT; may be repeated.
        #[arg(long = "host")]
        hosts: Vec<String>,
        /// Local address leased for this endpoint.
        #[arg(long, default_value = "0.0.0.0")]
        local: std::net::IpAddr,
        /// Write the stream here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        tuning: Tuning,
    },
}

#[derive(Args)]
struct Tuning {
    /// Maximum segment payload in bytes.
    #[arg(long, default_value_t = 1000)]
    mss: usize,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,
    /// Initial segments in flight.
    #[arg(long, default_value_t = 4)]
    window: u32,
    /// Seed for initial sequence numbers.
    #[arg(long)]
    seed: Option<u64>,
}

impl Tuning {
    fn config(&self) -> Config {
        let timeout = Duration::from_millis(self.timeout_ms);
        Config {
            mss: self.mss,
            timeout,
            tick: timeout / 5,
            window_size: self.window,
            send_buffer: self.mss as u64 * 64,
            linger: timeout,
            seed: self.seed,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            bind,
            file,
            bytes,
            tuning,
        } => {
            let data = match (file, bytes) {
                (Some(path), _) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, Some(n)) => (0..n).map(|i| (i % 251) as u8).collect(),
                (None, None) => bail!("one of --file or --bytes is required"),
            };

            let socket = Socket::bind(bind).await?;
            log::info!("Starting source on {}", socket.local_addr);
            let mut source = Source::accept(socket, tuning.config()).await?;
            log::info!("Sink connected from {}", source.peer());
            source.send_all(&data).await?;
            log::info!("Sent {} bytes; {:?}", data.len(), source.stats());
        }
        Mode::Recv {
            peer,
            hosts,
            local,
            out,
            tuning,
        } => {
            let directory = StaticDirectory::from_entries(&hosts)?;
            let peer_addr = directory
                .lookup(&peer)
                .with_context(|| format!("resolving {peer}"))?;
            let ip = FixedLease(local).request()?;

            let socket = Socket::bind(SocketAddr::new(ip, 0)).await?;
            log::info!("Starting sink on {}, connecting to {peer_addr}", socket.local_addr);
            let mut sink = Sink::connect(socket, peer_addr, tuning.config()).await?;
            let data = sink.read_to_end().await?;
            log::info!("Received {} bytes; {:?}", data.len(), sink.stats());

            match out {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
    }
    Ok(())
}
