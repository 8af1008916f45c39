//! `playsource-server`: brokers one master client's song queue onto a
//! Mopidy playback engine.
//!
//! The master streams song requests over `/queue`; the server searches,
//! admits, enqueues and reports each song back as it finishes playing.

mod admission;
mod api;
mod backend;
mod config;
mod emulator;
mod lease;
mod mopidy;
mod openapi;
mod queue_song;
mod session;
mod startup;
mod state;
mod status_store;
mod systemd;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "playsource-server", version = VERSION)]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 127.0.0.1:50052
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Mopidy JSON-RPC endpoint
    #[arg(long)]
    mopidy_url: Option<String>,

    /// Songs accepted but not yet finished before new ones are rejected
    #[arg(long)]
    max_queue_size: Option<usize>,

    /// Seconds between play history polls
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Serve from the built-in emulator instead of Mopidy
    #[arg(long)]
    test: bool,

    /// Wait for the backend and notify the service manager when ready
    #[arg(long)]
    service_mode: bool,

    /// Optional server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            bind: self.bind,
            mopidy_url: self.mopidy_url.clone(),
            max_queue_size: self.max_queue_size,
            poll_interval_secs: self.poll_interval_secs,
            test: self.test,
            service_mode: self.service_mode,
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,playsource_server=info")
        }))
        .init();

    startup::run(args).await
}
