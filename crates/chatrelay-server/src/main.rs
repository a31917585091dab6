use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chatrelay_server::{ServerConfig, start_server};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-user TCP chat relay")]
struct Args {
    /// Address to listen on.
    #[arg(long)]
    bind: Option<String>,
    #[arg(long, short)]
    port: Option<u16>,
    /// TOML config file; flags given on the command line win over it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    max_frame_bytes: Option<usize>,
    /// Seconds without requests before a user is shown as inactive.
    #[arg(long)]
    inactivity_secs: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_frame_bytes {
            config.max_frame_bytes = max;
        }
        if let Some(secs) = self.inactivity_secs {
            config.inactivity_threshold = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay_server=info".into()),
        )
        .init();

    let config = Args::parse().into_config()?;
    start_server(config).await
}
