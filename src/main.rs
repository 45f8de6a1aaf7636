use anyhow::Result;
use clap::Parser;

mod cli;

use bedrock_gateway::{config, init_tracing, server};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing();

    match args.into_command() {
        cli::Commands::Serve {
            config: config_path,
            host,
            port,
        } => {
            let mut cfg = config::load_config(config_path.as_deref())?;
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            server::start_server(cfg).await?;
        }
        cli::Commands::Validate {
            config: config_path,
        } => {
            config::load_config(config_path.as_deref())?;
            println!("Configuration OK");
        }
    }

    Ok(())
}
