use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bedrock-gateway", version, about = "OpenAI-compatible gateway for AWS Bedrock")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<String>,
        /// Listen host override
        #[arg(long)]
        host: Option<String>,
        /// Listen port override
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate the configuration and exit
    Validate {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<String>,
    },
}

impl Cli {
    pub fn into_command(self) -> Commands {
        self.command.unwrap_or(Commands::Serve {
            config: None,
            host: None,
            port: None,
        })
    }
}
