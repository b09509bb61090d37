use clap::{Parser, Subcommand};
use colored::*;
use std::process;
use std::time::Duration;

mod cli;

use cli::client::ApiClient;
use cli::sandbox::SandboxCommands;
use devbox_cli::config::Config;

#[derive(Parser)]
#[command(name = "devbox")]
#[command(about = "devbox - one development sandbox per session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        /// Port to listen on (overrides SERVER_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind (overrides DEVBOX_HOST)
        #[arg(long)]
        host: Option<String>,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Delete stopped and failed sandboxes older than the given age
    Purge {
        #[arg(long)]
        older_than_hours: u64,
    },
    /// Work with sandboxes on a running server
    Sandbox {
        /// Base URL of the devbox server
        #[arg(long, env = "DEVBOX_API_URL", default_value = "http://127.0.0.1:2022")]
        api_url: String,
        #[command(subcommand)]
        command: SandboxCommands,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match handle_command(cli.command).await {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve { port, host } => {
            devbox_cli::init_tracing();

            let mut config = Config::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }

            println!("🚀 Starting devbox server on http://{}:{}", config.host, config.port);
            devbox_cli::run_server(config).await
        }
        Commands::Migrate => {
            let config = Config::from_env()?;
            devbox_cli::run_migrations(&config).await?;
            println!("{} Database is up to date", "✓".green());
            Ok(())
        }
        Commands::Purge { older_than_hours } => {
            let config = Config::from_env()?;
            let older_than = Duration::from_secs(older_than_hours.saturating_mul(3600));
            let stats = devbox_cli::purge(&config, older_than).await?;
            println!(
                "{} Purged {} sandboxes and {} commands",
                "✓".green(),
                stats.sandboxes.to_string().cyan(),
                stats.commands.to_string().cyan()
            );
            Ok(())
        }
        Commands::Sandbox { api_url, command } => {
            let client = ApiClient::new(&api_url)?;
            command.execute(&client).await
        }
    }
}
