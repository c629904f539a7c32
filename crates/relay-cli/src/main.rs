mod config;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use clap::{Parser, Subcommand};

use config::{CliOverrides, RelayConfig};

#[derive(Parser)]
#[command(name = "relay", about = "Per-run workflow event relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default relay config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the relay HTTP server
    Serve {
        /// Address to bind (overrides RELAY_BIND env var)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides RELAY_PORT env var)
        #[arg(long)]
        port: Option<u16>,
        /// Idle seconds before a keepalive frame (overrides RELAY_KEEPALIVE_SECS)
        #[arg(long)]
        keepalive_secs: Option<u64>,
    },
    /// Print the resolved configuration
    Config,
}

/// Execute the `relay init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  server.bind = {}", cfg.server.bind);
    println!("  server.port = {}", cfg.server.port);
    println!("  stream.keepalive_secs = {}", cfg.stream.keepalive_secs);
    println!();
    println!("Next: run `relay serve`.");

    Ok(())
}

/// Execute the `relay config` command: show where each value resolved to.
fn cmd_config() -> anyhow::Result<()> {
    let resolved = RelayConfig::resolve(&CliOverrides::default())?;
    println!("config file: {}", config::config_path().display());
    println!("bind: {}", resolved.bind);
    println!("port: {}", resolved.port);
    println!(
        "keepalive: {}s",
        resolved.stream.keepalive_interval.as_secs()
    );
    match resolved.stream.max_buffered_events {
        Some(max) => println!("max buffered events: {max}"),
        None => println!("max buffered events: unbounded"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Serve {
            bind,
            port,
            keepalive_secs,
        } => {
            let overrides = CliOverrides {
                bind,
                port,
                keepalive_secs,
            };
            let resolved = RelayConfig::resolve(&overrides)?;
            serve_cmd::run_serve(resolved).await?;
        }
        Commands::Config => {
            cmd_config()?;
        }
    }

    Ok(())
}
