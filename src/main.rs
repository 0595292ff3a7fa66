use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use privacy_sdn_controller::config::Config;
use privacy_sdn_controller::controller::ControllerCore;
use privacy_sdn_controller::gateway::SwitchGateway;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "privacy-controller")]
#[command(author = "AEGIS Team")]
#[command(version = "0.1.0")]
#[command(about = "Privacy obfuscation SDN controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller
    Run {
        /// Path to TOML configuration (defaults are used if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the control-channel listen port
        #[arg(short, long)]
        listen_port: Option<u16>,

        /// Override the obfuscation interval (packets per switch)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to TOML configuration
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,privacy_sdn_controller=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            listen_port,
            interval,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::default(),
            };
            if let Some(port) = listen_port {
                config.controller.listen_port = port;
            }
            if let Some(interval) = interval {
                config.obfuscation.interval = interval;
            }
            config.validate()?;
            run(config).await?;
        }
        Commands::InitConfig { path } => {
            Config::default()
                .to_file(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} {}", "Wrote default configuration to".bright_green(), path.display());
        }
        Commands::CheckConfig { path } => {
            let config = Config::from_file(&path)?;
            match config.validate() {
                Ok(()) => {
                    println!("{} {}", "✅ Configuration valid:".bright_green(), path.display());
                    println!("  Listen address:        {}", config.listen_addr());
                    println!("  Obfuscation interval:  {}", config.obfuscation.interval);
                    println!("  HTTP backend:          {}", config.services.http_backend);
                    println!("  HTTPS backend:         {}", config.services.https_backend);
                    println!("  Custom backend:        {}", config.services.custom_backend);
                }
                Err(e) => {
                    eprintln!("{} {}", "❌ Invalid configuration:".bright_red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control channel on {}", addr))?;

    let core = Arc::new(ControllerCore::new(&config));
    let gateway = SwitchGateway::new(core, config.stats.poll_interval());

    info!("Privacy obfuscation controller ready on {}", addr);

    tokio::select! {
        result = gateway.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested, closing control channel"),
    }

    Ok(())
}
