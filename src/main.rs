use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxy_manager::paths::app_config_path;
use proxy_manager::{AppConfig, ManagerPaths, ProxyManager, DEFAULT_REFRESH_INTERVAL};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proxy-manager")]
#[command(about = "Install, run and inspect a local CLIProxyAPI instance")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Show info-level events (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the latest release for this platform
    Install,
    /// Start the proxy and keep it running until Ctrl-C
    Run {
        /// Install the binary first if it is missing
        #[arg(long)]
        install: bool,
    },
    /// List known accounts with their quotas
    Accounts,
    /// Show request statistics
    Usage,
    /// Regenerate the proxy config
    Config {
        /// Listen port to save before regenerating
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = app_config_path()?;
    let config = AppConfig::load(&config_path)?;
    let paths = ManagerPaths::from_home()?;

    match cli.command {
        Command::Install => {
            let manager = ProxyManager::new(config, paths)?;
            let path = manager.install().await?;
            println!("Installed {}", path.display());
        }
        Command::Run { install } => run(ProxyManager::new(config, paths)?, install).await?,
        Command::Accounts => {
            let manager = ProxyManager::new(config, paths)?;
            let accounts = manager.fetch_accounts().await;
            if accounts.is_empty() {
                println!("No accounts in {}", manager.paths().auth_dir.display());
            }
            for (account, quota) in accounts.iter().zip(manager.quotas()) {
                println!(
                    "{:<16} {:<32} {:>5.1}% {:?}",
                    account.provider.to_string(),
                    account.display_name,
                    quota.usage_percent,
                    quota.status
                );
            }
        }
        Command::Usage => {
            let manager = ProxyManager::new(config, paths)?;
            let usage = manager.fetch_usage().await;
            println!("Requests: {}", usage.total_requests);
            println!("  success: {}", usage.success_requests);
            println!("  failed:  {}", usage.failed_requests);
            println!("Tokens:   {}", usage.total_tokens);
            println!("Success rate: {:.1}%", usage.success_rate);
        }
        Command::Config { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
                config.save(&config_path).context("Failed to save settings")?;
            }
            let manager = ProxyManager::new(config, paths)?;
            println!("Wrote {}", manager.paths().proxy_config_path.display());
            println!("Endpoint: {}", manager.endpoint());
        }
    }

    Ok(())
}

async fn run(manager: ProxyManager, install: bool) -> Result<()> {
    if !manager.is_binary_installed() {
        if !install {
            anyhow::bail!(
                "{} is not installed; run `proxy-manager install` or pass --install",
                manager.binary_path().display()
            );
        }
        manager.install().await?;
    }

    let manager = Arc::new(manager);
    manager.start().await?;
    println!("Proxy running at {}", manager.endpoint());
    println!("Management API at {}", manager.management_url());

    let refresh = manager.spawn_refresh_loop(DEFAULT_REFRESH_INTERVAL);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    refresh.shutdown().await;
    if manager.status().running {
        manager.stop().await?;
    } else if let Some(error) = manager.last_error() {
        eprintln!("Proxy exited: {}", error);
    }
    Ok(())
}
