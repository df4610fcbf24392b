use clap::{Parser, Subcommand};
use private_link_gateway::config::GatewayConfig;
use private_link_gateway::{Gateway, GatewayError};
use tracing_subscriber::EnvFilter;

/// Private Link Gateway: egress proxy for private endpoint clients
#[derive(Parser)]
#[command(name = "private-link-gateway", version, about)]
struct Cli {
    /// Path to configuration file (.hcl)
    #[arg(short, long, default_value = "gateway.hcl")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file without starting the gateway
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, default_value = "gateway.hcl")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> private_link_gateway::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Validate { config: config_path }) = &cli.command {
        return validate_config(config_path).await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();
    private_link_gateway::proxy::install_panic_hook();

    tracing::info!("Private Link Gateway v{}", env!("CARGO_PKG_VERSION"));

    tracing::info!(config = cli.config, "Loading configuration");
    let config = GatewayConfig::from_file(&cli.config).await?;

    let gateway = Gateway::new(config)?;
    let source = gateway.source_from_config()?;
    gateway.run(source, shutdown_signal()).await
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Validate a configuration file and print diagnostics
async fn validate_config(path: &str) -> private_link_gateway::Result<()> {
    let config = match GatewayConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    let allow_list = config.allow_list()?;

    println!("✓ Configuration is valid");
    println!();
    println!("  Listeners:");
    for (name, address) in config.listeners.iter() {
        println!("    - {} → {}", name, address);
    }
    println!("  Allow-list:  {}", allow_list.len());
    let mut hosts: Vec<_> = allow_list.into_iter().collect();
    hosts.sort();
    for host in hosts {
        println!("    - {}", host);
    }
    match &config.refresh.source {
        Some(source) => println!(
            "  Source:      {:?} (every {}s, stale after {}s)",
            source.kind, config.refresh.interval_secs, config.refresh.staleness_secs
        ),
        None => {
            return Err(GatewayError::Config(
                "No registry source configured".to_string(),
            ))
        }
    }
    println!("  Upstream:    port {}", config.upstream_port);
    println!("  Drain:       {}s", config.drain_secs);

    Ok(())
}
