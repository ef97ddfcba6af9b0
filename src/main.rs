//! Corral CLI - Main entry point.

use corral::cli::{Cli, Commands};
use corral::config::CorralConfig;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    corral::observability::init(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Run => {
            let config = load_config();
            if let Err(e) = corral::run(config).await {
                eprintln!("corral: {}", e);
                std::process::exit(1);
            }
        }

        Commands::RenderConfig => {
            let config = load_config();
            if let Err(e) = corral::render_config(&config).await {
                eprintln!("corral: {}", e);
                std::process::exit(1);
            }
            println!("wrote {}", config.store.config_file.display());
        }

        Commands::Remap => {
            let config = load_config();
            if let Err(e) = corral::remap_identities(&config).await {
                eprintln!("corral: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Wait { target, timeout } => {
            let config = load_config();
            match corral::wait_ready(&config, &target, Duration::from_secs(timeout)).await {
                Ok(()) => println!("{}: ready", target),
                Err(e) => {
                    eprintln!("corral: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("corral v{}", env!("CARGO_PKG_VERSION"));
            println!("Bootstrap and configuration supervisor for distributed key-value clusters");
        }
    }

    Ok(())
}

fn load_config() -> CorralConfig {
    match CorralConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("corral: {}", e);
            std::process::exit(1);
        }
    }
}
