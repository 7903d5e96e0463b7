use anyhow::Result;

mod cli;
mod config;
mod runtime;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = <cli::Cli as clap::Parser>::parse();
    let config_path = match cli.config {
        Some(p) => p,
        None => config::default_config_path()?,
    };

    match cli.command.unwrap_or(cli::Command::Run {
        playback: Vec::new(),
    }) {
        cli::Command::PrintConfigPath => {
            println!("{}", config_path.display());
            Ok(())
        }
        cli::Command::InitConfig { force } => {
            let cfg = config::ServiceConfig::default();
            config::save(&config_path, &cfg, force)?;
            println!("Wrote default config to {}", config_path.display());
            Ok(())
        }
        cli::Command::Check => {
            let cfg = config::load(&config_path)?;
            cfg.validate()?;
            println!("{}: {} link(s) OK", config_path.display(), cfg.links.len());
            for line in cfg.describe_links() {
                println!("  {line}");
            }
            Ok(())
        }
        cli::Command::Run { playback } => {
            let mut cfg = config::load(&config_path)?;
            cfg.add_playback_logs(&playback);
            let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
            runtime::run_service(cfg, stop_rx, Box::new(|m| tracing::info!("{m}"))).await
        }
    }
}
