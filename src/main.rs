use std::path::{Path, PathBuf};

use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use rtpmidi_server::{run_service, Config};

const DEFAULT_CONFIG: &str = "rtpmidi.toml";

/// AppleMIDI / RTP-MIDI session server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file [default: rtpmidi.toml, if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides `log_level` from the config (RUST_LOG still wins)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Load and print the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from_file(path),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load_from_file(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli);

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    if cli.check_config {
        println!("{config:#?}");
        return;
    }
    info!("Configuration loaded: {:?}", config);

    // Ctrl+C flips the watch channel; the reactor checks it once per tick.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Ctrl+C signal received, initiating shutdown...");
        let _ = shutdown_tx.send(true);
    }) {
        error!("Error setting Ctrl-C handler: {}", e);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    info!("Service starting. Press Ctrl+C to stop.");
    if let Err(e) = runtime.block_on(run_service(config, shutdown_rx)) {
        error!("{:#}", e);
        std::process::exit(1);
    }
    info!("Service has shut down gracefully.");
}
