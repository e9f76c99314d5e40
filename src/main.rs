use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::Path;
use tokio::sync::watch;
use tracing::{info, warn};

use astra_monitor::cli::{Cli, Commands};
use astra_monitor::core::remote::{self, list_adb_devices};
use astra_monitor::core::{CommandRunner, Poller, SystemProfiler};
use astra_monitor::observability;
use astra_monitor::server::{self, AppState};
use astra_monitor::utils::{AppConfig, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init(cli.verbose)?;

    // `config --write` may target a file that does not exist yet
    let file_config = match (&cli.command, cli.config.as_deref()) {
        (Some(Commands::Config { write: true }), Some(path)) if !path.exists() => AppConfig::default(),
        (_, path) => AppConfig::load(path)?,
    };
    let settings = Settings::resolve(&cli, file_config)?;

    match cli.command.clone().unwrap_or(Commands::Serve) {
        Commands::Serve => handle_serve(&settings).await?,
        Commands::Devices => handle_devices(&settings).await?,
        Commands::Exec { command } => handle_exec(&settings, &command).await?,
        Commands::Push { src, dst, recursive } => {
            handle_copy(&settings, &src, &dst, recursive, true).await?;
        }
        Commands::Pull { src, dst, recursive } => {
            handle_copy(&settings, &src, &dst, recursive, false).await?;
        }
        Commands::Sample => handle_sample(&settings).await?,
        Commands::Config { write } => handle_config(&settings, cli.config.as_deref(), write)?,
    }

    Ok(())
}

async fn connect(settings: &Settings) -> Result<remote::BoardRunner> {
    remote::connect(settings.board_address.as_deref(), &settings.runner_options())
        .await
        .context("Failed to set up board connection")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Interrupt received, shutting down");
}

async fn handle_serve(settings: &Settings) -> Result<()> {
    let runner = connect(settings).await?;
    let board = runner.address().to_string();

    let profiler = SystemProfiler::new(settings.profiler_config());
    let (stop_tx, stop_rx) = watch::channel(false);
    let polling = profiler.spawn(runner, stop_rx);

    let state = AppState {
        profiler,
        board,
        window: settings.window,
    };
    let served = server::run(state, &settings.host, settings.port, settings.cors, shutdown_signal()).await;

    // Stop polling whether the server exited cleanly or not
    let _ = stop_tx.send(true);
    polling.await.context("Polling task panicked")?;

    served
}

async fn handle_devices(settings: &Settings) -> Result<()> {
    let devices = list_adb_devices(&settings.adb_path, settings.timeout)
        .await
        .context("Failed to list ADB devices")?;

    if devices.is_empty() {
        println!("No ADB devices attached.");
        println!("\nFor SSH boards pass the IP address with -b <board IP>.");
        return Ok(());
    }

    println!("Attached ADB devices:\n");
    for device in devices {
        println!("  {}", device);
    }

    Ok(())
}

async fn handle_exec(settings: &Settings, command: &[String]) -> Result<()> {
    let runner = connect(settings).await?;
    let output = runner.run_cmd(&command.join(" ")).await?;
    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn handle_copy(settings: &Settings, src: &str, dst: &str, recursive: bool, to_board: bool) -> Result<()> {
    let runner = connect(settings).await?;
    runner.copy(src, dst, recursive, to_board).await?;

    let board = runner.address();
    if to_board {
        println!("{} Copied {} to {}:{}", "✓".green(), src, board, dst);
    } else {
        println!("{} Copied {}:{} to {}", "✓".green(), board, src, dst);
    }
    Ok(())
}

async fn handle_sample(settings: &Settings) -> Result<()> {
    let runner = connect(settings).await?;
    let board = runner.address();
    let profiler = SystemProfiler::new(settings.profiler_config());
    let mut poller = Poller::new(runner, profiler.clone());

    // Usage is a delta, so take a baseline first
    poller.poll().await.context("Failed to fetch system stats")?;
    tokio::time::sleep(settings.interval).await;
    if poller.poll().await.context("Failed to fetch system stats")?.is_none() {
        bail!("No usage sample was produced");
    }

    println!("Resource usage on {}\n", board);
    println!("{}", profiler.snapshot(settings.window).latest_text());
    Ok(())
}

fn handle_config(settings: &Settings, explicit_path: Option<&Path>, write: bool) -> Result<()> {
    let config = settings.to_app_config();
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => AppConfig::config_path()?,
    };

    println!("Configuration ({}):\n", path.display());
    print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);

    if write {
        config.save(&path)?;
        println!("\n{} Saved to {}", "✓".green(), path.display());
    }

    Ok(())
}
