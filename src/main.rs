//! Adaptation engine entry point.

use adaptation_engine::application::AdaptationEngine;
use adaptation_engine::cli::Cli;
use adaptation_engine::infrastructure::database::{config_store, journal, DatabaseConnection};
use adaptation_engine::infrastructure::ConfigLoader;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("adaptation_engine={level}")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A config load failure is the one startup error that exits 1
    // before anything else comes up.
    let disk_config =
        ConfigLoader::load(cli.cfg_file.as_deref()).context("failed to load configuration")?;
    init_tracing(&disk_config.logging.level, &disk_config.logging.format);

    let database = DatabaseConnection::new(&disk_config.database.path)
        .await
        .context("failed to open database")?;
    database
        .migrate()
        .await
        .context("failed to prepare database tables")?;

    if cli.clear_db_log {
        journal::clear_journal(database.pool())
            .await
            .context("failed to clear journal")?;
        info!("journal cleared");
    }
    if cli.clear_db_config {
        config_store::clear(database.pool())
            .await
            .context("failed to clear stored config")?;
        info!("stored config cleared");
    }

    // Merge with the stored document; disk wins for non-empty values.
    let config = config_store::sync_with_store(database.pool(), disk_config).await;
    ConfigLoader::validate(&config).context("merged configuration invalid")?;

    let engine = AdaptationEngine::build(config, &database)
        .await
        .context("failed to assemble engine")?;

    if cli.healthcheck {
        return match engine.healthcheck().await {
            Ok(()) => {
                println!("[OK] message queue healthcheck passed");
                Ok(())
            }
            Err(e) => {
                println!("[FAIL] {e:#}");
                std::process::exit(1);
            }
        };
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "could not install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "ctrl-c handler failed");
                }
                info!("interrupt received");
            }
        }
        let _ = shutdown_tx.send(true);
    });

    info!("adaptation engine starting (ctrl+c to quit)");
    engine.run(shutdown_rx).await?;
    info!("done");
    Ok(())
}
