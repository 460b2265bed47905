use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, Cli};
use crate::error::AppError;
use storage_influx::InfluxWriter;
use storage_memory::MemoryDestination;
use storage_sqlite::SqliteReader;
use sync_api::DestinationWriter;
use sync_engine::{Scheduler, Synchronizer};

pub async fn run(cli: Cli) -> Result<(), AppError> {
    tracing::info!("sql-to-influx starting");

    // --- Load config ---
    let config = AppConfig::load(&cli.config)?;
    tracing::info!(
        config = %cli.config.display(),
        tables = config.sqlite.tables.len(),
        "loaded config"
    );

    // --- Source ---
    let source = SqliteReader::open(&config.sqlite.engine, config.source_tables())
        .map_err(AppError::Source)?;

    // --- Destination ---
    let mut tables = config.table_specs();
    let destination: Arc<dyn DestinationWriter> = if cli.dry_run {
        tracing::warn!("dry run: points go to memory, source rows are kept");
        for table in &mut tables {
            table.delete_uploaded_data = false;
        }
        Arc::new(MemoryDestination::new())
    } else {
        let writer = InfluxWriter::from_client_data(config.influx.client_data.clone())
            .map_err(AppError::Sink)?;
        writer.ping().await.map_err(AppError::Sink)?;
        tracing::info!(database = writer.database(), "influx reachable");
        Arc::new(writer)
    };

    for table in &tables {
        tracing::info!(
            table = %table.name,
            tags = ?table.tags,
            delete_uploaded_data = table.delete_uploaded_data,
            "registered table"
        );
    }

    let synchronizer = Synchronizer::new(Arc::new(source), destination, config.settings());
    let scheduler = Scheduler::new(synchronizer, tables, config.interval()?);
    let token = CancellationToken::new();

    if cli.once {
        let summary = scheduler.run_pass(&token).await;
        tracing::info!(
            synced = summary.synced(),
            idle = summary.idle(),
            failed = summary.failed(),
            "single pass complete"
        );
        if !summary.all_ok() {
            return Err(AppError::PassFailed {
                failed: summary.failed(),
                total: summary.outcomes.len(),
            });
        }
        return Ok(());
    }

    let loop_token = token.clone();
    let handle = tokio::spawn(async move { scheduler.run(loop_token).await });

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down, waiting for the current cycle...");

    // Начатый цикл таблицы доводится до конца, следующий не стартует.
    token.cancel();
    handle.await?;

    tracing::info!("shutdown complete");
    Ok(())
}
