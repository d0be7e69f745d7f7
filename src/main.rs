use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use table_etl::config::cli::Backend;
use table_etl::core::{DestinationStore, SourceStore};
use table_etl::utils::logger;
use table_etl::{CliConfig, EtlEngine, EtlError, LocalTableStore, PipelineConfig, RunOutcome};
use tokio_util::sync::CancellationToken;

const EXIT_CONFIG: i32 = 1;
const EXIT_BATCH_FAILURES: i32 = 2;
const EXIT_SOURCE_READ: i32 = 3;

type Stores = (Arc<dyn SourceStore>, Arc<dyn DestinationStore>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();
    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting table-etl CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let (config, resume_token) = match cli.pipeline_config().and_then(|c| Ok((c, cli.resume_token()?))) {
        Ok(parsed) => parsed,
        Err(e) => exit_with(&e, EXIT_CONFIG),
    };
    tracing::info!(
        environment = %config.environment,
        source = %config.source_table,
        destination = %config.destination_table,
        "✅ Configuration validated"
    );

    let (source, destination) = build_stores(&cli, &config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight batches");
            on_signal.cancel();
        }
    });

    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }
    let engine = EtlEngine::new_with_monitoring(
        source,
        destination,
        config.transformer(),
        &config,
        cli.monitor,
    )
    .resume_from(resume_token)
    .with_cancellation(cancel);

    match engine.run().await {
        Ok(summary) => {
            println!(
                "{}: {} scanned, {} skipped, {} written in {} batches, {} failed ({} ms)",
                match summary.outcome() {
                    RunOutcome::Completed => "✅ completed",
                    RunOutcome::CompletedWithFailures => "⚠️ completed with failures",
                    RunOutcome::Cancelled => "⏹ cancelled",
                },
                summary.records_scanned,
                summary.records_skipped,
                summary.items_written,
                summary.batch_count,
                summary.failures.len(),
                summary.elapsed_ms
            );
            if cli.verbose {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            if summary.cancelled {
                match &summary.resume_token {
                    Some(token) => println!("🔁 Resume with: --resume-token '{}'", token),
                    None => println!("🔁 Nothing was committed past the start; re-run from the beginning"),
                }
            }

            if summary.outcome() == RunOutcome::CompletedWithFailures {
                std::process::exit(EXIT_BATCH_FAILURES);
            }
        }
        Err(e) => {
            if let EtlError::SourceRead {
                resume_token: Some(token),
                ..
            } = &e
            {
                eprintln!("🔁 Resume with: --resume-token '{}'", token);
            }
            let code = match e {
                EtlError::SourceRead { .. } => EXIT_SOURCE_READ,
                _ => EXIT_CONFIG,
            };
            exit_with(&e, code);
        }
    }

    Ok(())
}

async fn build_stores(cli: &CliConfig, config: &PipelineConfig) -> anyhow::Result<Stores> {
    match cli.backend {
        Backend::Local => {
            tokio::fs::create_dir_all(&cli.data_dir)
                .await
                .with_context(|| format!("creating data dir {}", cli.data_dir.display()))?;
            let source = LocalTableStore::new(&cli.data_dir, &config.source_table);
            let destination = LocalTableStore::new(&cli.data_dir, &config.destination_table);
            tracing::info!(
                source = %source.table_path().display(),
                destination = %destination.table_path().display(),
                "Using local JSON tables"
            );
            let source: Arc<dyn SourceStore> = Arc::new(source);
            let destination: Arc<dyn DestinationStore> = Arc::new(destination);
            Ok((source, destination))
        }
        #[cfg(feature = "dynamodb")]
        Backend::Dynamodb => {
            use table_etl::adapters::dynamodb::connect;
            use table_etl::DynamoStore;

            let client = connect(config.region.as_deref()).await;
            let source: Arc<dyn SourceStore> =
                Arc::new(DynamoStore::new(client.clone(), &config.source_table));
            let destination: Arc<dyn DestinationStore> =
                Arc::new(DynamoStore::new(client, &config.destination_table));
            Ok((source, destination))
        }
        #[cfg(not(feature = "dynamodb"))]
        Backend::Dynamodb => {
            anyhow::bail!("this build has no DynamoDB support; rebuild with --features dynamodb")
        }
    }
}

fn exit_with(e: &EtlError, code: i32) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    std::process::exit(code);
}
