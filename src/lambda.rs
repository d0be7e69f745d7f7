use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use table_etl::adapters::dynamodb::connect;
use table_etl::utils::logger;
use table_etl::{DynamoStore, EtlEngine, LambdaConfig, RunOutcome, RunSummary};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
pub struct Request {
    /// Overrides for any of the pipeline parameter keys.
    #[serde(default)]
    pub parameters: Option<HashMap<String, String>>,
    /// `summary.resume_token` of a cancelled invocation, or the token named
    /// in the error of one that stopped on a source read.
    #[serde(default)]
    pub resume_token: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct Response {
    pub message: String,
    pub outcome: RunOutcome,
    pub summary: RunSummary,
    pub total_time_sec: f64,
}

async fn function_handler(event: LambdaEvent<Request>) -> Result<Response, Error> {
    let started = Instant::now();
    tracing::info!(request_id = %event.context.request_id, "Starting table copy Lambda");

    let (request, context) = event.into_parts();
    let overrides = request.parameters.unwrap_or_default();
    let lambda_config = LambdaConfig::from_env(&overrides).map_err(|e| {
        tracing::error!("❌ {}", e.user_friendly_message());
        Box::new(e) as Box<dyn std::error::Error + Send + Sync>
    })?;
    let window = lambda_config
        .dispatch_window(remaining_until(context.deadline))
        .map_err(|e| {
            tracing::error!("❌ {}", e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync>
        })?;
    let config = lambda_config.pipeline;

    let client = connect(config.region.as_deref()).await;
    let source = Arc::new(DynamoStore::new(client.clone(), &config.source_table));
    let destination = Arc::new(DynamoStore::new(client, &config.destination_table));

    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn(cancel_after(cancel.clone(), window));

    let result = EtlEngine::new(source, destination, config.transformer(), &config)
        .resume_from(request.resume_token)
        .with_cancellation(cancel)
        .run()
        .await;
    watchdog.abort();

    let summary = result.map_err(|e| {
        tracing::error!(
            category = ?e.category(),
            "❌ Table copy failed: {}",
            e
        );
        Box::new(e) as Box<dyn std::error::Error + Send + Sync>
    })?;

    let outcome = summary.outcome();
    let message = match outcome {
        RunOutcome::Completed => "Table copy completed successfully".to_string(),
        RunOutcome::CompletedWithFailures => format!(
            "Table copy completed with {} failed batch(es)",
            summary.failures.len()
        ),
        RunOutcome::Cancelled => "Table copy stopped before the invocation deadline".to_string(),
    };

    tracing::info!(outcome = ?outcome, "{}", message);
    Ok(Response {
        message,
        outcome,
        summary,
        total_time_sec: started.elapsed().as_secs_f64(),
    })
}

/// Time left until `deadline_ms` (milliseconds since the epoch).
fn remaining_until(deadline_ms: u64) -> Duration {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Duration::from_millis(deadline_ms.saturating_sub(now_ms))
}

async fn cancel_after(cancel: CancellationToken, window: Duration) {
    tokio::time::sleep(window).await;
    tracing::warn!(
        window_secs = window.as_secs(),
        "Invocation deadline approaching; no further batches will be dispatched"
    );
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();

    run(service_fn(function_handler)).await
}
