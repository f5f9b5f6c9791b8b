use std::path::Path;
use std::sync::Arc;

use tokio::io::BufReader;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use thread_enrich::config::EnrichConfig;
use thread_enrich::host;
use thread_enrich::llm::create_provider;
use thread_enrich::pipeline::dispatch::DispatchCoordinator;
use thread_enrich::pipeline::processor::ThreadEnricher;

// Work units are cooperative tasks on one thread; only completion calls suspend.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = EnrichConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.llm.model,
        max_concurrency = config.pipeline.max_concurrency,
        token_threshold = config.pipeline.token_threshold,
        "Starting thread enrichment"
    );

    let llm = create_provider(&config.llm)?;
    let enricher = Arc::new(
        ThreadEnricher::new(llm, &config.pipeline).with_temperature(config.llm.temperature),
    );
    let mut coordinator = DispatchCoordinator::new(enricher, config.pipeline.max_concurrency);

    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();
    host::run(input, output, &mut coordinator).await?;

    Ok(())
}

/// Log to stderr, and to a daily-rolling file when a directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "thread-enrich.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
