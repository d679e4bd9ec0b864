use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use scholar_triage::classify::{DEFAULT_CRITERIA, LlmClassifier};
use scholar_triage::config::{PathsConfig, RunConfig};
use scholar_triage::extract::ArticleExtractor;
use scholar_triage::llm::{LlmConfig, create_provider};
use scholar_triage::mailbox::GmailSession;
use scholar_triage::pipeline::Orchestrator;
use scholar_triage::sink::XlsxSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = PathsConfig::from_env();
    let _guard = init_tracing(paths.log_dir.as_deref());

    let config = RunConfig::from_env().context("invalid run configuration")?;
    let llm_config = LlmConfig::from_env().context("invalid LLM configuration")?;

    eprintln!("📚 Scholar Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Max results: {}", config.max_results);
    eprintln!("   Output: {}", paths.output_dir.display());

    let criteria = match &paths.criteria_file {
        Some(path) => LlmClassifier::criteria_from_file(path)
            .with_context(|| format!("could not read criteria from {}", path.display()))?,
        None => DEFAULT_CRITERIA.to_string(),
    };

    let llm = create_provider(&llm_config).context("could not create LLM provider")?;
    let classifier = Arc::new(LlmClassifier::with_criteria(llm, criteria));

    std::fs::create_dir_all(&paths.output_dir).with_context(|| {
        format!("could not create output directory {}", paths.output_dir.display())
    })?;
    let sink = Arc::new(XlsxSink::new(&paths.output_dir));

    let mailbox = GmailSession::connect(&paths.token_path, &config.retry)
        .await
        .with_context(|| {
            format!(
                "could not open the mailbox with {}; run the OAuth consent flow to create it",
                paths.token_path.display()
            )
        })?;

    let extractor = ArticleExtractor::new().context("invalid extraction markers")?;
    let orchestrator = Orchestrator::new(Arc::new(mailbox), extractor, classifier, sink, config);
    let summary = orchestrator.run().await.context("run aborted")?;

    eprintln!(
        "   Processed {} message(s), {} article(s), {} skipped",
        summary.processed_count, summary.records, summary.failed_messages
    );
    for artifact in &summary.artifacts {
        println!("{}", artifact.display());
    }
    Ok(())
}

/// Log to stderr, plus a daily-rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "scholar-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}
