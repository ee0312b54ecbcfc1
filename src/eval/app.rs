use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::EvalArgs;
use crate::config::{ConfigError, ModelConfiguration};
use crate::dataset::prepare_data;
use crate::evaluate::{evaluate, EvaluationResult, EvaluatorConfig};
use crate::evaluators::{EvaluatorKind, LlmEvaluator};
use crate::openai::real::create_openai_client;
use crate::openai::OpenAIClientTrait;

const UPSTREAM_STEP: &str = "collect_responses.ts";
const CREDENTIALS_HINT: &str =
    "Please set AZURE_OPENAI_ENDPOINT/AZURE_OPENAI_API_KEY or OPENAI_API_KEY in .env";
const RULE: &str = "------------------------------";

/// How a run ended. The first two are expected, user-fixable situations and
/// are reported on the console rather than as errors.
#[derive(Debug)]
pub enum RunOutcome {
    MissingInput,
    MissingCredentials,
    Completed(EvaluationResult),
}

pub async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    run_app().await
}

pub async fn run_app() -> Result<()> {
    let args = EvalArgs::parse();
    let outcome = run(&args).await?;
    debug!(?outcome, "run finished");
    Ok(())
}

/// Runs against the process environment and the real model backend.
pub async fn run(args: &EvalArgs) -> Result<RunOutcome> {
    run_with_lookup(
        args,
        |key| std::env::var(key).ok(),
        create_openai_client,
    )
    .await
}

/// The full flow with the environment and client construction supplied by
/// the caller.
pub async fn run_with_lookup<F, C>(
    args: &EvalArgs,
    lookup: F,
    make_client: C,
) -> Result<RunOutcome>
where
    F: Fn(&str) -> Option<String>,
    C: FnOnce(&ModelConfiguration) -> Arc<dyn OpenAIClientTrait>,
{
    if !args.input.exists() {
        println!(
            "Error: Input file '{}' not found. Please run '{}' first.",
            args.input.display(),
            UPSTREAM_STEP
        );
        return Ok(RunOutcome::MissingInput);
    }

    let config = match ModelConfiguration::from_lookup(lookup) {
        Ok(config) => config,
        Err(e @ ConfigError::MissingCredentials) => {
            println!("Error: {}", e);
            println!("{}", CREDENTIALS_HINT);
            return Ok(RunOutcome::MissingCredentials);
        }
    };

    let client = make_client(&config);
    run_with_config(args, &config, client).await
}

/// Builds the judges for this run. Groundedness only joins when asked for.
pub fn build_evaluators(
    args: &EvalArgs,
    config: &ModelConfiguration,
    client: Arc<dyn OpenAIClientTrait>,
) -> Vec<LlmEvaluator> {
    let mut kinds = vec![EvaluatorKind::Relevance, EvaluatorKind::Coherence];
    if args.groundedness {
        kinds.push(EvaluatorKind::Groundedness);
    }

    kinds
        .into_iter()
        .map(|kind| {
            LlmEvaluator::new(kind, client.clone(), config.model_name())
                .with_threshold(args.threshold)
        })
        .collect()
}

/// Binds each judge's inputs to the dataset columns of the same name.
pub fn column_mappings(
    evaluators: &[LlmEvaluator],
) -> HashMap<String, EvaluatorConfig> {
    evaluators
        .iter()
        .map(|evaluator| {
            (
                evaluator.name().to_string(),
                EvaluatorConfig::identity(
                    evaluator.required_inputs().iter().copied(),
                ),
            )
        })
        .collect()
}

/// Steps after configuration: convert, evaluate, report. The intermediate
/// JSONL file is removed however the evaluation ends.
#[instrument(skip(args, client), fields(backend = config.backend_name()), err)]
pub async fn run_with_config(
    args: &EvalArgs,
    config: &ModelConfiguration,
    client: Arc<dyn OpenAIClientTrait>,
) -> Result<RunOutcome> {
    let evaluators = build_evaluators(args, config, client);
    let evaluator_config = column_mappings(&evaluators);

    let mut builder = tempfile::Builder::new();
    builder.prefix("eval-data-").suffix(".jsonl");
    let temp_file = match &args.temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("Failed to create temporary JSONL file")?;
    let temp_path = temp_file.path().to_path_buf();
    debug!(path = %temp_path.display(), "created temporary dataset");

    let outcome =
        convert_and_evaluate(args, &temp_path, &evaluators, &evaluator_config)
            .await;

    if let Err(e) = temp_file.close() {
        warn!("Failed to remove {}: {}", temp_path.display(), e);
    }

    let result = outcome?;
    print_report(&result, &args.output)?;
    Ok(RunOutcome::Completed(result))
}

async fn convert_and_evaluate(
    args: &EvalArgs,
    temp_path: &Path,
    evaluators: &[LlmEvaluator],
    evaluator_config: &HashMap<String, EvaluatorConfig>,
) -> Result<EvaluationResult> {
    prepare_data(&args.input, temp_path)?;

    println!("Starting evaluation...");
    info!(
        evaluators = ?evaluators.iter().map(|e| e.name()).collect::<Vec<_>>(),
        "starting evaluation"
    );
    evaluate(temp_path, evaluators, evaluator_config, Some(&args.output)).await
}

fn print_report(result: &EvaluationResult, output: &Path) -> Result<()> {
    println!("\nEvaluation Complete!");
    println!("{}", RULE);
    println!("Aggregate Metrics:");
    println!("{}", serde_json::to_string_pretty(&result.metrics)?);
    println!("{}", RULE);
    println!("Detailed results saved to {}", output.display());
    println!(
        "Studio URL: {}",
        result.studio_url.as_deref().unwrap_or("N/A")
    );
    Ok(())
}
