//! Batch evaluation over a JSON Lines data file.
//!
//! Every row is graded by every evaluator, one model call at a time, and the
//! per-row outputs are folded into aggregate metrics. The first failing call
//! aborts the batch.

use crate::dataset::load_jsonl;
use crate::evaluators::LlmEvaluator;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, instrument};

/// Per-evaluator settings, keyed by evaluator name in the batch call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Evaluator input name -> `${data.<column>}`
    pub column_mapping: HashMap<String, String>,
}

impl EvaluatorConfig {
    /// Maps each of `inputs` to the data column of the same name.
    pub fn identity<'a, I>(inputs: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            column_mapping: inputs
                .into_iter()
                .map(|input| {
                    (input.to_string(), format!("${{data.{}}}", input))
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub rows: Vec<Map<String, Value>>,
    pub metrics: BTreeMap<String, f64>,
    pub studio_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

static DATA_REFERENCE: OnceLock<Regex> = OnceLock::new();

/// Resolves a `${data.<column>}` reference to the column name.
pub fn parse_column_reference(reference: &str) -> Result<&str> {
    let pattern = DATA_REFERENCE.get_or_init(|| {
        Regex::new(r"^\$\{data\.([^}]+)\}$")
            .expect("reference pattern is valid")
    });
    pattern
        .captures(reference.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            anyhow!(
                "Unsupported column mapping '{}', expected ${{data.<column>}}",
                reference
            )
        })
}

/// Input name -> column name for one evaluator, in required-input order.
fn resolve_mapping(
    evaluator: &LlmEvaluator,
    config: Option<&EvaluatorConfig>,
) -> Result<Vec<(String, String)>> {
    let default_config;
    let config = match config {
        Some(config) => config,
        None => {
            default_config = EvaluatorConfig::identity(
                evaluator.required_inputs().iter().copied(),
            );
            &default_config
        }
    };

    evaluator
        .required_inputs()
        .iter()
        .map(|input| -> Result<(String, String)> {
            let reference =
                config.column_mapping.get(*input).ok_or_else(|| {
                    anyhow!(
                        "Column mapping for {} has no entry for input '{}'",
                        evaluator.name(),
                        input
                    )
                })?;
            let column = parse_column_reference(reference)?;
            Ok((input.to_string(), column.to_string()))
        })
        .collect()
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Means of every numeric output plus a pass rate per evaluator.
pub fn aggregate_metrics(
    rows: &[Map<String, Value>],
    evaluator_names: &[&str],
) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    let mut results: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for row in rows {
        for &name in evaluator_names {
            let prefix = format!("outputs.{}.", name);
            for (column, value) in row {
                let Some(key) = column.strip_prefix(&prefix) else {
                    continue;
                };
                if key.ends_with("_threshold") {
                    continue;
                }
                if key == format!("{}_result", name) {
                    let entry = results.entry(name).or_insert((0, 0));
                    entry.1 += 1;
                    if value.as_str() == Some("pass") {
                        entry.0 += 1;
                    }
                } else if let Some(number) = value.as_f64() {
                    let entry = sums
                        .entry(format!("{}.{}", name, key))
                        .or_insert((0.0, 0));
                    entry.0 += number;
                    entry.1 += 1;
                }
            }
        }
    }

    let mut metrics: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(metric, (sum, count))| (metric, sum / count as f64))
        .collect();
    for (name, (passed, total)) in results {
        metrics.insert(
            format!("{}.binary_aggregate", name),
            passed as f64 / total as f64,
        );
    }
    metrics
}

/// Runs `evaluators` over every row of the JSON Lines file at `data`.
///
/// `evaluator_config` may carry a column mapping per evaluator name; an
/// evaluator without one reads each input from the column of the same name.
/// When `output_path` is given the full result is written there as JSON.
#[instrument(skip(evaluators, evaluator_config), err)]
pub async fn evaluate(
    data: &Path,
    evaluators: &[LlmEvaluator],
    evaluator_config: &HashMap<String, EvaluatorConfig>,
    output_path: Option<&Path>,
) -> Result<EvaluationResult> {
    let rows = load_jsonl(data)?;
    if rows.is_empty() {
        bail!("Data file {} contains no rows", data.display());
    }

    let mut mappings = Vec::with_capacity(evaluators.len());
    for evaluator in evaluators {
        let mapping = resolve_mapping(
            evaluator,
            evaluator_config.get(evaluator.name()),
        )?;
        for (_, column) in &mapping {
            if let Some(index) =
                rows.iter().position(|row| !row.contains_key(column))
            {
                bail!(
                    "Column '{}' mapped for {} is missing from row {} of {}",
                    column,
                    evaluator.name(),
                    index + 1,
                    data.display()
                );
            }
        }
        mappings.push(mapping);
    }

    info!(
        rows = rows.len(),
        evaluators = evaluators.len(),
        "evaluating dataset"
    );

    let mut result_rows = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let mut result_row = Map::new();
        for (column, value) in row {
            result_row.insert(format!("inputs.{}", column), value.clone());
        }

        for (evaluator, mapping) in evaluators.iter().zip(&mappings) {
            let inputs: HashMap<String, String> = mapping
                .iter()
                .map(|(input, column)| {
                    (input.clone(), value_as_text(&row[column.as_str()]))
                })
                .collect();

            let output = evaluator.evaluate(&inputs).await.with_context(|| {
                format!("{} failed on row {}", evaluator.name(), index + 1)
            })?;
            for (key, value) in output.to_columns(evaluator.name()) {
                result_row.insert(
                    format!("outputs.{}.{}", evaluator.name(), key),
                    value,
                );
            }
        }
        result_rows.push(result_row);
    }

    let names: Vec<&str> = evaluators.iter().map(|e| e.name()).collect();
    let result = EvaluationResult {
        metrics: aggregate_metrics(&result_rows, &names),
        rows: result_rows,
        studio_url: None,
        created_at: Utc::now(),
    };

    if let Some(path) = output_path {
        let body = serde_json::to_string_pretty(&result)?;
        fs::write(path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote evaluation results");
    }

    Ok(result)
}
