use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// One evaluation unit. Absent or `null` fields become empty strings.
///
/// A `null` input is therefore written back as `""`, never as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub query: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub response: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub context: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads a JSON array of records from `input_path`.
pub fn read_records(input_path: &Path) -> Result<Vec<Record>> {
    let file = File::open(input_path).with_context(|| {
        format!("Failed to open dataset {}", input_path.display())
    })?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| {
        format!("Failed to parse dataset {}", input_path.display())
    })
}

/// Writes `records` to `output_path` as JSON Lines, replacing any existing
/// file.
pub fn write_jsonl(records: &[Record], output_path: &Path) -> Result<()> {
    let file = File::create(output_path).with_context(|| {
        format!("Failed to create {}", output_path.display())
    })?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush().with_context(|| {
        format!("Failed to write {}", output_path.display())
    })?;
    Ok(())
}

/// Converts the JSON dataset into the JSON Lines file the evaluator reads.
#[instrument(level = "debug", err)]
pub fn prepare_data(input_path: &Path, output_path: &Path) -> Result<PathBuf> {
    println!("Reading data from {}...", input_path.display());
    let records = read_records(input_path)?;

    println!("Converting {} records to JSONL...", records.len());
    write_jsonl(&records, output_path)?;
    debug!(count = records.len(), "wrote JSONL dataset");

    Ok(output_path.to_path_buf())
}

/// Loads a JSON Lines data file as one JSON object per row. Blank lines are
/// skipped.
pub fn load_jsonl(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Map<String, Value> = serde_json::from_str(&line)
            .with_context(|| {
                format!(
                    "Line {} of {} is not a JSON object",
                    index + 1,
                    path.display()
                )
            })?;
        rows.push(row);
    }
    Ok(rows)
}
