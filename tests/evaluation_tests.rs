use anyhow::Result;
use brainstorm_eval::cli::EvalArgs;
use brainstorm_eval::config::ModelConfiguration;
use brainstorm_eval::eval::{run_with_lookup, RunOutcome};
use brainstorm_eval::openai::fake::FakeOpenAIClient;
use brainstorm_eval::openai::OpenAIClientTrait;
use brainstorm_eval::test_utils::init_test_logging;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A scratch working directory with its own temp dir for the JSONL file.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(dataset: Option<&str>) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("tmp"))?;
        if let Some(dataset) = dataset {
            fs::write(dir.path().join("test_dataset.json"), dataset)?;
        }
        Ok(Self { dir })
    }

    fn args(&self) -> EvalArgs {
        let mut args = EvalArgs::with_paths(
            self.dir.path().join("test_dataset.json"),
            self.dir.path().join("evaluation_results.json"),
        );
        args.temp_dir = Some(self.temp_dir());
        args
    }

    fn temp_dir(&self) -> PathBuf {
        self.dir.path().join("tmp")
    }

    fn temp_files(&self) -> usize {
        fs::read_dir(self.temp_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn output_exists(&self) -> bool {
        self.dir.path().join("evaluation_results.json").exists()
    }
}

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

/// Hands out `client` and remembers which configuration asked for it.
fn client_factory(
    client: Arc<FakeOpenAIClient>,
    seen: Arc<Mutex<Option<ModelConfiguration>>>,
) -> impl FnOnce(&ModelConfiguration) -> Arc<dyn OpenAIClientTrait> {
    move |config: &ModelConfiguration| -> Arc<dyn OpenAIClientTrait> {
        *seen.lock().unwrap() = Some(config.clone());
        client
    }
}

#[tokio::test]
async fn single_record_with_openai_credentials() -> Result<()> {
    init_test_logging();
    let workspace =
        Workspace::new(Some(r#"[{"query":"Q1","response":"R1"}]"#))?;
    let client = Arc::new(FakeOpenAIClient::new().with_responses(vec![
        r#"{"score": 4, "reason": "answers the question"}"#,
        r#"{"score": 2, "reason": "choppy"}"#,
    ]));
    let seen = Arc::new(Mutex::new(None));

    let outcome = run_with_lookup(
        &workspace.args(),
        env(&[("OPENAI_API_KEY", "sk-test")]),
        client_factory(client.clone(), seen.clone()),
    )
    .await?;

    let result = match outcome {
        RunOutcome::Completed(result) => result,
        other => panic!("expected a completed run, got {:?}", other),
    };

    // The one record reached the judges with its context filled in
    assert_eq!(result.rows.len(), 1);
    let row = &result.rows[0];
    assert_eq!(row["inputs.query"], json!("Q1"));
    assert_eq!(row["inputs.response"], json!("R1"));
    assert_eq!(row["inputs.context"], json!(""));
    assert_eq!(row["outputs.relevance.relevance"], json!(4.0));
    assert_eq!(row["outputs.coherence.coherence_result"], json!("fail"));

    assert_eq!(result.metrics["relevance.relevance"], 4.0);
    assert_eq!(result.metrics["coherence.coherence"], 2.0);
    assert_eq!(result.metrics["relevance.binary_aggregate"], 1.0);
    assert_eq!(result.metrics["coherence.binary_aggregate"], 0.0);

    {
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            assert_eq!(request.model_name, "gpt-4");
            assert!(request.messages[1].1.contains("Q1"));
            assert!(request.messages[1].1.contains("R1"));
        }
    }

    let config = seen.lock().unwrap().clone().unwrap();
    assert_eq!(config.backend_name(), "OpenAI");

    assert!(workspace.output_exists());
    assert_eq!(workspace.temp_files(), 0);
    Ok(())
}

#[tokio::test]
async fn azure_endpoint_wins_over_openai_key() -> Result<()> {
    init_test_logging();
    let workspace = Workspace::new(Some(
        r#"[{"query":"Q","response":"R","context":"C"}]"#,
    ))?;
    let client = Arc::new(FakeOpenAIClient::new());
    let seen = Arc::new(Mutex::new(None));

    let outcome = run_with_lookup(
        &workspace.args(),
        env(&[
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_DEPLOYMENT", "judge-deployment"),
            ("AZURE_OPENAI_API_KEY", "azure-key"),
            ("OPENAI_API_KEY", "sk-test"),
        ]),
        client_factory(client.clone(), seen.clone()),
    )
    .await?;

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    let config = seen.lock().unwrap().clone().unwrap();
    assert_eq!(config.backend_name(), "Azure OpenAI");
    assert!(client
        .requests
        .lock()
        .unwrap()
        .iter()
        .all(|request| request.model_name == "judge-deployment"));
    Ok(())
}

#[tokio::test]
async fn groundedness_is_opt_in() -> Result<()> {
    init_test_logging();
    let workspace = Workspace::new(Some(
        r#"[{"query":"Q","response":"R","context":"the docs"}]"#,
    ))?;
    let client = Arc::new(FakeOpenAIClient::new());
    let mut args = workspace.args();
    args.groundedness = true;

    let outcome = run_with_lookup(
        &args,
        env(&[("OPENAI_API_KEY", "sk-test")]),
        client_factory(client.clone(), Arc::new(Mutex::new(None))),
    )
    .await?;

    let result = match outcome {
        RunOutcome::Completed(result) => result,
        other => panic!("expected a completed run, got {:?}", other),
    };
    assert!(result.metrics.contains_key("groundedness.groundedness"));
    assert_eq!(client.request_count(), 3);

    let requests = client.requests.lock().unwrap();
    assert!(requests[2].messages[1].1.contains("the docs"));
    Ok(())
}

#[tokio::test]
async fn missing_input_file_returns_quietly() -> Result<()> {
    init_test_logging();
    let workspace = Workspace::new(None)?;
    let client = Arc::new(FakeOpenAIClient::new());

    let outcome = run_with_lookup(
        &workspace.args(),
        env(&[("OPENAI_API_KEY", "sk-test")]),
        client_factory(client.clone(), Arc::new(Mutex::new(None))),
    )
    .await?;

    assert!(matches!(outcome, RunOutcome::MissingInput));
    assert_eq!(client.request_count(), 0);
    assert_eq!(workspace.temp_files(), 0);
    assert!(!workspace.output_exists());
    Ok(())
}

#[tokio::test]
async fn missing_credentials_creates_no_files() -> Result<()> {
    init_test_logging();
    let workspace =
        Workspace::new(Some(r#"[{"query":"Q1","response":"R1"}]"#))?;
    let seen = Arc::new(Mutex::new(None));

    let outcome = run_with_lookup(
        &workspace.args(),
        env(&[("OPENAI_MODEL", "gpt-4o")]),
        client_factory(Arc::new(FakeOpenAIClient::new()), seen.clone()),
    )
    .await?;

    assert!(matches!(outcome, RunOutcome::MissingCredentials));
    assert!(seen.lock().unwrap().is_none());
    assert_eq!(workspace.temp_files(), 0);
    assert!(!workspace.output_exists());
    Ok(())
}

#[tokio::test]
async fn judge_failure_still_removes_temp_file() -> Result<()> {
    init_test_logging();
    let workspace =
        Workspace::new(Some(r#"[{"query":"Q1","response":"R1"}]"#))?;
    let client =
        Arc::new(FakeOpenAIClient::new().with_error("401 Unauthorized"));

    let err = run_with_lookup(
        &workspace.args(),
        env(&[("OPENAI_API_KEY", "sk-bad")]),
        client_factory(client, Arc::new(Mutex::new(None))),
    )
    .await
    .unwrap_err();

    assert!(format!("{:#}", err).contains("401 Unauthorized"));
    assert_eq!(workspace.temp_files(), 0);
    assert!(!workspace.output_exists());
    Ok(())
}

#[tokio::test]
async fn malformed_dataset_still_removes_temp_file() -> Result<()> {
    init_test_logging();
    let workspace = Workspace::new(Some(r#"{"query": "not a list"}"#))?;
    let client = Arc::new(FakeOpenAIClient::new());

    let err = run_with_lookup(
        &workspace.args(),
        env(&[("OPENAI_API_KEY", "sk-test")]),
        client_factory(client.clone(), Arc::new(Mutex::new(None))),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("Failed to parse dataset"));
    assert_eq!(client.request_count(), 0);
    assert_eq!(workspace.temp_files(), 0);
    Ok(())
}
