use clap::builder::BoolishValueParser;
use clap::Parser;
use std::path::PathBuf;

/// Score a dataset of query/response pairs with LLM judges
///
/// Backend credentials come from the environment (or a local `.env` file):
/// AZURE_OPENAI_ENDPOINT selects Azure OpenAI, otherwise OPENAI_API_KEY
/// selects OpenAI.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct EvalArgs {
    /// JSON array of {query, response, context} records
    #[arg(long, env = "EVAL_INPUT", default_value = "test_dataset.json")]
    pub input: PathBuf,

    /// Where the detailed results are written
    #[arg(long, env = "EVAL_OUTPUT", default_value = "evaluation_results.json")]
    pub output: PathBuf,

    /// Directory for the intermediate JSONL file (system temp dir if unset)
    #[arg(long, env = "EVAL_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Minimum score (1-5) that counts as a pass
    #[arg(long, default_value = "3")]
    pub threshold: f64,

    /// Also grade groundedness against the `context` field
    #[arg(
        long,
        env = "EVAL_GROUNDEDNESS",
        value_parser = BoolishValueParser::new()
    )]
    pub groundedness: bool,
}

impl EvalArgs {
    /// Arguments with every default, as if run with no flags.
    pub fn with_paths(input: PathBuf, output: PathBuf) -> Self {
        Self {
            input,
            output,
            temp_dir: None,
            threshold: crate::evaluators::DEFAULT_THRESHOLD,
            groundedness: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = EvalArgs::parse_from(["brainstorm_eval"]);
        assert_eq!(args.input, PathBuf::from("test_dataset.json"));
        assert_eq!(args.output, PathBuf::from("evaluation_results.json"));
        assert_eq!(args.threshold, 3.0);
        assert!(!args.groundedness);
    }

    #[test]
    fn flags() {
        let args = EvalArgs::parse_from([
            "brainstorm_eval",
            "--input",
            "data/in.json",
            "--temp-dir",
            "/tmp/eval",
            "--threshold",
            "4",
            "--groundedness",
        ]);
        assert_eq!(args.input, PathBuf::from("data/in.json"));
        assert_eq!(args.temp_dir, Some(PathBuf::from("/tmp/eval")));
        assert_eq!(args.threshold, 4.0);
        assert!(args.groundedness);
    }
}
