use crate::openai::{first_choice_content, OpenAIClientTrait};
use crate::prompts::{
    render, COHERENCE_USER_PROMPT, GROUNDEDNESS_USER_PROMPT,
    JUDGE_SYSTEM_PROMPT, RELEVANCE_USER_PROMPT,
};
use anyhow::{anyhow, bail, Context, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument};

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 5.0;
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// The quality dimensions a judge can grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluatorKind {
    Relevance,
    Coherence,
    /// Needs a populated `context` column, so it is only built on request.
    Groundedness,
}

impl EvaluatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            EvaluatorKind::Relevance => "relevance",
            EvaluatorKind::Coherence => "coherence",
            EvaluatorKind::Groundedness => "groundedness",
        }
    }

    /// Inputs the judge prompt needs, in the order they appear in it.
    pub fn required_inputs(&self) -> &'static [&'static str] {
        match self {
            EvaluatorKind::Relevance | EvaluatorKind::Coherence => {
                &["query", "response"]
            }
            EvaluatorKind::Groundedness => &["context", "response"],
        }
    }

    fn user_prompt(&self) -> &'static str {
        match self {
            EvaluatorKind::Relevance => RELEVANCE_USER_PROMPT,
            EvaluatorKind::Coherence => COHERENCE_USER_PROMPT,
            EvaluatorKind::Groundedness => GROUNDEDNESS_USER_PROMPT,
        }
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The verdict for one row from one judge.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorOutput {
    pub score: f64,
    pub reason: String,
    pub threshold: f64,
}

impl EvaluatorOutput {
    pub fn passed(&self) -> bool {
        self.score >= self.threshold
    }

    /// Output columns keyed the way the results file reports them, e.g.
    /// `relevance`, `gpt_relevance`, `relevance_reason`, `relevance_result`
    /// and `relevance_threshold`.
    pub fn to_columns(&self, name: &str) -> Map<String, Value> {
        let mut columns = Map::new();
        columns.insert(name.to_string(), json!(self.score));
        columns.insert(format!("gpt_{}", name), json!(self.score));
        columns.insert(format!("{}_reason", name), json!(self.reason));
        columns.insert(
            format!("{}_result", name),
            json!(if self.passed() { "pass" } else { "fail" }),
        );
        columns.insert(format!("{}_threshold", name), json!(self.threshold));
        columns
    }
}

/// An LLM-as-judge evaluator bound to one model backend.
pub struct LlmEvaluator {
    kind: EvaluatorKind,
    client: Arc<dyn OpenAIClientTrait>,
    model: String,
    threshold: f64,
}

impl fmt::Debug for LlmEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmEvaluator")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl LlmEvaluator {
    pub fn new(
        kind: EvaluatorKind,
        client: Arc<dyn OpenAIClientTrait>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            client,
            model: model.into(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn kind(&self) -> EvaluatorKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn required_inputs(&self) -> &'static [&'static str] {
        self.kind.required_inputs()
    }

    fn build_messages(
        &self,
        inputs: &HashMap<String, String>,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let system_message = ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(JUDGE_SYSTEM_PROMPT)
                .build()
                .map_err(|e| {
                    anyhow!("Failed to build system message: {}", e)
                })?,
        );
        let user_message = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(render(self.kind.user_prompt(), inputs))
                .build()
                .map_err(|e| anyhow!("Failed to build user message: {}", e))?,
        );
        Ok(vec![system_message, user_message])
    }

    /// Grades one row. `inputs` must hold every name in
    /// [`required_inputs`](Self::required_inputs).
    #[instrument(skip(self, inputs), fields(evaluator = %self.kind), err)]
    pub async fn evaluate(
        &self,
        inputs: &HashMap<String, String>,
    ) -> Result<EvaluatorOutput> {
        if let Some(missing) = self
            .required_inputs()
            .iter()
            .find(|input| !inputs.contains_key(**input))
        {
            bail!("{} evaluator is missing input '{}'", self.kind, missing);
        }

        let messages = self.build_messages(inputs)?;
        let response = self
            .client
            .chat_completion(self.model.clone(), messages)
            .await
            .with_context(|| format!("{} judge request failed", self.kind))?;

        let content = first_choice_content(&response).ok_or_else(|| {
            anyhow!("{} judge returned an empty reply", self.kind)
        })?;
        debug!(reply = %content, "judge replied");

        let (score, reason) = parse_verdict(&content).with_context(|| {
            format!("Could not read a {} score from the judge", self.kind)
        })?;

        Ok(EvaluatorOutput {
            score,
            reason,
            threshold: self.threshold,
        })
    }
}

static FENCE: OnceLock<Regex> = OnceLock::new();
static SCALE_RANGE: OnceLock<Regex> = OnceLock::new();
static BARE_SCORE: OnceLock<Regex> = OnceLock::new();

/// Reads `(score, reason)` out of a judge reply.
///
/// The reply should be a JSON object, possibly fenced or surrounded by prose,
/// in which case the first balanced `{...}` that parses as an object is used.
/// Failing that, a bare digit 1-5 is accepted only when it is the single
/// candidate left after scale phrases like "1 to 5" or "1-5" are removed.
pub fn parse_verdict(reply: &str) -> Result<(f64, String)> {
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$")
            .expect("fence pattern is valid")
    });
    let body = fence
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map_or(reply.trim(), |m| m.as_str());

    if let Some((object, verdict)) = first_json_object(body) {
        let score = match verdict.get("score") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| anyhow!("reply has no numeric 'score': {}", object))?;
        let reason = verdict
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return check_range(score).map(|score| (score, reason));
    }

    let scale = SCALE_RANGE.get_or_init(|| {
        Regex::new(r"(?i)\b\d+\s*(?:-|–|to|through)\s*\d+\b")
            .expect("scale pattern is valid")
    });
    let bare = BARE_SCORE.get_or_init(|| {
        Regex::new(r"\b([1-5])\b").expect("score pattern is valid")
    });
    let without_scale = scale.replace_all(body, " ");
    let mut candidates: Vec<&str> = bare
        .captures_iter(&without_scale)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    match candidates.as_slice() {
        [] => bail!("no score in reply: {}", body),
        [digit] => {
            let score = digit.parse::<f64>()?;
            Ok((score, body.to_string()))
        }
        _ => bail!("ambiguous score in reply: {}", body),
    }
}

/// The first balanced `{...}` span of `text` that parses as a JSON object.
fn first_json_object(text: &str) -> Option<(&str, Map<String, Value>)> {
    for (start, _) in text.match_indices('{') {
        let Some(end) = matching_brace(&text[start..]) else {
            continue;
        };
        let candidate = &text[start..start + end + 1];
        if let Ok(Value::Object(object)) =
            serde_json::from_str::<Value>(candidate)
        {
            return Some((candidate, object));
        }
    }
    None
}

/// Byte offset of the `}` closing the `{` that starts `text`. Braces inside
/// JSON strings are skipped.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn check_range(score: f64) -> Result<f64> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score)
    } else {
        bail!("score {} is outside {}..={}", score, MIN_SCORE, MAX_SCORE)
    }
}
