use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

pub const JUDGE_SYSTEM_PROMPT: &str = r####"
You are an AI assistant that grades the quality of answers produced by another AI system. You will be given a QUERY, a RESPONSE and sometimes a CONTEXT. You grade exactly one quality at a time, described in the user message, on an integer scale from 1 (worst) to 5 (best).

Rules:
- Judge only the quality you are asked about. Ignore the others.
- Do not reward length. A short response can earn a 5.
- An empty or missing response earns a 1.
- Reply with strictly valid JSON and nothing else, in this shape:
  {"score": <integer 1-5>, "reason": "<one or two sentences>"}
"####;

pub const RELEVANCE_USER_PROMPT: &str = r####"
Grade the RELEVANCE of the RESPONSE to the QUERY: how well it addresses what was asked, using accurate and pertinent information.

1 - Irrelevant: unrelated to the query.
2 - Incorrect: attempts the query but gets it wrong.
3 - Incomplete: addresses the query but misses essential details.
4 - Complete: fully addresses the query with accurate information.
5 - Comprehensive: fully addresses the query and adds useful insight.

QUERY:
{query}

RESPONSE:
{response}
"####;

pub const COHERENCE_USER_PROMPT: &str = r####"
Grade the COHERENCE of the RESPONSE: whether its ideas are logically organised and clearly connected so that it reads as a unified answer to the QUERY.

1 - Incoherent: disjointed words or phrases with no logical connection.
2 - Poorly coherent: fragmented sentences, connections hard to follow.
3 - Partially coherent: some logical flow, but gaps or abrupt shifts.
4 - Coherent: logical order with clear connections between ideas.
5 - Highly coherent: seamless flow with effective transitions.

QUERY:
{query}

RESPONSE:
{response}
"####;

pub const GROUNDEDNESS_USER_PROMPT: &str = r####"
Grade the GROUNDEDNESS of the RESPONSE: whether every claim it makes is supported by the CONTEXT, without unsupported additions.

1 - Ungrounded: unrelated to the context or contradicts it.
2 - Contradictory: mostly related but contains claims that conflict with the context.
3 - Partially grounded: accurate but leaves out or adds material the context does not cover.
4 - Mostly grounded: supported by the context with minor unsupported details.
5 - Fully grounded: every claim is supported by the context.

CONTEXT:
{context}

RESPONSE:
{response}
"####;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

/// Fills `{name}` placeholders in `template` from `inputs` in a single pass,
/// so values that themselves contain braces are inserted verbatim.
/// Placeholders with no matching input are left as they are.
pub fn render(template: &str, inputs: &HashMap<String, String>) -> String {
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid")
    });
    placeholder
        .replace_all(template, |caps: &Captures| {
            inputs
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
