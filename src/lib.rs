//! Scores query/response datasets with LLM judges.
//!
//! The binary converts `test_dataset.json` to JSON Lines, grades every row
//! for relevance and coherence (optionally groundedness) against Azure OpenAI
//! or OpenAI, and writes the per-row and aggregate results to
//! `evaluation_results.json`.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod eval;
pub mod evaluate;
pub mod evaluators;
pub mod openai;
pub mod prompts;

pub mod test_utils;
