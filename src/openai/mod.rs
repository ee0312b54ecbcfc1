pub mod fake;
pub mod real;

use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestMessage, CreateChatCompletionResponse,
};
use async_trait::async_trait;

/// Constants for message roles
pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";

/// A record of one chat completion request, kept by the fake client
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model_name: String,
    /// (role, content) pairs in the order they were sent
    pub messages: Vec<(String, String)>,
}

/// A trait that abstracts the chat completion backend
///
/// Both Azure OpenAI and OpenAI sit behind this trait, and tests swap in
/// [`fake::FakeOpenAIClient`]. The evaluators only ever talk to this trait.
#[async_trait]
pub trait OpenAIClientTrait: Send + Sync {
    /// Creates a chat completion by sending messages to the language model
    ///
    /// # Arguments
    /// * `model` - The model or deployment name (e.g., "gpt-4")
    /// * `messages` - A sequence of messages using OpenAI types
    async fn chat_completion(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<CreateChatCompletionResponse, anyhow::Error>;
}

/// Pulls the text of the first choice out of a completion response.
pub fn first_choice_content(
    response: &CreateChatCompletionResponse,
) -> Option<String> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .map(String::from)
}
