use anyhow::Result;
use async_openai::types::{
    ChatChoice, ChatCompletionRequestMessage, ChatCompletionResponseMessage,
    CompletionUsage, CreateChatCompletionResponse, FinishReason, Role,
};
use async_trait::async_trait;
use std::sync::Mutex;

use crate::openai::{ModelRequest, OpenAIClientTrait};

/// One scripted reply of the fake client
#[derive(Debug, Clone)]
enum FakeReply {
    Content(Option<String>),
    Error(String),
}

/// A fake implementation of the chat completion client for testing
///
/// Replies are handed out in the order they were scripted. Once the script
/// runs dry every call gets [`FakeOpenAIClient::DEFAULT_RESPONSE`]. Every
/// request is recorded so tests can check what the judges sent.
///
/// # Example
///
/// ```
/// use brainstorm_eval::openai::{first_choice_content, OpenAIClientTrait};
/// use brainstorm_eval::openai::fake::FakeOpenAIClient;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = FakeOpenAIClient::new()
///         .with_response(r#"{"score": 4, "reason": "on topic"}"#);
///
///     let response = client.chat_completion("gpt-4".to_string(), vec![]).await?;
///
///     assert_eq!(
///         first_choice_content(&response).as_deref(),
///         Some(r#"{"score": 4, "reason": "on topic"}"#)
///     );
///     Ok(())
/// }
/// ```
pub struct FakeOpenAIClient {
    replies: Mutex<Vec<FakeReply>>,
    // Track requests for verification in tests
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl Default for FakeOpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOpenAIClient {
    pub const DEFAULT_RESPONSE: &'static str =
        r#"{"score": 5, "reason": "Fake default response"}"#;

    pub fn new() -> Self {
        Self {
            replies: Mutex::new(vec![]),
            requests: Mutex::new(vec![]),
        }
    }

    fn push(self, reply: FakeReply) -> Self {
        self.replies.lock().unwrap().push(reply);
        self
    }

    /// Add a response to be returned by the fake client
    pub fn with_response(self, response: &str) -> Self {
        self.push(FakeReply::Content(Some(response.to_string())))
    }

    /// Add multiple responses to be returned in sequence
    pub fn with_responses(self, responses: Vec<&str>) -> Self {
        responses
            .into_iter()
            .fold(self, |client, response| client.with_response(response))
    }

    /// Configure the client to return a response with None content
    pub fn with_none_content_response(self) -> Self {
        self.push(FakeReply::Content(None))
    }

    /// Make the next call fail, as an auth or quota error would
    pub fn with_error(self, message: &str) -> Self {
        self.push(FakeReply::Error(message.to_string()))
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn describe_message(
    message: &ChatCompletionRequestMessage,
) -> (String, String) {
    let value = serde_json::to_value(message).unwrap_or_default();
    let role = value["role"].as_str().unwrap_or_default().to_string();
    let content = value["content"].as_str().unwrap_or_default().to_string();
    (role, content)
}

#[async_trait]
impl OpenAIClientTrait for FakeOpenAIClient {
    #[allow(deprecated)]
    async fn chat_completion(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<CreateChatCompletionResponse, anyhow::Error> {
        self.requests.lock().unwrap().push(ModelRequest {
            model_name: model.clone(),
            messages: messages.iter().map(describe_message).collect(),
        });

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                FakeReply::Content(Some(Self::DEFAULT_RESPONSE.to_string()))
            } else {
                replies.remove(0)
            }
        };

        let content_option = match reply {
            FakeReply::Content(content) => content,
            FakeReply::Error(message) => return Err(anyhow::anyhow!(message)),
        };

        let message = ChatCompletionResponseMessage {
            role: Role::Assistant,
            content: content_option,
            #[allow(deprecated)]
            function_call: None,
            tool_calls: None,
            #[allow(deprecated)]
            refusal: None,
            audio: None,
        };

        let chat_choice = ChatChoice {
            index: 0,
            message,
            finish_reason: Some(FinishReason::Stop),
            logprobs: None,
        };

        let usage = CompletionUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            prompt_tokens_details: None,
            completion_tokens_details: None,
        };

        Ok(CreateChatCompletionResponse {
            id: "fake_id".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: model.clone(),
            system_fingerprint: Some("fake-fingerprint".to_string()),
            service_tier: None,
            choices: vec![chat_choice],
            usage: Some(usage),
        })
    }
}
