use crate::config::ModelConfiguration;
use crate::openai::OpenAIClientTrait;
use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::types::{
    ChatCompletionRequestMessage, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

// A real chat completion client, generic over the backend config
pub struct RealOpenAIClient<C: Config> {
    client: Client<C>,
}

impl<C: Config> RealOpenAIClient<C> {
    pub fn new(client: Client<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> OpenAIClientTrait for RealOpenAIClient<C>
where
    C: Config + Send + Sync + 'static,
{
    async fn chat_completion(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<CreateChatCompletionResponse, anyhow::Error> {
        // Judges should be as deterministic as the backend allows
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(0.0f32)
            .build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response)
    }
}

fn azure_config(
    endpoint: &str,
    deployment: &str,
    api_key: Option<&str>,
    api_version: &str,
) -> AzureConfig {
    let azure = AzureConfig::new()
        .with_api_base(endpoint)
        .with_deployment_id(deployment)
        .with_api_version(api_version);
    match api_key {
        Some(key) => azure.with_api_key(key),
        None => azure,
    }
}

fn openai_config(api_key: &str, api_base: Option<&str>) -> OpenAIConfig {
    let openai = OpenAIConfig::new().with_api_key(api_key);
    match api_base {
        Some(base) => openai.with_api_base(base),
        None => openai,
    }
}

/// Builds the client for whichever backend the configuration selected.
pub fn create_openai_client(
    config: &ModelConfiguration,
) -> Arc<dyn OpenAIClientTrait> {
    match config {
        ModelConfiguration::AzureOpenAI {
            endpoint,
            deployment,
            api_key,
            api_version,
        } => {
            debug!(
                %endpoint,
                %deployment,
                %api_version,
                "creating Azure OpenAI client"
            );
            let azure = azure_config(
                endpoint,
                deployment,
                api_key.as_deref(),
                api_version,
            );
            Arc::new(RealOpenAIClient::new(Client::with_config(azure)))
        }
        ModelConfiguration::OpenAI {
            model,
            api_key,
            api_base,
        } => {
            debug!(%model, "creating OpenAI client");
            let openai = openai_config(api_key, api_base.as_deref());
            Arc::new(RealOpenAIClient::new(Client::with_config(openai)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "https://example.openai.azure.com";

    fn azure(api_key: Option<&str>) -> ModelConfiguration {
        ModelConfiguration::AzureOpenAI {
            endpoint: ENDPOINT.to_string(),
            deployment: "judge-4o".to_string(),
            api_key: api_key.map(str::to_string),
            api_version: "2024-06-01".to_string(),
        }
    }

    #[test]
    fn azure_config_targets_deployment() {
        let config =
            azure_config(ENDPOINT, "judge-4o", Some("azure-key"), "2024-06-01");

        assert_eq!(config.api_base(), ENDPOINT);
        assert_eq!(
            config.url("/chat/completions"),
            "https://example.openai.azure.com/openai/deployments/judge-4o\
             /chat/completions"
        );
        assert_eq!(config.query(), vec![("api-version", "2024-06-01")]);
        assert_eq!(
            config.headers().get("api-key").map(|v| v.as_bytes()),
            Some(&b"azure-key"[..])
        );
    }

    #[test]
    fn azure_config_without_key_keeps_endpoint() {
        let config = azure_config(ENDPOINT, "judge-4o", None, "2024-06-01");

        assert_eq!(config.api_base(), ENDPOINT);
        assert!(config
            .url("/chat/completions")
            .contains("/openai/deployments/judge-4o/"));
    }

    #[test]
    fn openai_config_uses_custom_base() {
        let config = openai_config("sk-test", Some("http://localhost:8080/v1"));
        assert_eq!(config.api_base(), "http://localhost:8080/v1");
        assert_eq!(
            config.url("/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );

        let config = openai_config("sk-test", None);
        assert_eq!(config.api_base(), "https://api.openai.com/v1");
    }

    #[test]
    fn creates_client_for_every_backend() {
        let configs = [
            azure(Some("azure-key")),
            azure(None),
            ModelConfiguration::OpenAI {
                model: "gpt-4".to_string(),
                api_key: "sk-test".to_string(),
                api_base: Some("http://localhost:8080/v1".to_string()),
            },
        ];
        for config in &configs {
            let client = create_openai_client(config);
            assert_eq!(Arc::strong_count(&client), 1);
        }
    }
}
