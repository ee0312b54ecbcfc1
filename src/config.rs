use std::fmt;
use tracing::{info, warn};

pub const AZURE_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const AZURE_OPENAI_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
pub const AZURE_OPENAI_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const AZURE_OPENAI_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const OPENAI_API_BASE: &str = "OPENAI_API_BASE";

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Which hosted model backend the evaluators talk to.
///
/// Azure OpenAI wins whenever an endpoint is configured, even if an OpenAI
/// key is present as well.
#[derive(Clone, PartialEq, Eq)]
pub enum ModelConfiguration {
    AzureOpenAI {
        endpoint: String,
        deployment: String,
        api_key: Option<String>,
        api_version: String,
    },
    OpenAI {
        model: String,
        api_key: String,
        api_base: Option<String>,
    },
}

// Keys stay out of logs
impl fmt::Debug for ModelConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelConfiguration::AzureOpenAI {
                endpoint,
                deployment,
                api_key,
                api_version,
            } => f
                .debug_struct("AzureOpenAI")
                .field("endpoint", endpoint)
                .field("deployment", deployment)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .field("api_version", api_version)
                .finish(),
            ModelConfiguration::OpenAI {
                model, api_base, ..
            } => f
                .debug_struct("OpenAI")
                .field("model", model)
                .field("api_key", &"<redacted>")
                .field("api_base", api_base)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingCredentials,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::MissingCredentials => write!(
                f,
                "No OpenAI or Azure OpenAI configuration found in environment variables."
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ModelConfiguration {
    /// Selects a backend from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Selects a backend using `lookup` to read variables. Empty values are
    /// treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(endpoint) = get(AZURE_OPENAI_ENDPOINT) {
            info!("Using Azure OpenAI configuration");
            let api_key = get(AZURE_OPENAI_API_KEY);
            if api_key.is_none() {
                warn!(
                    "{} is not set, requests to {} will be unauthenticated",
                    AZURE_OPENAI_API_KEY, endpoint
                );
            }
            return Ok(ModelConfiguration::AzureOpenAI {
                endpoint,
                deployment: get(AZURE_OPENAI_DEPLOYMENT)
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                api_key,
                api_version: get(AZURE_OPENAI_API_VERSION)
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            });
        }

        if let Some(api_key) = get(OPENAI_API_KEY) {
            info!("Using OpenAI configuration");
            return Ok(ModelConfiguration::OpenAI {
                model: get(OPENAI_MODEL)
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                api_key,
                api_base: get(OPENAI_API_BASE),
            });
        }

        Err(ConfigError::MissingCredentials)
    }

    /// The model (OpenAI) or deployment (Azure) requests are addressed to.
    pub fn model_name(&self) -> &str {
        match self {
            ModelConfiguration::AzureOpenAI { deployment, .. } => deployment,
            ModelConfiguration::OpenAI { model, .. } => model,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            ModelConfiguration::AzureOpenAI { .. } => "Azure OpenAI",
            ModelConfiguration::OpenAI { .. } => "OpenAI",
        }
    }
}
