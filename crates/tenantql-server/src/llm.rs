//! OpenAI generation backend

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tenantql_engine::{GenerationBackend, GenerationError};

use crate::config::LlmConfig;

/// Every prompt the engine builds is self-contained, so the system message only sets the register
const SYSTEM_PROMPT: &str = "You are a careful SQL engineer working with DuckDB. \
Follow the instructions in each request exactly and answer in the response format it asks for. \
Never invent tables or columns that are not listed.";

pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    config: LlmConfig,
}

impl OpenAiBackend {
    pub fn new(api_key: String, config: LlmConfig) -> Self {
        let mut openai = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = &config.api_base {
            openai = openai.with_api_base(base);
        }
        Self {
            client: Client::with_config(openai),
            config,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .temperature(self.config.temperature)
            .max_completion_tokens(self.config.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or("No response from OpenAI")?;
        Ok(content)
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        tracing::debug!(model = %self.config.model, prompt_chars = prompt.len(), "Calling OpenAI");
        let content = self
            .complete(prompt)
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;
        tracing::debug!(response_chars = content.len(), "OpenAI responded");
        Ok(content)
    }
}

/// Stand-in used when no API key is configured. Cached mappings and the
/// direct path keep working; anything needing generation fails as unavailable.
pub struct UnconfiguredBackend;

#[async_trait]
impl GenerationBackend for UnconfiguredBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Provider(
            "OPENAI_API_KEY is not set; generation is unavailable".to_string(),
        ))
    }
}
