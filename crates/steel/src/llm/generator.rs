// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use async_trait::async_trait;
use llm_contracts::{
    GenerationConfig, GeneratorConfig, LLMError, LLMResult, PromptContext, PromptTemplate,
    Provider, ProviderRequest, TextGenerator,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::providers::{ApiClient, OllamaClient, OpenAIClient};

/// Adapts a provider client into the [`TextGenerator`] boundary.
pub struct ProviderGenerator {
    client: Arc<dyn ApiClient>,
    model: String,
    generation: GenerationConfig,
}

impl ProviderGenerator {
    pub fn new(client: Arc<dyn ApiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn from_config(config: &GeneratorConfig) -> LLMResult<Self> {
        config.validate()?;
        let client: Arc<dyn ApiClient> = match config.provider() {
            Provider::Ollama => Arc::new(OllamaClient::new(
                config.endpoint.clone(),
                Some(config.timeout_seconds),
                Some(config.max_retries),
            )?),
            Provider::OpenAI => {
                let api_key = config.api_key()?.ok_or_else(|| {
                    LLMError::Configuration(
                        "api_key_env is required for the openai provider".to_string(),
                    )
                })?;
                Arc::new(OpenAIClient::new(
                    api_key,
                    config.endpoint.clone(),
                    Some(config.timeout_seconds),
                    Some(config.max_retries),
                )?)
            }
            Provider::Custom(name) => {
                return Err(LLMError::Configuration(format!(
                    "Unsupported provider: {name}"
                )))
            }
        };
        info!(
            provider = client.provider_name(),
            model = %config.model,
            "Text generator initialised"
        );
        Ok(Self::new(client, config.model.clone()).with_generation(GenerationConfig {
            max_tokens: config.max_tokens,
            temperature: Some(config.temperature),
            ..GenerationConfig::default()
        }))
    }

    pub async fn health_check(&self) -> LLMResult<()> {
        self.client.health_check().await
    }
}

#[async_trait]
impl TextGenerator for ProviderGenerator {
    async fn generate(
        &self,
        template: &PromptTemplate,
        variables: &PromptContext,
    ) -> LLMResult<String> {
        let rendered = template.render(variables)?;
        let mut generation = self.generation.clone();
        if let Some(temperature) = template.temperature {
            generation.temperature = Some(temperature);
        }
        let request =
            ProviderRequest::from_prompt(&self.model, &rendered.system, &rendered.user, &generation);

        let started = Instant::now();
        let response = self.client.send_request(request).await?;
        debug!(
            template = %template.name,
            provider = self.client.provider_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            total_tokens = response.usage.total_tokens,
            "Generation completed"
        );
        Ok(response.content)
    }

    fn name(&self) -> &str {
        self.client.provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::{ProviderResponse, Usage};
    use std::sync::Mutex;

    struct RecordingClient {
        requests: Mutex<Vec<ProviderRequest>>,
    }

    #[async_trait]
    impl ApiClient for RecordingClient {
        async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ProviderResponse {
                content: "ok".to_string(),
                model: request.model,
                usage: Usage::new(3, 1),
                finish_reason: Some("stop".to_string()),
                raw_response: serde_json::Value::Null,
            })
        }

        fn provider_name(&self) -> &'static str {
            "recording"
        }

        async fn health_check(&self) -> LLMResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn template_temperature_overrides_default() {
        let client = Arc::new(RecordingClient {
            requests: Mutex::new(Vec::new()),
        });
        let generator = ProviderGenerator::new(client.clone(), "test-model");
        let template = PromptTemplate::new("insight", "sys", "Explain {{question}}")
            .with_variables(&["question"])
            .with_temperature(0.7);

        let out = generator
            .generate(
                &template,
                &llm_contracts::context([("question", "costs".to_string())]),
            )
            .await
            .unwrap();

        assert_eq!(out, "ok");
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, Some(0.7));
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(requests[0].messages[1].content, "Explain costs");
    }

    #[test]
    fn openai_without_key_variable_is_rejected() {
        let config = GeneratorConfig {
            provider: "openai".into(),
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            ProviderGenerator::from_config(&config),
            Err(LLMError::Configuration(_))
        ));
    }
}
