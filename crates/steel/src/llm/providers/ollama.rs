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
use llm_contracts::{LLMError, LLMResult, ProviderRequest, ProviderResponse, Usage};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ApiClient;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(
        base_url: Option<String>,
        timeout_seconds: Option<u32>,
        max_retries: Option<u32>,
    ) -> LLMResult<Self> {
        let timeout = Duration::from_secs(timeout_seconds.unwrap_or(60).into());
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
            max_retries: max_retries.unwrap_or(2),
        })
    }

    fn build_ollama_payload(&self, request: &ProviderRequest) -> Value {
        let mut options = serde_json::Map::new();
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            options.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".into(), json!(top_p));
        }
        if let Some(stop) = &request.stop_sequences {
            options.insert("stop".into(), json!(stop));
        }

        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false
        });
        if !options.is_empty() {
            payload["options"] = Value::Object(options);
        }
        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }
        payload
    }

    fn parse_ollama_response(
        &self,
        response_data: Value,
        model: String,
    ) -> LLMResult<ProviderResponse> {
        let content = response_data["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from Ollama response".to_string())
            })?;

        let usage = Usage::new(
            response_data["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            response_data["eval_count"].as_u64().unwrap_or(0) as u32,
        );
        let finish_reason = response_data["done"]
            .as_bool()
            .unwrap_or(false)
            .then(|| "stop".to_string());

        Ok(ProviderResponse {
            content: content.to_string(),
            model,
            usage,
            finish_reason,
            raw_response: response_data,
        })
    }

    async fn execute_request_with_retry(&self, payload: Value, endpoint: &str) -> LLMResult<Value> {
        let mut last_error = None;
        let url = format!("{}{}", self.base_url, endpoint);

        for attempt in 0..=self.max_retries {
            debug!(
                attempt = attempt + 1,
                max_attempts = self.max_retries + 1,
                "Sending request to Ollama API"
            );

            let response = tokio::time::timeout(
                self.timeout,
                self.client
                    .post(&url)
                    .header("content-type", "application/json")
                    .json(&payload)
                    .send(),
            )
            .await;

            match response {
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    info!("Received response from Ollama API: {}", status);

                    if status.is_success() {
                        return resp.json::<Value>().await.map_err(|e| {
                            LLMError::Serialisation(format!("Failed to parse JSON response: {e}"))
                        });
                    } else if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait_time = Duration::from_secs(2_u64.pow(attempt.min(5)));
                        warn!(
                            "Rate limited by Ollama API, waiting {:?} before retry",
                            wait_time
                        );
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(LLMError::RateLimit);
                    } else {
                        let error_body = resp.text().await.unwrap_or_default();
                        if status == StatusCode::NOT_FOUND {
                            return Err(LLMError::Configuration(format!(
                                "Ollama model or endpoint not found: {error_body}"
                            )));
                        }
                        last_error = Some(LLMError::Provider(format!(
                            "Ollama API error {status}: {error_body}"
                        )));
                        if status.is_client_error() {
                            break;
                        }
                    }
                }
                Ok(Err(e)) => {
                    last_error = Some(LLMError::Network(format!("Request failed: {e}")));
                    if attempt < self.max_retries {
                        let wait_time = Duration::from_secs(2_u64.pow(attempt.min(3)));
                        tokio::time::sleep(wait_time).await;
                    }
                }
                Err(_) => {
                    warn!("Request to Ollama API timed out after {:?}", self.timeout);
                    last_error = Some(LLMError::Timeout);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
    }
}

#[async_trait]
impl ApiClient for OllamaClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_ollama_payload(&request);
        let response_data = self
            .execute_request_with_retry(payload, "/api/chat")
            .await?;
        self.parse_ollama_response(response_data, request.model)
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    async fn health_check(&self) -> LLMResult<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LLMError::Network(format!("Failed to connect to Ollama: {e}")))?;

        if !response.status().is_success() {
            return Err(LLMError::Provider(format!(
                "Ollama health check failed: {}",
                response.status()
            )));
        }

        let models_data: Value = response.json().await.map_err(|e| {
            LLMError::Serialisation(format!("Failed to parse models response: {e}"))
        })?;
        let models = models_data["models"].as_array().ok_or_else(|| {
            LLMError::Provider("Invalid response format from Ollama /api/tags".to_string())
        })?;
        if models.is_empty() {
            warn!("Ollama is running but no models are available");
            return Err(LLMError::Provider(
                "No models available in Ollama".to_string(),
            ));
        }
        info!("Ollama connected with {} models available", models.len());
        Ok(())
    }
}
