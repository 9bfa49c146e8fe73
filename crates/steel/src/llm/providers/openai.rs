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
use tracing::{debug, warn};

use super::ApiClient;

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        timeout_seconds: Option<u32>,
        max_retries: Option<u32>,
    ) -> LLMResult<Self> {
        let timeout = Duration::from_secs(timeout_seconds.unwrap_or(30).into());
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            timeout,
            max_retries: max_retries.unwrap_or(2),
        })
    }

    fn build_openai_payload(&self, request: &ProviderRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop_sequences {
            payload["stop"] = json!(stop);
        }
        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }
        payload
    }

    fn parse_openai_response(
        &self,
        response_data: Value,
        model: String,
    ) -> LLMResult<ProviderResponse> {
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from OpenAI response".to_string())
            })?;

        let usage = response_data
            .get("usage")
            .map(|usage_data| {
                Usage::new(
                    usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                    usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32,
                )
            })
            .unwrap_or_default();

        let finish_reason = response_data["choices"][0]["finish_reason"]
            .as_str()
            .map(|s| s.to_string());

        Ok(ProviderResponse {
            content: content.to_string(),
            model,
            usage,
            finish_reason,
            raw_response: response_data,
        })
    }

    async fn execute_request_with_retry(&self, payload: Value) -> LLMResult<Value> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(attempt = attempt + 1, "Sending request to OpenAI-compatible API");
            match tokio::time::timeout(
                self.timeout,
                self.client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_key)
                    .header("Content-Type", "application/json")
                    .json(&payload)
                    .send(),
            )
            .await
            {
                Ok(Ok(response)) => match response.status() {
                    status if status.is_success() => {
                        return response.json().await.map_err(|e| {
                            LLMError::Serialisation(format!("Failed to parse response: {e}"))
                        });
                    }
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        return Err(LLMError::Authentication(format!(
                            "OpenAI API rejected credentials ({})",
                            response.status()
                        )));
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        let wait_time = Duration::from_secs(2_u64.pow(attempt.min(5)));
                        warn!("Rate limited, waiting {:?} before retry", wait_time);
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(LLMError::RateLimit);
                    }
                    status => {
                        last_error = Some(LLMError::Provider(format!(
                            "OpenAI API error {}: {}",
                            status,
                            response
                                .text()
                                .await
                                .unwrap_or_else(|_| "Unknown error".to_string())
                        )));
                        if status.is_client_error() {
                            break;
                        }
                    }
                },
                Ok(Err(e)) => {
                    last_error = Some(LLMError::Network(format!("Request failed: {e}")));
                    if attempt < self.max_retries {
                        let wait_time = Duration::from_secs(2_u64.pow(attempt.min(3)));
                        tokio::time::sleep(wait_time).await;
                    }
                }
                Err(_) => {
                    warn!("Request timed out after {:?}", self.timeout);
                    last_error = Some(LLMError::Timeout);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_openai_payload(&request);
        let response_data = self.execute_request_with_retry(payload).await?;
        self.parse_openai_response(response_data, request.model)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn health_check(&self) -> LLMResult<()> {
        let models_url = self
            .endpoint
            .rsplit_once("/chat/completions")
            .map(|(base, _)| format!("{base}/models"))
            .ok_or_else(|| {
                LLMError::Configuration(format!(
                    "Cannot derive models URL from endpoint {}",
                    self.endpoint
                ))
            })?;
        let response = self
            .client
            .get(&models_url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| LLMError::Network(format!("Failed to reach OpenAI endpoint: {e}")))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LLMError::Authentication(
                "OpenAI API rejected credentials".to_string(),
            )),
            status => Err(LLMError::Provider(format!(
                "OpenAI health check failed: {status}"
            ))),
        }
    }
}
