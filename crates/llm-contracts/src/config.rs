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

use crate::types::{LLMError, LLMResult, Provider};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key, never the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_insight_temperature")]
    pub insight_temperature: f32,
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "llama3.1".to_string()
}
fn default_timeout_seconds() -> u32 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_insight_temperature() -> f32 {
    0.7
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key_env: None,
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            max_tokens: None,
            temperature: 0.0,
            insight_temperature: default_insight_temperature(),
        }
    }
}

impl GeneratorConfig {
    pub fn provider(&self) -> Provider {
        Provider::from(self.provider.clone())
    }

    pub fn validate(&self) -> LLMResult<()> {
        if self.model.trim().is_empty() {
            return Err(LLMError::Configuration("model must not be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(LLMError::Configuration(
                "timeout_seconds must be greater than zero".into(),
            ));
        }
        for (field, value) in [
            ("temperature", self.temperature),
            ("insight_temperature", self.insight_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(LLMError::Configuration(format!(
                    "{field} must be within 0.0..=2.0, got {value}"
                )));
            }
        }
        if let Provider::Custom(name) = self.provider() {
            return Err(LLMError::Configuration(format!(
                "Unsupported provider: {name}"
            )));
        }
        Ok(())
    }

    /// Resolves the API key from the configured environment variable.
    pub fn api_key(&self) -> LLMResult<Option<String>> {
        match &self.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                LLMError::Authentication(format!("environment variable {var} is not set"))
            }),
        }
    }
}
