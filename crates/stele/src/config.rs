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

//! Pipeline configuration: YAML file, then environment overrides.

use llm_contracts::{GeneratorConfig, LLMError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

pub const ENV_DATABASE_URL: &str = "TALKDB_DATABASE_URL";
pub const ENV_LLM_PROVIDER: &str = "TALKDB_LLM_PROVIDER";
pub const ENV_LLM_MODEL: &str = "TALKDB_LLM_MODEL";
pub const ENV_LLM_ENDPOINT: &str = "TALKDB_LLM_ENDPOINT";

pub const DEFAULT_UNSUPPORTED_KEYWORDS: [&str; 16] = [
    "delete",
    "drop",
    "recreate",
    "truncate",
    "shutdown",
    "restart",
    "kill",
    "grant",
    "revoke",
    "who are you",
    "what is your name",
    "what is ai",
    "can you create a python script",
    "how to hack",
    "how to create a bomb",
    "how to commit suicide",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {field} {reason}")]
    Invalid { field: String, reason: String },
    #[error("Invalid generator configuration: {0}")]
    Generator(#[from] LLMError),
}
impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub query_timeout_seconds: u64,
    pub max_rows: usize,
    pub sample_rows: usize,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://db/analytics.db".to_string(),
            max_connections: 4,
            query_timeout_seconds: 30,
            max_rows: 1000,
            sample_rows: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub unsupported_question_keywords: Vec<String>,
    /// Appended to the built-in execution denylist; cannot remove entries.
    pub extra_forbidden_keywords: Vec<String>,
    pub divergence_ratio: f64,
    pub screen_prompt_injection: bool,
    pub blocked_insight_patterns: Vec<String>,
    pub max_question_length: usize,
}
impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            unsupported_question_keywords: DEFAULT_UNSUPPORTED_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            extra_forbidden_keywords: Vec::new(),
            divergence_ratio: 0.5,
            screen_prompt_injection: false,
            blocked_insight_patterns: Vec::new(),
            max_question_length: 2000,
        }
    }
}

/// Partial replacement for one built-in prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOverride {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub llm: GeneratorConfig,
    pub safety: SafetyConfig,
    pub prompts: HashMap<String, PromptOverride>,
}
impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }
    /// Loads `.env`, the optional YAML file and environment overrides, then
    /// validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "Loaded .env file");
        }
        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading pipeline configuration");
                Self::from_yaml_file(path)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = present(ENV_DATABASE_URL) {
            self.database.url = url;
        }
        if let Some(provider) = present(ENV_LLM_PROVIDER) {
            self.llm.provider = provider;
        }
        if let Some(model) = present(ENV_LLM_MODEL) {
            self.llm.model = model;
        }
        if let Some(endpoint) = present(ENV_LLM_ENDPOINT) {
            self.llm.endpoint = Some(endpoint);
        }
    }
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::invalid("database.url", "must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid("database.max_connections", "must be at least 1"));
        }
        if self.database.query_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "database.query_timeout_seconds",
                "must be greater than zero",
            ));
        }
        if self.database.max_rows == 0 {
            return Err(ConfigError::invalid("database.max_rows", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.safety.divergence_ratio) {
            return Err(ConfigError::invalid(
                "safety.divergence_ratio",
                format!("must be within 0.0..=1.0, got {}", self.safety.divergence_ratio),
            ));
        }
        if self.safety.max_question_length == 0 {
            return Err(ConfigError::invalid("safety.max_question_length", "must be at least 1"));
        }
        if let Some(bad) = self
            .safety
            .extra_forbidden_keywords
            .iter()
            .find(|k| k.trim().is_empty() || !k.trim().chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(ConfigError::invalid(
                "safety.extra_forbidden_keywords",
                format!("'{bad}' is not a single SQL keyword"),
            ));
        }
        self.llm.validate()?;
        Ok(())
    }
}
