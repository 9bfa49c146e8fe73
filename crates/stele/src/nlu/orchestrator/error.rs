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

use crate::config::ConfigError;
use crate::database::DatabaseError;
use llm_contracts::LLMError;

/// A fault that ends a run with an `error` event instead of completing the
/// stage sequence.
#[derive(Debug)]
pub struct OrchestratorError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}
impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}
impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| {
            let e: &(dyn std::error::Error + Send + Sync) = e.as_ref();
            e as &(dyn std::error::Error + 'static)
        })
    }
}
impl OrchestratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
    pub fn message(&self) -> &str {
        &self.message
    }
}
impl From<&str> for OrchestratorError {
    fn from(message: &str) -> Self {
        OrchestratorError::new(message)
    }
}
impl From<LLMError> for OrchestratorError {
    fn from(err: LLMError) -> Self {
        OrchestratorError::with_source("Text generator unavailable", err)
    }
}
impl From<DatabaseError> for OrchestratorError {
    fn from(err: DatabaseError) -> Self {
        OrchestratorError::with_source("Dataset unavailable", err)
    }
}
impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        OrchestratorError::with_source("Invalid pipeline configuration", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn display_includes_source() {
        let err = OrchestratorError::from(LLMError::Network("connection refused".to_string()));
        assert_eq!(
            err.to_string(),
            "Text generator unavailable: Network error: connection refused"
        );
        assert!(err.source().is_some());
        assert_eq!(OrchestratorError::from("stopped").to_string(), "stopped");
    }
}
