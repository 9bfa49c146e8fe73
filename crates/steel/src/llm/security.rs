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

use llm_contracts::{LLMError, LLMResult};
use regex::Regex;
use tracing::warn;

/// Local, rule-based screening applied to text before and after it crosses
/// the generator boundary.
#[derive(Debug, Clone)]
pub struct SecurityProcessor {
    blocked_patterns: Vec<Regex>,
    max_content_length: usize,
}

impl SecurityProcessor {
    pub fn new() -> Self {
        Self {
            blocked_patterns: Vec::new(),
            max_content_length: 1_000_000,
        }
    }

    /// Compiles case-insensitive blocked patterns; an invalid pattern is a
    /// configuration error rather than being skipped.
    pub fn with_blocked_patterns(patterns: &[String]) -> LLMResult<Self> {
        let mut processor = Self::new();
        for pattern in patterns {
            let regex = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
                LLMError::Configuration(format!("Invalid blocked pattern '{pattern}': {e}"))
            })?;
            processor.add_blocked_pattern(regex);
        }
        Ok(processor)
    }

    pub fn add_blocked_pattern(&mut self, pattern: Regex) {
        self.blocked_patterns.push(pattern);
    }

    pub fn set_max_content_length(&mut self, max_length: usize) {
        self.max_content_length = max_length;
    }

    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Returns the first blocked pattern that matches, if any.
    pub fn find_blocked(&self, content: &str) -> Option<&str> {
        self.blocked_patterns
            .iter()
            .find(|pattern| pattern.is_match(content))
            .map(|pattern| pattern.as_str())
    }

    pub fn validate_content(&self, content: &str) -> LLMResult<()> {
        if content.chars().count() > self.max_content_length {
            return Err(LLMError::Validation(format!(
                "Content length {} exceeds maximum allowed length {}",
                content.chars().count(),
                self.max_content_length
            )));
        }

        if let Some(pattern) = self.find_blocked(content) {
            warn!("Content blocked by security pattern {}", pattern);
            return Err(LLMError::Validation(
                "Content contains blocked patterns".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for SecurityProcessor {
    fn default() -> Self {
        Self::new()
    }
}
