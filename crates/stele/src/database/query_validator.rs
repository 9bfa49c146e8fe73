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

//! Query Safety Gate: asks the text generator to check and repair a
//! candidate query, then applies local guards to whatever comes back.

use llm_contracts::{
    context, decode_json, LLMError, LLMResult, PromptTemplate, TextGenerator,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_DIVERGENCE_RATIO: f64 = 0.5;
pub const NO_SELECT_ISSUE: &str = "no SELECT statement";
pub const DIVERGENCE_ISSUE: &str = "Corrected query was too different from the original.";

static SELECT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bselect\b").expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
struct RepairResponse {
    valid: bool,
    #[serde(default)]
    issues: Option<String>,
    #[serde(default)]
    corrected_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub accepted: bool,
    pub issues: Option<String>,
    pub query: String,
}
impl GateVerdict {
    fn rejected(issue: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            accepted: false,
            issues: Some(issue.into()),
            query: query.into(),
        }
    }
}

/// Slices `text` from its first whole-word `SELECT`, dropping any preamble
/// and a trailing markdown fence.
pub fn extract_select_statement(text: &str) -> Option<String> {
    let start = SELECT_TOKEN.find(text)?.start();
    let tail = &text[start..];
    let statement = tail.find("```").map_or(tail, |end| &tail[..end]).trim();
    (!statement.is_empty()).then(|| statement.to_string())
}

pub struct SafetyGate {
    generator: Arc<dyn TextGenerator>,
    template: PromptTemplate,
    divergence_ratio: f64,
}
impl SafetyGate {
    pub fn new(generator: Arc<dyn TextGenerator>, template: PromptTemplate) -> Self {
        Self {
            generator,
            template,
            divergence_ratio: DEFAULT_DIVERGENCE_RATIO,
        }
    }
    pub fn with_divergence_ratio(mut self, ratio: f64) -> Self {
        self.divergence_ratio = ratio;
        self
    }

    /// Runs the repair call and reviews its answer. A failed call degrades
    /// to a rejection; only an unreachable generator is returned as an error.
    #[instrument(skip_all, fields(query_len = raw_query.len()))]
    pub async fn validate(&self, raw_query: &str, schema_description: &str) -> LLMResult<GateVerdict> {
        let variables = context([
            ("schema", schema_description.to_string()),
            ("sql_query", raw_query.to_string()),
        ]);
        match self.generator.generate(&self.template, &variables).await {
            Ok(response) => {
                debug!(response = %response, "Repair response received");
                Ok(self.review(raw_query, &response))
            }
            Err(e) if e.is_unreachable() => Err(e),
            Err(e) => {
                warn!("Query repair call failed: {e}");
                Ok(GateVerdict::rejected(format!("parse failure: {e}"), raw_query.trim()))
            }
        }
    }

    /// Applies the decode, divergence and prefix rules to a repair response.
    pub fn review(&self, raw_query: &str, response: &str) -> GateVerdict {
        let original = raw_query.trim();
        let repair: RepairResponse = match decode_json(response) {
            Ok(repair) => repair,
            Err(LLMError::Serialisation(reason)) => {
                warn!("Repair response could not be decoded: {reason}");
                return GateVerdict::rejected(format!("parse failure: {reason}"), original);
            }
            Err(e) => return GateVerdict::rejected(format!("parse failure: {e}"), original),
        };

        let corrected = repair.corrected_query.as_deref().unwrap_or("").trim();
        let (candidate, issues) = if repair.valid {
            (original, repair.issues)
        } else if self.diverges(original, corrected) {
            warn!(
                original_len = original.chars().count(),
                corrected_len = corrected.chars().count(),
                "Correction diverges from the original; keeping the original"
            );
            (original, Some(DIVERGENCE_ISSUE.to_string()))
        } else {
            info!(issues = ?repair.issues, "Using corrected query");
            (corrected, repair.issues)
        };

        match extract_select_statement(candidate) {
            Some(query) => GateVerdict {
                accepted: true,
                issues,
                query,
            },
            None => GateVerdict::rejected(NO_SELECT_ISSUE, candidate),
        }
    }

    fn diverges(&self, original: &str, corrected: &str) -> bool {
        let original_len = original.chars().count();
        original_len > 0
            && (corrected.chars().count() as f64) < self.divergence_ratio * original_len as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llm_contracts::PromptContext;

    struct Fixed(LLMResult<String>);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _: &PromptTemplate, _: &PromptContext) -> LLMResult<String> {
            self.0.clone()
        }
    }

    fn gate(response: LLMResult<String>) -> SafetyGate {
        SafetyGate::new(
            Arc::new(Fixed(response)),
            PromptTemplate::new("validate_sql", "", "{{schema}} {{sql_query}}"),
        )
    }

    const ORIGINAL: &str =
        "SELECT region, SUM(cost) AS total FROM projects GROUP BY region ORDER BY total DESC LIMIT 5";

    #[test]
    fn extracts_select_from_fenced_prose() {
        assert_eq!(
            extract_select_statement("Sure! ```sql\nSELECT 1\n```").as_deref(),
            Some("SELECT 1")
        );
        assert_eq!(
            extract_select_statement("here: select a from t;").as_deref(),
            Some("select a from t;")
        );
        assert_eq!(extract_select_statement("SELECTED nothing"), None);
        assert_eq!(extract_select_statement("no query here"), None);
    }

    #[test]
    fn valid_response_keeps_original() {
        let response = format!(r#"{{"valid": true, "issues": null, "corrected_query": "{ORIGINAL}"}}"#);
        let verdict = gate(Ok(String::new())).review(ORIGINAL, &response);
        assert_eq!(
            verdict,
            GateVerdict {
                accepted: true,
                issues: None,
                query: ORIGINAL.to_string()
            }
        );
    }

    #[test]
    fn short_correction_is_discarded() {
        let response = r#"{"valid": false, "issues": "bad", "corrected_query": "SELECT 1"}"#;
        let verdict = gate(Ok(String::new())).review(ORIGINAL, response);
        assert!(verdict.accepted);
        assert_eq!(verdict.query, ORIGINAL);
        assert_eq!(verdict.issues.as_deref(), Some(DIVERGENCE_ISSUE));
    }

    #[test]
    fn plausible_correction_is_used() {
        let corrected = "SELECT region, SUM(cost) AS total FROM projects GROUP BY region LIMIT 5";
        let response = format!(
            "```json\n{{\"valid\": false, \"issues\": \"ORDER BY\", \"corrected_query\": \"{corrected}\"}}\n```"
        );
        let verdict = gate(Ok(String::new())).review(ORIGINAL, &response);
        assert!(verdict.accepted);
        assert_eq!(verdict.query, corrected);
    }

    #[test]
    fn correction_without_select_is_rejected() {
        let raw = "SHOW TABLES FROM the database please";
        let response = r#"{"valid": false, "issues": "x", "corrected_query": "SHOW TABLES FROM the database"}"#;
        let verdict = gate(Ok(String::new())).review(raw, response);
        assert!(!verdict.accepted);
        assert_eq!(verdict.issues.as_deref(), Some(NO_SELECT_ISSUE));
    }

    #[test]
    fn undecodable_response_is_a_parse_failure() {
        let verdict = gate(Ok(String::new())).review(ORIGINAL, "Looks fine to me!");
        assert!(!verdict.accepted);
        assert!(verdict.issues.unwrap().starts_with("parse failure"));
    }

    #[tokio::test]
    async fn failed_call_degrades_to_rejection() {
        let verdict = gate(Err(LLMError::Timeout))
            .validate(ORIGINAL, "schema")
            .await
            .unwrap();
        assert!(!verdict.accepted);
    }

    #[tokio::test]
    async fn unreachable_generator_is_returned() {
        let result = gate(Err(LLMError::Network("refused".into())))
            .validate(ORIGINAL, "schema")
            .await;
        assert!(matches!(result, Err(LLMError::Network(_))));
    }
}
