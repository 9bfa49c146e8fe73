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

//! Strict decoding of free-form generator output.
//!
//! Generators wrap structured answers in prose and markdown fences. These
//! helpers find the structured part or fail; they never invent a value.

use crate::types::{LLMError, LLMResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .replace("```", "")
        .trim()
        .to_string()
}

pub fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut code_blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(lang_str) = line.trim().strip_prefix("```") else {
            continue;
        };
        let language = match lang_str.trim() {
            "" => None,
            lang => Some(lang.to_string()),
        };

        let mut code_content = Vec::new();
        for code_line in lines.by_ref() {
            if code_line.trim().starts_with("```") {
                break;
            }
            code_content.push(code_line);
        }
        code_blocks.push((language, code_content.join("\n").trim().to_string()));
    }
    code_blocks
}

/// Finds the first balanced `open..close` span, skipping delimiters that sit
/// inside JSON string literals.
fn find_json_delimiters(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if start.is_some() => in_string = true,
            c if c == open => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            c if c == close && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| &text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn extract_json_value(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }

    for (language, content) in extract_code_blocks(text) {
        if matches!(language.as_deref(), Some("json") | None) {
            if let Ok(value) = serde_json::from_str::<Value>(&content) {
                debug!("Extracted JSON from markdown code fence");
                return Some(value);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(candidate) = find_json_delimiters(text, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                debug!("Extracted embedded JSON from prose");
                return Some(value);
            }
        }
    }
    None
}

pub fn decode_json<T: DeserializeOwned>(text: &str) -> LLMResult<T> {
    let value = extract_json_value(text).ok_or_else(|| {
        LLMError::Serialisation("no JSON structure found in response".to_string())
    })?;
    serde_json::from_value(value)
        .map_err(|e| LLMError::Serialisation(format!("unexpected JSON shape: {e}")))
}

/// Lowercases a one-word verdict and strips quotes and punctuation around it.
pub fn normalise_label(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Title {
        title: String,
    }

    #[test]
    fn strips_sql_fences() {
        assert_eq!(
            strip_code_fences("```sql\nSELECT 1\n```"),
            "SELECT 1".to_string()
        );
        assert_eq!(strip_code_fences("  SELECT 2  "), "SELECT 2".to_string());
    }

    #[test]
    fn decodes_fenced_json() {
        let text = "Here you go:\n```json\n{\"title\": \"Cost by region\"}\n```";
        let decoded: Title = decode_json(text).unwrap();
        assert_eq!(decoded.title, "Cost by region");
    }

    #[test]
    fn decodes_json_embedded_in_prose_with_braces_in_strings() {
        let text = r#"Sure! {"title": "Totals {by} region"} hope that helps"#;
        let decoded: Title = decode_json(text).unwrap();
        assert_eq!(decoded.title, "Totals {by} region");
    }

    #[test]
    fn plain_prose_fails_to_decode() {
        let result: LLMResult<Title> = decode_json("I cannot answer that.");
        assert!(matches!(result, Err(LLMError::Serialisation(_))));
    }

    #[test]
    fn wrong_shape_fails_to_decode() {
        let result: LLMResult<Title> = decode_json(r#"{"heading": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn normalise_label_trims_noise() {
        assert_eq!(normalise_label(" 'Related'.\n"), "related");
        assert_eq!(normalise_label("prompt_injection"), "prompt_injection");
    }

    #[test]
    fn code_blocks_carry_language() {
        let blocks = extract_code_blocks("x\n```sql\nSELECT 1\n```\n```\nplain\n```");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], (Some("sql".to_string()), "SELECT 1".to_string()));
        assert_eq!(blocks[1], (None, "plain".to_string()));
    }
}
