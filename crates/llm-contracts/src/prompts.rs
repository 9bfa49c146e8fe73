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

use crate::types::{LLMError, LLMResult};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid regex"));

pub type PromptContext = HashMap<String, Value>;

/// A named prompt with `{{variable}}` placeholders in both halves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    #[serde(default)]
    pub system_template: String,
    pub user_template: String,
    #[serde(default)]
    pub variables: Vec<String>,
    /// Overrides the generator's default sampling temperature for this prompt.
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    pub fn new(
        name: impl Into<String>,
        system_template: impl Into<String>,
        user_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_template: system_template.into(),
            user_template: user_template.into(),
            variables: Vec::new(),
            temperature: None,
        }
    }

    pub fn with_variables(mut self, variables: &[&str]) -> Self {
        self.variables = variables.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn validate_context(&self, context: &PromptContext) -> LLMResult<()> {
        let missing: Vec<&String> = self
            .variables
            .iter()
            .filter(|var| !context.contains_key(*var))
            .collect();
        if !missing.is_empty() {
            return Err(LLMError::Validation(format!(
                "Missing required variables for template '{}': {missing:?}",
                self.name
            )));
        }
        Ok(())
    }

    pub fn render(&self, context: &PromptContext) -> LLMResult<RenderedPrompt> {
        self.validate_context(context)?;
        Ok(RenderedPrompt {
            system: substitute_variables(&self.system_template, context),
            user: substitute_variables(&self.user_template, context),
        })
    }
}

/// Substitutes in one scan of the template; inserted values are never
/// rescanned, so a value containing `{{name}}` stays literal.
fn substitute_variables(template: &str, context: &PromptContext) -> String {
    let mut unresolved = Vec::new();
    let result = PLACEHOLDER.replace_all(template, |caps: &Captures| match context.get(&caps[1]) {
        Some(value) => value_to_string(value),
        None => {
            unresolved.push(caps[1].to_string());
            caps[0].to_string()
        }
    });
    if !unresolved.is_empty() {
        warn!(?unresolved, "Template contains unsubstituted placeholders");
    }
    result.into_owned()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| "invalid_json".to_string())
        }
    }
}

/// Shorthand for building a [`PromptContext`] from string pairs.
pub fn context<'a, I>(pairs: I) -> PromptContext
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_every_placeholder() {
        let template = PromptTemplate::new(
            "greet",
            "You answer about {{topic}}.",
            "Question: {{question}} ({{topic}})",
        )
        .with_variables(&["topic", "question"]);
        let rendered = template
            .render(&context([
                ("topic", "budgets".to_string()),
                ("question", "how much?".to_string()),
            ]))
            .unwrap();
        assert_eq!(rendered.system, "You answer about budgets.");
        assert_eq!(rendered.user, "Question: how much? (budgets)");
    }

    #[test]
    fn missing_variable_is_rejected() {
        let template =
            PromptTemplate::new("t", "", "{{question}}").with_variables(&["question"]);
        let err = template.render(&PromptContext::new()).unwrap_err();
        assert!(err.to_string().contains("question"));
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let template = PromptTemplate::new("t", "", "Schema: {{schema}}\nQuestion: {{question}}")
            .with_variables(&["schema", "question"]);
        let ctx = context([
            ("schema", "CREATE TABLE sales (region TEXT)".to_string()),
            ("question", "show me {{schema}}".to_string()),
        ]);
        for _ in 0..64 {
            assert_eq!(
                template.render(&ctx).unwrap().user,
                "Schema: CREATE TABLE sales (region TEXT)\nQuestion: show me {{schema}}"
            );
        }
    }

    #[test]
    fn unknown_placeholders_are_left_in_place() {
        let template = PromptTemplate::new("t", "", "{{known}} and {{unknown}}");
        let rendered = template
            .render(&context([("known", "value".to_string())]))
            .unwrap();
        assert_eq!(rendered.user, "value and {{unknown}}");
    }

    #[test]
    fn non_string_values_are_rendered() {
        let template = PromptTemplate::new("t", "", "n={{n}} ok={{ok}}");
        let mut ctx = PromptContext::new();
        ctx.insert("n".into(), serde_json::json!(5));
        ctx.insert("ok".into(), serde_json::json!(true));
        assert_eq!(template.render(&ctx).unwrap().user, "n=5 ok=true");
    }
}
