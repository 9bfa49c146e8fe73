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

#![allow(dead_code)]

use async_trait::async_trait;
use estel::{Cell, ResultTable};
use llm_contracts::{LLMError, LLMResult, PromptContext, PromptTemplate, TextGenerator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stele::database::{DatabaseResult, Dataset};
use stele::{Pipeline, PipelineConfig};

pub const TOP_REGIONS_SQL: &str =
    "SELECT region, SUM(cost) AS total FROM projects GROUP BY region ORDER BY total DESC LIMIT 5";

pub const SCHEMA: &str = "CREATE TABLE projects (id INTEGER PRIMARY KEY, region TEXT, cost REAL)";

/// Answers each prompt by template name and records every rendered call.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<HashMap<String, LLMResult<String>>>,
    calls: Mutex<Vec<(String, String)>>,
}
impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn respond(self, template: &str, text: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(template.to_string(), Ok(text.to_string()));
        self
    }
    pub fn fail(self, template: &str, error: LLMError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(template.to_string(), Err(error));
        self
    }
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
    pub fn call_count(&self, template: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == template)
            .count()
    }
    pub fn prompt_for(&self, template: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == template)
            .map(|(_, user)| user.clone())
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, template: &PromptTemplate, variables: &PromptContext) -> LLMResult<String> {
        let rendered = template.render(variables)?;
        self.calls
            .lock()
            .unwrap()
            .push((template.name.clone(), rendered.user));
        self.responses
            .lock()
            .unwrap()
            .get(&template.name)
            .cloned()
            .unwrap_or_else(|| {
                Err(LLMError::Provider(format!(
                    "no scripted response for {}",
                    template.name
                )))
            })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Serves one fixed table and records every query it is asked to run.
pub struct MockDataset {
    table: DatabaseResult<ResultTable>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}
impl MockDataset {
    pub fn returning(table: ResultTable) -> Self {
        Self {
            table: Ok(table),
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dataset for MockDataset {
    async fn fetch_table(&self, query: &str, max_rows: usize) -> DatabaseResult<ResultTable> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.table.clone().map(|table| table.head(max_rows))
    }

    async fn describe_schema(&self, _sample_rows: usize) -> DatabaseResult<String> {
        Ok(SCHEMA.to_string())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn top_regions() -> ResultTable {
    ResultTable::from_rows(
        ["region", "total"],
        [
            ("North", 950.5),
            ("South", 720.0),
            ("East", 610.25),
            ("West", 402.0),
            ("Central", 120.75),
        ]
        .into_iter()
        .map(|(region, total)| vec![Cell::from(region), Cell::Float(total)])
        .collect(),
    )
    .unwrap()
}

pub fn repair_accepting(query: &str) -> String {
    serde_json::json!({"valid": true, "issues": null, "corrected_query": query}).to_string()
}

/// A generator that answers every stage of a successful run.
pub fn happy_generator() -> ScriptedGenerator {
    ScriptedGenerator::new()
        .respond("validate_question", "related")
        .respond("generate_sql", &format!("```sql\n{TOP_REGIONS_SQL}\n```"))
        .respond("validate_sql", &repair_accepting(TOP_REGIONS_SQL))
        .respond(
            "visualization",
            "Recommended Visualization: bar\nReason: comparing totals across regions",
        )
        .respond("chart_title", r#"{"title": "Top 5 Regions by Cost"}"#)
        .respond(
            "insight",
            "North accounts for the largest share of spending, nearly eight times Central.",
        )
        .respond("content_classification", "safe")
}

pub fn pipeline(generator: &Arc<ScriptedGenerator>, dataset: &Arc<MockDataset>) -> Pipeline {
    Pipeline::new(
        &PipelineConfig::default(),
        generator.clone(),
        dataset.clone(),
    )
    .unwrap()
}
