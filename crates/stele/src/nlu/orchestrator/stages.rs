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

//! The eight pipeline stages. Each reads the current state and returns the
//! delta it produced; failures become recorded errors or documented
//! fallbacks, and only an unreachable collaborator escapes as an
//! [`OrchestratorError`].

use super::error::OrchestratorError;
use super::events::StageName;
use super::state::{ErrorKind, PipelineState, StageDelta};
use crate::config::SafetyConfig;
use crate::database::{sanitize_table, GateVerdict, QueryExecutor, SafetyGate};
use crate::nlu::prompts::{self, PromptLibrary, NO_INSIGHT};
use estel::{parse_recommendation, ChartFormatter, ChartKind, ResultTable};
use llm_contracts::{
    context, decode_json, normalise_label, strip_code_fences, LLMError, LLMResult, PromptContext,
    TextGenerator,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use steel::SecurityProcessor;
use tracing::{debug, error, info, instrument, warn};

const VISUALIZATION_SAMPLE_ROWS: usize = 3;
const INSIGHT_SAMPLE_ROWS: usize = 5;

#[derive(Debug, Deserialize)]
struct ChartTitle {
    title: String,
}

/// Collaborators and settings shared by every stage of every run.
pub struct StageRunner {
    pub(crate) generator: Arc<dyn TextGenerator>,
    pub(crate) executor: QueryExecutor,
    pub(crate) gate: SafetyGate,
    pub(crate) prompts: PromptLibrary,
    pub(crate) formatter: ChartFormatter,
    pub(crate) content_screen: SecurityProcessor,
    pub(crate) safety: SafetyConfig,
    pub(crate) sample_rows: usize,
    pub(crate) call_timeout: Duration,
    pub(crate) schema_timeout: Duration,
}

/// Returns why a question is refused before any collaborator is consulted.
pub fn screen_question(question: &str, safety: &SafetyConfig) -> Option<String> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Some("Question is empty.".to_string());
    }
    let length = trimmed.chars().count();
    if length > safety.max_question_length {
        return Some(format!(
            "Question is {length} characters long; the limit is {}.",
            safety.max_question_length
        ));
    }
    let lowered = trimmed.to_lowercase();
    safety
        .unsupported_question_keywords
        .iter()
        .find(|keyword| !keyword.is_empty() && lowered.contains(&keyword.to_lowercase()))
        .map(|keyword| format!("Question contains unsupported keyword '{keyword}'."))
}

impl StageRunner {
    #[instrument(skip_all, fields(stage = %stage))]
    pub async fn run_stage(
        &self,
        stage: StageName,
        state: &PipelineState,
    ) -> Result<StageDelta, OrchestratorError> {
        info!("Running stage");
        match stage {
            StageName::ValidateQuestion => self.validate_question(state).await,
            StageName::GenerateQuery => self.generate_query(state).await,
            StageName::ValidateQuery => self.validate_query(state).await,
            StageName::ExecuteQuery => Ok(self.execute_query(state).await),
            StageName::SelectVisualization => self.select_visualization(state).await,
            StageName::FormatVisualization => Ok(self.format_visualization(state).await),
            StageName::GenerateInsight => self.generate_insight(state).await,
            StageName::ClassifyContent => self.classify_content(state).await,
        }
    }

    /// One bounded generator call. A timeout is reported like any other
    /// failed call.
    async fn generate(&self, name: &'static str, variables: PromptContext) -> LLMResult<String> {
        let template = self.prompts.template(name);
        match tokio::time::timeout(self.call_timeout, self.generator.generate(template, &variables))
            .await
        {
            Ok(Ok(text)) => {
                debug!(prompt = name, response = %text, "Generator responded");
                Ok(text)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(prompt = name, timeout = ?self.call_timeout, "Generator call timed out");
                Err(LLMError::Timeout)
            }
        }
    }

    async fn validate_question(&self, state: &PipelineState) -> Result<StageDelta, OrchestratorError> {
        if let Some(reason) = screen_question(&state.question, &self.safety) {
            warn!(%reason, "Question refused");
            return Ok(StageDelta::failed(ErrorKind::UnsupportedQuestion, reason));
        }

        let schema = match tokio::time::timeout(
            self.schema_timeout,
            self.executor.dataset().describe_schema(self.sample_rows),
        )
        .await
        {
            Ok(Ok(schema)) => schema,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(OrchestratorError::new(format!(
                    "Schema description timed out after {:?}",
                    self.schema_timeout
                )))
            }
        };
        let mut delta = StageDelta {
            schema_description: Some(schema.clone()),
            ..StageDelta::default()
        };

        if self.safety.screen_prompt_injection {
            let verdict = self
                .generate(prompts::PROMPT_INJECTION, context([("question", state.question.clone())]))
                .await;
            match verdict {
                Ok(text) if normalise_label(&text) == "prompt_injection" => {
                    warn!("Question classified as prompt injection");
                    return Ok(delta.with_error(
                        ErrorKind::UnsupportedQuestion,
                        "Question was classified as a prompt injection attempt.",
                    ));
                }
                Ok(_) => {}
                Err(e) if e.is_unreachable() => return Err(e.into()),
                Err(e) => warn!("Prompt injection screen failed, continuing: {e}"),
            }
        }

        let relatedness = self
            .generate(
                prompts::VALIDATE_QUESTION,
                context([("schema", schema), ("question", state.question.clone())]),
            )
            .await;
        match relatedness {
            Ok(text) => match normalise_label(&text).as_str() {
                "related" => {}
                "unrelated" => {
                    info!("Question is unrelated to the dataset");
                    delta = delta.with_error(
                        ErrorKind::UnsupportedQuestion,
                        "Question is not related to the dataset.",
                    );
                }
                other => warn!(label = other, "Unrecognised relatedness label; treating as related"),
            },
            Err(e) if e.is_unreachable() => return Err(e.into()),
            Err(e) => warn!("Relatedness check failed; treating question as related: {e}"),
        }
        Ok(delta)
    }

    async fn generate_query(&self, state: &PipelineState) -> Result<StageDelta, OrchestratorError> {
        if state.has_error() {
            return Ok(StageDelta {
                candidate_query: Some(String::new()),
                ..StageDelta::default()
            });
        }
        let generated = self
            .generate(
                prompts::GENERATE_SQL,
                context([
                    ("schema", state.schema_description.clone()),
                    ("question", state.question.clone()),
                ]),
            )
            .await;
        let (query, failure) = match generated {
            Ok(text) => {
                let query = strip_code_fences(&text);
                if query.is_empty() {
                    (query, Some("Generator returned no query.".to_string()))
                } else {
                    info!(query = %query, "Candidate query generated");
                    (query, None)
                }
            }
            Err(e) if e.is_unreachable() => return Err(e.into()),
            Err(e) => {
                warn!("Query generation failed: {e}");
                (String::new(), Some(e.to_string()))
            }
        };
        let delta = StageDelta {
            candidate_query: Some(query),
            ..StageDelta::default()
        };
        Ok(match failure {
            Some(detail) => delta.with_error(ErrorKind::QueryGenerationFailed, detail),
            None => delta,
        })
    }

    async fn validate_query(&self, state: &PipelineState) -> Result<StageDelta, OrchestratorError> {
        if state.has_error() {
            return Ok(StageDelta {
                validated_query: Some(String::new()),
                ..StageDelta::default()
            });
        }
        let verdict = match tokio::time::timeout(
            self.call_timeout,
            self.gate.validate(&state.candidate_query, &state.schema_description),
        )
        .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!("Safety gate timed out");
                GateVerdict {
                    accepted: false,
                    issues: Some(format!("parse failure: {}", LLMError::Timeout)),
                    query: state.candidate_query.clone(),
                }
            }
        };
        if verdict.accepted {
            info!(query = %verdict.query, issues = ?verdict.issues, "Query accepted by safety gate");
            Ok(StageDelta {
                validated_query: Some(verdict.query),
                ..StageDelta::default()
            })
        } else {
            let issue = verdict
                .issues
                .unwrap_or_else(|| "Query was rejected.".to_string());
            error!(%issue, "Query rejected by safety gate");
            Ok(StageDelta {
                validated_query: Some(String::new()),
                ..StageDelta::failed(ErrorKind::QueryRejected, issue)
            })
        }
    }

    async fn execute_query(&self, state: &PipelineState) -> StageDelta {
        if state.has_error() {
            return StageDelta {
                result_table: Some(ResultTable::empty()),
                ..StageDelta::default()
            };
        }
        match self.executor.execute(&state.validated_query).await {
            Ok(table) => {
                let table = sanitize_table(table);
                info!(rows = table.row_count(), columns = table.column_count(), "Query executed");
                StageDelta {
                    result_table: Some(table),
                    ..StageDelta::default()
                }
            }
            Err(e) => {
                error!("Query execution failed: {e}");
                StageDelta {
                    result_table: Some(ResultTable::empty()),
                    ..StageDelta::failed(ErrorKind::ExecutionFailed, e.to_string())
                }
            }
        }
    }

    async fn select_visualization(
        &self,
        state: &PipelineState,
    ) -> Result<StageDelta, OrchestratorError> {
        let kind = if state.has_error() || state.result_table.is_empty() {
            ChartKind::None
        } else {
            let response = self
                .generate(
                    prompts::VISUALIZATION,
                    context([
                        ("question", state.question.clone()),
                        (
                            "data_summary",
                            state.result_table.summary(VISUALIZATION_SAMPLE_ROWS),
                        ),
                    ]),
                )
                .await;
            match response {
                Ok(text) => parse_recommendation(&text),
                Err(e) if e.is_unreachable() => return Err(e.into()),
                Err(e) => {
                    warn!("Visualization recommendation failed: {e}");
                    ChartKind::None
                }
            }
        };
        info!(chart = %kind, "Visualization selected");
        Ok(StageDelta {
            chart_kind: Some(kind),
            ..StageDelta::default()
        })
    }

    async fn format_visualization(&self, state: &PipelineState) -> StageDelta {
        let no_chart = StageDelta {
            chart_payload: Some(None),
            ..StageDelta::default()
        };
        if state.has_error() || !state.chart_kind.is_chart() || state.result_table.is_empty() {
            return no_chart;
        }
        let plan = match self.formatter.plan(&state.result_table, state.chart_kind) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Chart formatting failed: {e}");
                return no_chart.with_error(ErrorKind::FormattingFailed, e.to_string());
            }
        };
        let title = self.chart_title(state).await;
        StageDelta {
            chart_payload: Some(Some(plan.render(&state.result_table, &title))),
            ..StageDelta::default()
        }
    }

    /// Never fails: any problem with the title call yields the question.
    async fn chart_title(&self, state: &PipelineState) -> String {
        let columns = state.result_table.column_names().join(", ");
        let response = self
            .generate(
                prompts::CHART_TITLE,
                context([("question", state.question.clone()), ("columns", columns)]),
            )
            .await;
        match response.and_then(|text| decode_json::<ChartTitle>(&text)) {
            Ok(ChartTitle { title }) if !title.trim().is_empty() => title.trim().to_string(),
            Ok(_) => state.question.clone(),
            Err(e) => {
                warn!("Chart title unavailable, using the question: {e}");
                state.question.clone()
            }
        }
    }

    async fn generate_insight(&self, state: &PipelineState) -> Result<StageDelta, OrchestratorError> {
        let fixed = StageDelta {
            insight: Some(NO_INSIGHT.to_string()),
            ..StageDelta::default()
        };
        if state.has_error() || state.result_table.is_empty() {
            return Ok(fixed);
        }
        let response = self
            .generate(
                prompts::INSIGHT,
                context([
                    ("question", state.question.clone()),
                    (
                        "data_summary",
                        state.result_table.summary(INSIGHT_SAMPLE_ROWS),
                    ),
                ]),
            )
            .await;
        match response {
            Ok(text) if !text.trim().is_empty() => Ok(StageDelta {
                insight: Some(text.trim().to_string()),
                ..StageDelta::default()
            }),
            Ok(_) => {
                warn!("Generator returned an empty insight");
                Ok(fixed)
            }
            Err(e) if e.is_unreachable() => Err(e.into()),
            Err(e) => {
                warn!("Insight generation failed: {e}");
                Ok(fixed)
            }
        }
    }

    async fn classify_content(&self, state: &PipelineState) -> Result<StageDelta, OrchestratorError> {
        let text = state.insight.as_str();
        if text.is_empty() || text == NO_INSIGHT {
            return Ok(StageDelta::default());
        }
        if let Err(e) = self.content_screen.validate_content(text) {
            warn!("Insight failed local content screen: {e}");
            return Ok(StageDelta::failed(ErrorKind::InappropriateContent, e.to_string()));
        }
        let verdict = self
            .generate(prompts::CONTENT_CLASSIFICATION, context([("text", text.to_string())]))
            .await;
        match verdict {
            Ok(label) if normalise_label(&label).contains("unsafe") => {
                warn!("Insight classified as unsafe");
                Ok(StageDelta::failed(
                    ErrorKind::InappropriateContent,
                    "Insight was classified as unsafe.",
                ))
            }
            Ok(_) => Ok(StageDelta::default()),
            Err(e) if e.is_unreachable() => Err(e.into()),
            Err(e) => {
                warn!("Content classification failed; withholding insight: {e}");
                Ok(StageDelta::failed(
                    ErrorKind::InappropriateContent,
                    format!("Content classification unavailable: {e}"),
                ))
            }
        }
    }
}
