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

//! The question-to-answer pipeline: a fixed sequence of stages over one
//! [`PipelineState`], streamed as [`StageEvent`]s.

pub mod error;
pub mod events;
pub mod stages;
pub mod state;

pub use error::OrchestratorError;
pub use events::{StageEvent, StageName};
pub use stages::{screen_question, StageRunner};
pub use state::{ErrorKind, PipelineError, PipelinePhase, PipelineState, StageDelta};

use crate::config::{ConfigError, PipelineConfig};
use crate::database::{Dataset, QueryExecutor, ReadOnlyGuard, SafetyGate, SqliteDataset};
use crate::nlu::prompts::{self, PromptLibrary};
use estel::ChartFormatter;
use futures::stream::{self, BoxStream, StreamExt};
use llm_contracts::{GeneratorConfig, TextGenerator};
use std::sync::Arc;
use std::time::Duration;
use steel::{ProviderGenerator, SecurityProcessor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Cheap to clone; every clone shares the same collaborators.
#[derive(Clone)]
pub struct Pipeline {
    runner: Arc<StageRunner>,
}

struct RunCursor {
    runner: Arc<StageRunner>,
    state: PipelineState,
    next: usize,
    token: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        generator: Arc<dyn TextGenerator>,
        dataset: Arc<dyn Dataset>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let prompts = PromptLibrary::new(config.llm.insight_temperature)
            .with_overrides(&config.prompts)?;
        let guard = ReadOnlyGuard::with_extra_keywords(&config.safety.extra_forbidden_keywords)
            .map_err(|e| ConfigError::Invalid {
                field: "safety.extra_forbidden_keywords".to_string(),
                reason: e.to_string(),
            })?;
        let query_timeout = Duration::from_secs(config.database.query_timeout_seconds);
        let executor = QueryExecutor::new(dataset)
            .with_guard(guard)
            .with_timeout(query_timeout)
            .with_max_rows(config.database.max_rows);
        let gate = SafetyGate::new(
            generator.clone(),
            prompts.template(prompts::VALIDATE_SQL).clone(),
        )
        .with_divergence_ratio(config.safety.divergence_ratio);
        let content_screen =
            SecurityProcessor::with_blocked_patterns(&config.safety.blocked_insight_patterns)
                .map_err(ConfigError::from)?;
        let call_timeout = generator_call_timeout(&config.llm);

        info!(
            generator = generator.name(),
            max_rows = config.database.max_rows,
            "Pipeline ready"
        );
        Ok(Self {
            runner: Arc::new(StageRunner {
                generator,
                executor,
                gate,
                prompts,
                formatter: ChartFormatter::new(),
                content_screen,
                safety: config.safety.clone(),
                sample_rows: config.database.sample_rows,
                call_timeout,
                schema_timeout: query_timeout,
            }),
        })
    }

    /// Opens the configured dataset read-only and builds the configured
    /// provider.
    pub async fn connect(config: &PipelineConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let dataset =
            SqliteDataset::connect(&config.database.url, config.database.max_connections).await?;
        let generator = ProviderGenerator::from_config(&config.llm)?;
        Self::new(config, Arc::new(generator), Arc::new(dataset))
    }

    pub async fn describe_schema(&self) -> Result<String, OrchestratorError> {
        Ok(self
            .runner
            .executor
            .dataset()
            .describe_schema(self.runner.sample_rows)
            .await?)
    }

    /// Streams one event per stage followed by `end`, or stops with a single
    /// `error` event when a collaborator cannot be reached.
    pub fn run(&self, question: impl Into<String>) -> BoxStream<'static, StageEvent> {
        self.run_with_cancellation(question, CancellationToken::new())
    }

    /// Like [`Pipeline::run`], but cancelling `token` ends the stream before
    /// the next event and drops any in-flight stage. Dropping the stream has
    /// the same effect.
    pub fn run_with_cancellation(
        &self,
        question: impl Into<String>,
        token: CancellationToken,
    ) -> BoxStream<'static, StageEvent> {
        let cursor = RunCursor {
            runner: self.runner.clone(),
            state: PipelineState::new(question),
            next: 0,
            token,
        };
        stream::unfold(Some(cursor), |cursor| async move {
            let mut cursor = cursor?;
            if cursor.token.is_cancelled() {
                info!("Pipeline run cancelled");
                return None;
            }
            let Some(&stage) = StageName::ALL.get(cursor.next) else {
                cursor.state.phase = PipelinePhase::Terminal;
                info!(error = ?cursor.state.error_kind(), "Pipeline run complete");
                return Some((StageEvent::End, None));
            };
            cursor.state.phase = stage.phase();
            let outcome = tokio::select! {
                biased;
                () = cursor.token.cancelled() => {
                    info!(%stage, "Pipeline run cancelled mid-stage");
                    return None;
                }
                outcome = cursor.runner.run_stage(stage, &cursor.state) => outcome,
            };
            match outcome {
                Ok(delta) => {
                    cursor.state.apply(&delta);
                    cursor.next += 1;
                    Some((StageEvent::Stage { stage, delta }, Some(cursor)))
                }
                Err(e) => {
                    error!(%stage, "Pipeline aborted: {e}");
                    Some((
                        StageEvent::Error {
                            message: e.to_string(),
                        },
                        None,
                    ))
                }
            }
        })
        .boxed()
    }

    /// Runs every stage without streaming and returns the terminal state.
    #[instrument(skip(self, question))]
    pub async fn run_to_completion(
        &self,
        question: impl Into<String>,
    ) -> Result<PipelineState, OrchestratorError> {
        let mut state = PipelineState::new(question);
        for stage in StageName::ALL {
            state.phase = stage.phase();
            let delta = self.runner.run_stage(stage, &state).await?;
            state.apply(&delta);
        }
        state.phase = PipelinePhase::Terminal;
        Ok(state)
    }
}

/// Providers retry internally; the bound covers every attempt.
fn generator_call_timeout(llm: &GeneratorConfig) -> Duration {
    let attempts = u64::from(llm.max_retries).saturating_add(1);
    Duration::from_secs(u64::from(llm.timeout_seconds).saturating_mul(attempts))
}
