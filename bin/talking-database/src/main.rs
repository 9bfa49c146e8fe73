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

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Args, Command, OutputFormat};
use futures::StreamExt;
use std::fmt::Write as _;
use std::io::Write as _;
use stele::database::{Dataset, SqliteDataset};
use stele::{Pipeline, PipelineConfig, StageEvent};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PRETTY_TABLE_ROWS: usize = 10;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,sqlx=warn,reqwest=warn,hyper=warn,hyper_util=warn,rustls=warn")
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn describe_event(event: &StageEvent) -> String {
    let StageEvent::Stage { stage, delta } = event else {
        return match event {
            StageEvent::Error { message } => format!("error: {message}"),
            _ => "done".to_string(),
        };
    };
    let mut out = format!("[{stage}]");
    if let Some(error) = &delta.error {
        let _ = write!(out, "\n  error: {} ({})", error.kind, error.detail);
    }
    if let Some(query) = delta.candidate_query.as_deref().filter(|q| !q.is_empty()) {
        let _ = write!(out, "\n  candidate: {query}");
    }
    if let Some(query) = delta.validated_query.as_deref().filter(|q| !q.is_empty()) {
        let _ = write!(out, "\n  validated: {query}");
    }
    if let Some(table) = &delta.result_table {
        let _ = write!(out, "\n  rows: {}", table.row_count());
        if !table.is_empty() {
            for line in table.summary(PRETTY_TABLE_ROWS).lines() {
                let _ = write!(out, "\n    {line}");
            }
        }
    }
    if let Some(kind) = delta.chart_kind {
        let _ = write!(out, "\n  chart kind: {kind}");
    }
    match &delta.chart_payload {
        Some(Some(payload)) => {
            let _ = write!(
                out,
                "\n  chart: {} \"{}\" ({} labels, {} series)",
                payload.kind,
                payload.options.title,
                payload.data.labels.len(),
                payload.data.values.len()
            );
        }
        Some(None) => out.push_str("\n  chart: none"),
        None => {}
    }
    if let Some(insight) = &delta.insight {
        let _ = write!(out, "\n  insight: {insight}");
    }
    out
}

async fn ask(config: &PipelineConfig, question: String, format: OutputFormat) -> Result<()> {
    let pipeline = Pipeline::connect(config)
        .await
        .context("failed to build the pipeline")?;
    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling the run");
            interrupt.cancel();
        }
    });

    let mut events = pipeline.run_with_cancellation(question, token.clone());
    let mut stdout = std::io::stdout().lock();
    let mut failure = None;
    while let Some(event) = events.next().await {
        match format {
            OutputFormat::Sse => write!(stdout, "{}", event.to_sse()?)?,
            OutputFormat::Jsonl => writeln!(stdout, "{}", event.to_json()?)?,
            OutputFormat::Pretty => writeln!(stdout, "{}", describe_event(&event))?,
        }
        stdout.flush()?;
        if let StageEvent::Error { message } = event {
            failure = Some(message);
        }
    }
    if let Some(message) = failure {
        bail!("pipeline aborted: {message}");
    }
    if token.is_cancelled() {
        bail!("run cancelled before completion");
    }
    Ok(())
}

async fn print_schema(config: &PipelineConfig) -> Result<()> {
    let dataset = SqliteDataset::connect(&config.database.url, 1)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;
    let schema = dataset.describe_schema(config.database.sample_rows).await?;
    println!("{schema}");
    dataset.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config =
        PipelineConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = args.database_url {
        config.database.url = url;
        config.validate()?;
    }
    info!(database = %config.database.url, provider = %config.llm.provider, "Configuration loaded");

    match args.command {
        Command::Ask { question, format } => ask(&config, question, format).await,
        Command::Schema => print_schema(&config).await,
    }
}
