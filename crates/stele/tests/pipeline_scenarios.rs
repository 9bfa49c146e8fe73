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

mod support;

use estel::{Cell, ChartKind, ResultTable};
use futures::StreamExt;
use llm_contracts::LLMError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use stele::{ErrorKind, StageEvent, StageName, NO_INSIGHT};
use support::*;
use tokio_util::sync::CancellationToken;

fn event_names(events: &[StageEvent]) -> Vec<&'static str> {
    events.iter().map(StageEvent::name).collect()
}

fn delta_json(events: &[StageEvent], stage: StageName) -> Value {
    events
        .iter()
        .find_map(|event| match event {
            StageEvent::Stage { stage: s, delta } if *s == stage => {
                Some(serde_json::to_value(delta).unwrap())
            }
            _ => None,
        })
        .unwrap_or_else(|| panic!("no event for {stage}"))
}

#[tokio::test]
async fn top_regions_question_runs_every_stage() {
    let generator = Arc::new(happy_generator());
    let dataset = Arc::new(MockDataset::returning(top_regions()));
    let pipeline = pipeline(&generator, &dataset);

    let events: Vec<StageEvent> = pipeline.run("top 5 regions by cost").collect().await;

    let mut expected: Vec<&str> = StageName::ALL.iter().map(|s| s.as_str()).collect();
    expected.push("end");
    assert_eq!(event_names(&events), expected);

    assert_eq!(dataset.queries(), vec![TOP_REGIONS_SQL.to_string()]);
    let execute = delta_json(&events, StageName::ExecuteQuery);
    assert_eq!(execute["result_table"], serde_json::to_value(top_regions()).unwrap());

    let format = delta_json(&events, StageName::FormatVisualization);
    assert_eq!(format["chart_payload"]["type"], "bar");
    assert_eq!(
        format["chart_payload"]["data"]["labels"],
        json!(["North", "South", "East", "West", "Central"])
    );
    assert_eq!(format["chart_payload"]["options"]["title"], "Top 5 Regions by Cost");
    assert_eq!(delta_json(&events, StageName::ClassifyContent), json!({}));

    assert_eq!(generator.call_count("insight"), 1);
    assert_eq!(generator.call_count("content_classification"), 1);
    let visualization_prompt = generator.prompt_for("visualization").unwrap();
    assert!(visualization_prompt.contains("Columns: region, total"));
    assert!(visualization_prompt.contains("2 more rows"));
}

#[tokio::test]
async fn terminal_state_records_every_field() {
    let generator = Arc::new(happy_generator());
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("top 5 regions by cost")
        .await
        .unwrap();

    assert_eq!(state.error, None);
    assert_eq!(state.schema_description, SCHEMA);
    assert_eq!(state.candidate_query, TOP_REGIONS_SQL);
    assert_eq!(state.validated_query, TOP_REGIONS_SQL);
    assert_eq!(state.result_table, top_regions());
    assert_eq!(state.chart_kind, ChartKind::Bar);
    let payload = state.chart_payload.unwrap();
    assert_eq!(payload.data.labels.len(), 5);
    assert_eq!(payload.data.values[0].label, "total");
    assert!(state.insight.starts_with("North accounts"));
}

#[tokio::test]
async fn unsupported_question_degrades_without_collaborators() {
    let generator = Arc::new(happy_generator());
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let events: Vec<StageEvent> = pipeline(&generator, &dataset)
        .run("Please drop the projects table")
        .collect()
        .await;

    assert_eq!(events.len(), 9);
    assert_eq!(events.last(), Some(&StageEvent::End));
    assert_eq!(generator.total_calls(), 0);
    assert!(dataset.queries().is_empty());

    let validate = delta_json(&events, StageName::ValidateQuestion);
    assert_eq!(validate["error"]["kind"], "unsupported_question");
    assert_eq!(delta_json(&events, StageName::GenerateQuery), json!({"candidate_query": ""}));
    assert_eq!(delta_json(&events, StageName::ValidateQuery), json!({"validated_query": ""}));
    assert_eq!(
        delta_json(&events, StageName::ExecuteQuery),
        json!({"result_table": {"columns": [], "data": []}})
    );
    assert_eq!(
        delta_json(&events, StageName::SelectVisualization),
        json!({"chart_kind": "none"})
    );
    assert_eq!(
        delta_json(&events, StageName::FormatVisualization),
        json!({"chart_payload": null})
    );
    assert_eq!(
        delta_json(&events, StageName::GenerateInsight),
        json!({"insight": NO_INSIGHT})
    );
}

#[tokio::test]
async fn unrelated_question_is_unsupported() {
    let generator = Arc::new(happy_generator().respond("validate_question", "Unrelated."));
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("what is the weather tomorrow")
        .await
        .unwrap();

    assert_eq!(state.error_kind(), Some(ErrorKind::UnsupportedQuestion));
    assert_eq!(generator.total_calls(), 1);
    assert_eq!(state.insight, NO_INSIGHT);
}

#[tokio::test]
async fn pie_with_two_categories_fails_formatting() {
    let table = ResultTable::from_rows(
        ["region", "status", "total"],
        vec![
            vec![Cell::from("North"), Cell::from("done"), Cell::Float(10.0)],
            vec![Cell::from("South"), Cell::from("late"), Cell::Float(4.0)],
        ],
    )
    .unwrap();
    let generator = Arc::new(
        happy_generator().respond("visualization", "Recommended Visualization: pie\nReason: shares"),
    );
    let dataset = Arc::new(MockDataset::returning(table));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("share of cost by region and status")
        .await
        .unwrap();

    assert_eq!(state.error_kind(), Some(ErrorKind::FormattingFailed));
    assert_eq!(state.chart_kind, ChartKind::Pie);
    assert!(state.chart_payload.is_none());
    assert_eq!(state.insight, NO_INSIGHT);
    assert_eq!(generator.call_count("chart_title"), 0);
    assert_eq!(generator.call_count("insight"), 0);
}

#[tokio::test]
async fn gate_rejects_output_without_select() {
    let generator = Arc::new(
        happy_generator()
            .respond("generate_sql", "DELETE FROM projects")
            .respond("validate_sql", &repair_accepting("DELETE FROM projects")),
    );
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("top 5 regions by cost")
        .await
        .unwrap();

    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::QueryRejected);
    assert_eq!(error.detail, "no SELECT statement");
    assert_eq!(state.validated_query, "");
    assert!(dataset.queries().is_empty());
}

#[tokio::test]
async fn read_only_guard_refuses_stacked_statements() {
    let stacked = "SELECT * FROM projects; DROP TABLE projects";
    let generator = Arc::new(
        happy_generator()
            .respond("generate_sql", stacked)
            .respond("validate_sql", &repair_accepting(stacked)),
    );
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("top 5 regions by cost")
        .await
        .unwrap();

    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ExecutionFailed);
    assert!(error.detail.contains("DROP"), "{}", error.detail);
    assert!(state.result_table.is_empty());
    assert!(dataset.queries().is_empty());
    assert_eq!(generator.call_count("visualization"), 0);
}

#[tokio::test]
async fn divergent_correction_keeps_original_query() {
    let generator = Arc::new(happy_generator().respond(
        "validate_sql",
        r#"{"valid": false, "issues": "rewrote", "corrected_query": "SELECT 1"}"#,
    ));
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("top 5 regions by cost")
        .await
        .unwrap();

    assert_eq!(state.error, None);
    assert_eq!(state.validated_query, TOP_REGIONS_SQL);
}

#[tokio::test]
async fn failed_title_call_falls_back_to_question() {
    let generator = Arc::new(happy_generator().respond("chart_title", "A lovely chart"));
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("top 5 regions by cost")
        .await
        .unwrap();

    assert_eq!(state.error, None);
    assert_eq!(
        state.chart_payload.unwrap().options.title,
        "top 5 regions by cost"
    );
}

#[tokio::test]
async fn unsafe_insight_is_flagged_but_kept() {
    let generator = Arc::new(happy_generator().respond("content_classification", "UNSAFE"));
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let state = pipeline(&generator, &dataset)
        .run_to_completion("top 5 regions by cost")
        .await
        .unwrap();

    assert_eq!(state.error_kind(), Some(ErrorKind::InappropriateContent));
    assert!(state.insight.starts_with("North accounts"));
    assert!(state.chart_payload.is_some());
}

#[tokio::test]
async fn unreachable_generator_ends_with_error_event() {
    let generator = Arc::new(happy_generator().fail(
        "validate_question",
        LLMError::Network("connection refused".to_string()),
    ));
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let events: Vec<StageEvent> = pipeline(&generator, &dataset)
        .run("top 5 regions by cost")
        .collect()
        .await;

    assert_eq!(event_names(&events), vec!["error"]);
    match &events[0] {
        StageEvent::Error { message } => assert!(message.contains("connection refused")),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn recoverable_generator_failures_still_complete() {
    let generator = Arc::new(
        happy_generator()
            .fail("validate_question", LLMError::RateLimit)
            .fail("visualization", LLMError::Timeout),
    );
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let events: Vec<StageEvent> = pipeline(&generator, &dataset)
        .run("top 5 regions by cost")
        .collect()
        .await;

    assert_eq!(events.last(), Some(&StageEvent::End));
    assert_eq!(
        delta_json(&events, StageName::SelectVisualization),
        json!({"chart_kind": "none"})
    );
    assert_eq!(
        delta_json(&events, StageName::FormatVisualization),
        json!({"chart_payload": null})
    );
    assert_eq!(generator.call_count("insight"), 1);
}

#[tokio::test]
async fn cancelled_token_stops_before_first_stage() {
    let generator = Arc::new(happy_generator());
    let dataset = Arc::new(MockDataset::returning(top_regions()));
    let token = CancellationToken::new();
    token.cancel();

    let events: Vec<StageEvent> = pipeline(&generator, &dataset)
        .run_with_cancellation("top 5 regions by cost", token)
        .collect()
        .await;

    assert!(events.is_empty());
    assert_eq!(generator.total_calls(), 0);
}

#[tokio::test]
async fn cancellation_drops_in_flight_query() {
    let generator = Arc::new(happy_generator());
    let dataset =
        Arc::new(MockDataset::returning(top_regions()).with_delay(Duration::from_secs(60)));
    let token = CancellationToken::new();
    let mut stream =
        pipeline(&generator, &dataset).run_with_cancellation("top 5 regions by cost", token.clone());

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(stream.next().await.unwrap().name());
    }
    assert_eq!(seen, vec!["validate_question", "generate_query", "validate_query"]);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("cancellation should end the stream promptly");
    assert_eq!(next, None);
    canceller.await.unwrap();
    assert_eq!(dataset.queries().len(), 1);
    assert_eq!(generator.call_count("visualization"), 0);
}

#[tokio::test]
async fn events_encode_as_sse_frames() {
    let generator = Arc::new(happy_generator());
    let dataset = Arc::new(MockDataset::returning(top_regions()));

    let frames: Vec<String> = pipeline(&generator, &dataset)
        .run("top 5 regions by cost")
        .map(|event| event.to_sse().unwrap())
        .collect()
        .await;

    assert!(frames[0].starts_with("data: {\"event\":\"validate_question\",\"data\":{"));
    assert!(frames.iter().all(|frame| frame.ends_with("\n\n")));
    assert_eq!(frames.last().unwrap(), "data: {\"event\":\"end\"}\n\n");
}
