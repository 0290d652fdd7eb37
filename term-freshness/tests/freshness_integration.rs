//! End-to-end freshness checks against DataFusion tables.

mod common;

use chrono::{Duration, Utc};
use common::{criteria, hours, node, SourceTable};
use datafusion::prelude::SessionContext;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use term_freshness::criteria::{resolve, FreshnessOverride, TableFreshness};
use term_freshness::evaluator::FreshnessStatus;
use term_freshness::executor::DataFusionExecutor;
use term_freshness::node::FreshnessNode;
use term_freshness::project::SourcesProject;
use term_freshness::report::{FreshnessReport, ReportWriter};
use term_freshness::runner::FreshnessRunner;
use term_freshness::selector::NodeSelector;

fn runner(ctx: SessionContext) -> FreshnessRunner {
    FreshnessRunner::new(Arc::new(DataFusionExecutor::new(ctx)))
}

#[tokio::test]
async fn test_empty_table_is_runtime_error() {
    let ctx = SessionContext::new();
    SourceTable::new("scenario_a").register(&ctx);

    let output = runner(ctx)
        .run(vec![node("scenario_a", criteria(Some(hours(10)), Some(hours(18))))])
        .await
        .unwrap();

    let result = &output.results[0];
    assert_eq!(result.status, FreshnessStatus::RuntimeError);
    assert_eq!(result.max_loaded_at, None);
    assert_eq!(result.max_loaded_at_time_ago_in_s, None);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_stale_table_warns() {
    let ctx = SessionContext::new();
    let mut table = SourceTable::new("scenario_b");
    table.insert(Utc::now() - Duration::hours(12));
    table.register(&ctx);

    let output = runner(ctx)
        .run(vec![node("scenario_b", criteria(Some(hours(10)), Some(hours(18))))])
        .await
        .unwrap();

    let result = &output.results[0];
    assert_eq!(result.status, FreshnessStatus::Warn);
    assert_eq!(result.max_loaded_at, table.last_inserted());
    let age = result.max_loaded_at_time_ago_in_s.unwrap();
    assert!((12.0 * 3_600.0..12.0 * 3_600.0 + 60.0).contains(&age), "age {age}");
}

#[tokio::test]
async fn test_recent_table_passes() {
    let ctx = SessionContext::new();
    let mut table = SourceTable::new("scenario_c");
    table.insert(Utc::now() - Duration::hours(5));
    table.insert(Utc::now() - Duration::hours(2));
    table.register(&ctx);

    let output = runner(ctx)
        .run(vec![node("scenario_c", criteria(Some(hours(10)), Some(hours(18))))])
        .await
        .unwrap();

    assert_eq!(output.results[0].status, FreshnessStatus::Pass);
    assert_eq!(output.results[0].max_loaded_at, table.last_inserted());
}

#[tokio::test]
async fn test_cleared_error_threshold_only_warns() {
    let source = criteria(Some(hours(6)), Some(hours(24)));
    let table_override = TableFreshness::Override(FreshnessOverride::new().clear_error_after());
    let effective = resolve(Some(&source), Some(&table_override))
        .into_criteria()
        .unwrap();
    assert_eq!(effective.error_after, None);

    let ctx = SessionContext::new();
    let mut table = SourceTable::new("scenario_d");
    table.insert(Utc::now() - Duration::hours(30));
    table.register(&ctx);

    let output = runner(ctx)
        .run(vec![node("scenario_d", effective)])
        .await
        .unwrap();
    assert_eq!(output.results[0].status, FreshnessStatus::Warn);
}

#[tokio::test]
async fn test_filter_excludes_rows() {
    let ctx = SessionContext::new();
    let mut table = SourceTable::new("filtered");
    let fresh_id = table.insert(Utc::now() - Duration::hours(1));
    table.insert(Utc::now() - Duration::hours(30));
    table.register(&ctx);

    let unfiltered = node("filtered", criteria(Some(hours(10)), Some(hours(18))));
    let filtered = FreshnessNode::new(
        "source.test.test_source.filtered_view",
        "test_source",
        "filtered_view",
        criteria(Some(hours(10)), Some(hours(18))).with_filter(format!("id <> {fresh_id}")),
    )
    .with_relation("filtered")
    .with_loaded_at_field("updated_at");

    let output = runner(ctx).run(vec![unfiltered, filtered]).await.unwrap();
    assert_eq!(output.results[0].status, FreshnessStatus::Pass);
    assert_eq!(output.results[1].status, FreshnessStatus::Error);
    assert_eq!(
        output.results[1].criteria.filter,
        Some(format!("id <> {fresh_id}"))
    );
}

#[tokio::test]
async fn test_filter_removing_all_rows_is_runtime_error() {
    let ctx = SessionContext::new();
    let mut table = SourceTable::new("all_filtered");
    table.insert(Utc::now());
    table.register(&ctx);

    let node = node(
        "all_filtered",
        criteria(Some(hours(1)), None).with_filter("id < 0"),
    );
    let output = runner(ctx).run(vec![node]).await.unwrap();
    assert_eq!(output.results[0].status, FreshnessStatus::RuntimeError);
}

#[tokio::test]
async fn test_mixed_case_relation() {
    let ctx = SessionContext::new();
    let mut table = SourceTable::new("RawOrders");
    table.insert(Utc::now() - Duration::hours(1));
    table.register(&ctx);

    let output = runner(ctx)
        .run(vec![node("RawOrders", criteria(Some(hours(10)), None))])
        .await
        .unwrap();

    let result = &output.results[0];
    assert_eq!(result.status, FreshnessStatus::Pass, "{:?}", result.error);
    assert_eq!(result.max_loaded_at, table.last_inserted());
    assert_eq!(result.adapter_response["rows_affected"], 1);
}

#[tokio::test]
async fn test_missing_table_does_not_affect_others() {
    let ctx = SessionContext::new();
    let mut table = SourceTable::new("present");
    table.insert(Utc::now());
    table.register(&ctx);

    let output = runner(ctx)
        .run(vec![
            node("absent", criteria(Some(hours(1)), None)),
            node("present", criteria(Some(hours(1)), None)),
        ])
        .await
        .unwrap();

    assert_eq!(output.results[0].status, FreshnessStatus::RuntimeError);
    assert!(output.results[0].error.as_deref().unwrap().contains("absent"));
    assert_eq!(output.results[0].snapshotted_at, None);
    assert_eq!(output.results[1].status, FreshnessStatus::Pass);
}

const OVERRIDE_PROJECT: &str = r#"{
    "name": "test",
    "sources": [
        {"name": "source_a", "loaded_at_field": "updated_at",
         "freshness": {"warn_after": {"count": 10, "period": "hour"}, "error_after": {"count": 18, "period": "hour"}},
         "tables": [{"name": "test_table", "identifier": "source_a_table"}]},
        {"name": "source_b", "loaded_at_field": "updated_at",
         "freshness": {"warn_after": {"count": 10, "period": "hour"}, "error_after": {"count": 18, "period": "hour"}},
         "tables": [{"name": "test_table", "identifier": "source_b_table",
                     "freshness": {"warn_after": {"count": 1, "period": "hour"}}}]},
        {"name": "source_c", "loaded_at_field": "updated_at",
         "freshness": {"warn_after": {"count": 10, "period": "hour"}, "error_after": {"count": 18, "period": "hour"}},
         "tables": [{"name": "test_table", "identifier": "source_c_table",
                     "freshness": {"error_after": null}}]},
        {"name": "source_d", "loaded_at_field": "updated_at",
         "freshness": {"warn_after": {"count": 10, "period": "hour"}, "error_after": {"count": 18, "period": "hour"}},
         "tables": [{"name": "test_table", "identifier": "source_d_table",
                     "freshness": {"error_after": {"count": 3, "period": "day"}}}]},
        {"name": "source_e", "loaded_at_field": "updated_at",
         "freshness": {"warn_after": {"count": 10, "period": "hour"}, "error_after": {"count": 18, "period": "hour"}},
         "tables": [{"name": "test_table", "identifier": "source_e_table", "freshness": null}]}
    ]
}"#;

#[tokio::test]
async fn test_project_overrides() {
    let project = SourcesProject::from_json_str(OVERRIDE_PROJECT).unwrap();
    let plan = project.plan(&NodeSelector::all());
    assert!(plan.errors.is_empty());
    assert_eq!(plan.disabled, vec!["source.test.source_e.test_table"]);

    let ctx = SessionContext::new();
    for source in ["a", "b", "c", "d", "e"] {
        let mut table = SourceTable::new(&format!("source_{source}_table"));
        table.insert(Utc::now() - Duration::hours(20));
        table.register(&ctx);
    }

    let output = runner(ctx).with_threads(2).run(plan.nodes).await.unwrap();
    let statuses: BTreeMap<_, _> = output
        .results
        .iter()
        .map(|r| (r.unique_id.as_str(), r.status))
        .collect();

    assert_eq!(statuses.len(), 4);
    assert_eq!(statuses["source.test.source_a.test_table"], FreshnessStatus::Error);
    assert_eq!(statuses["source.test.source_b.test_table"], FreshnessStatus::Error);
    assert_eq!(statuses["source.test.source_c.test_table"], FreshnessStatus::Warn);
    assert_eq!(statuses["source.test.source_d.test_table"], FreshnessStatus::Warn);

    let source_c = &output.results[2];
    assert_eq!(source_c.criteria.error_after, None);
    assert_eq!(source_c.criteria.warn_after, Some(hours(10)));
}

#[tokio::test]
async fn test_csv_project_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = (Utc::now() - Duration::hours(3)).format("%Y-%m-%dT%H:%M:%S");
    let older = (Utc::now() - Duration::hours(40)).format("%Y-%m-%dT%H:%M:%S");
    std::fs::write(
        dir.path().join("orders.csv"),
        format!("id,updated_at\n1,{older}\n2,{loaded}\n"),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("sources.json"),
        r#"{"name": "shop", "sources": [{
            "name": "raw",
            "loaded_at_field": "updated_at",
            "freshness": {"warn_after": {"count": 12, "period": "hour"}},
            "tables": [
                {"name": "orders", "location": {"path": "orders.csv", "format": "csv"}},
                {"name": "refunds"}
            ]
        }]}"#,
    )
    .unwrap();

    let project = SourcesProject::from_path(dir.path().join("sources.json")).unwrap();
    let plan = project.plan(&NodeSelector::all());
    let ctx = SessionContext::new();
    assert_eq!(project.register_tables(&ctx).await, 1);

    let output = runner(ctx).run(plan.nodes).await.unwrap();
    let report = FreshnessReport::from_run(output, "csv-run", BTreeMap::new());
    assert_eq!(report.results()[0].status, FreshnessStatus::Pass);
    assert_eq!(report.results()[1].status, FreshnessStatus::RuntimeError);
    assert_eq!(report.status(), FreshnessStatus::Error);

    let path = dir.path().join("target").join("sources.json");
    ReportWriter::new().write(&report, &path).unwrap();
    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["metadata"]["invocation_id"], "csv-run");
    assert!(doc["results"][0]["max_loaded_at"]
        .as_str()
        .unwrap()
        .ends_with("+00:00"));
    assert_eq!(doc["results"][1]["status"], "runtime error");
    assert!(doc["results"][1]["max_loaded_at"].is_null());
}

