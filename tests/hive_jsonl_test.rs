//! JSONL export/import round-trip idempotence (spec §8 round-trip property).

use swarmmail::domain::models::{CellFilter, CellType, Relationship};
use swarmmail::hive::{Hive, NewCell};
use swarmmail::store::Store;

#[tokio::test]
async fn import_of_its_own_export_creates_and_updates_nothing() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");

    let a = hive
        .create_cell(NewCell { title: "alpha".into(), cell_type: CellType::Feature, priority: Some(1), parent_id: None, description: Some("first".into()), created_by: None })
        .await
        .unwrap()
        .id;
    let b = hive
        .create_cell(NewCell { title: "beta".into(), cell_type: CellType::Bug, priority: Some(2), parent_id: None, description: None, created_by: None })
        .await
        .unwrap()
        .id;
    hive.add_dependency(&b, &a, Relationship::Blocks).await.unwrap();

    let exported = hive.export_jsonl(false, None).await.unwrap();
    assert_eq!(exported.lines().count(), 2);

    let report = hive.import_jsonl(&exported, false, false).await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped, 2);

    let all = hive.query_cells(CellFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2, "re-import must not duplicate rows");
}

#[tokio::test]
async fn dry_run_import_computes_counts_without_writing() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");

    let line = r#"{"id":"proj-abc123-def456","title":"new one","description":null,"status":"open","priority":100,"issue_type":"task","created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z","dependencies":[],"labels":[],"comments":[]}"#;

    let report = hive.import_jsonl(line, true, false).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.created, 1);

    let all = hive.query_cells(CellFilter::default()).await.unwrap();
    assert!(all.is_empty(), "dry run must not write any row");
}

#[tokio::test]
async fn tombstoned_rows_only_export_when_include_deleted() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");

    let a = hive
        .create_cell(NewCell { title: "to delete".into(), cell_type: CellType::Chore, priority: None, parent_id: None, description: None, created_by: None })
        .await
        .unwrap()
        .id;
    hive.delete_cell(&a, "operator", Some("stale")).await.unwrap();

    let without_deleted = hive.export_jsonl(false, None).await.unwrap();
    assert_eq!(without_deleted.lines().count(), 0);

    let with_deleted = hive.export_jsonl(true, None).await.unwrap();
    assert_eq!(with_deleted.lines().count(), 1);
    assert!(with_deleted.contains("\"tombstone\""));
}
