//! JSONL export/import with content-hash based dedup (spec §4.6).

use crate::domain::models::{CellRecord, Comment, DependencyRecord, ImportOutcome, ImportReport};
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, Sqlite, Transaction};

/// SHA-256 of a canonical serialization of the record, including
/// timestamps, so edits to any field (including a touched `updated_at`)
/// change the hash.
pub fn content_hash(record: &CellRecord) -> String {
    let canonical = serde_json::to_string(record).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub async fn export(
    tx: &mut Transaction<'_, Sqlite>,
    project_key: &str,
    include_deleted: bool,
    cell_ids: Option<&[String]>,
) -> Result<String> {
    let mut sql = String::from("SELECT id FROM cells WHERE project_key = ?");
    if !include_deleted {
        sql.push_str(" AND status != 'tombstone'");
    }
    if let Some(ids) = cell_ids {
        if !ids.is_empty() {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            sql.push_str(&format!(" AND id IN ({placeholders})"));
        }
    }
    sql.push_str(" ORDER BY id");

    let mut query = sqlx::query(&sql).bind(project_key);
    if let Some(ids) = cell_ids {
        for id in ids {
            query = query.bind(id);
        }
    }
    let ids: Vec<String> = query
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?
        .into_iter()
        .map(|row| row.try_get::<String, _>("id").unwrap_or_default())
        .collect();

    let mut out = String::new();
    for id in ids {
        let record = load_record(tx, &id).await?;
        out.push_str(&serde_json::to_string(&record)?);
        out.push('\n');
    }
    Ok(out)
}

pub async fn import(
    tx: &mut Transaction<'_, Sqlite>,
    project_key: &str,
    text: &str,
    dry_run: bool,
    skip_existing: bool,
) -> Result<ImportReport> {
    let mut report = ImportReport { dry_run, ..Default::default() };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: CellRecord = serde_json::from_str(line)?;
        let incoming_hash = content_hash(&record);

        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM cells WHERE project_key = ? AND id = ?")
            .bind(project_key)
            .bind(&record.id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;

        match existing {
            None => {
                report.created += 1;
                if !dry_run {
                    write_record(tx, project_key, &record).await?;
                }
            }
            Some(_) if skip_existing => {
                report.skipped += 1;
            }
            Some(_) => {
                let current = load_record(tx, &record.id).await?;
                if content_hash(&current) == incoming_hash {
                    report.skipped += 1;
                } else {
                    report.updated += 1;
                    if !dry_run {
                        write_record(tx, project_key, &record).await?;
                    }
                }
            }
        }
    }
    Ok(report)
}

async fn load_record(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<CellRecord> {
    let row = sqlx::query(
        "SELECT id, title, description, status, priority, cell_type, created_at, updated_at FROM cells WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?;

    let deps: Vec<(String, String)> =
        sqlx::query_as("SELECT depends_on_id, relationship FROM dependencies WHERE cell_id = ? ORDER BY depends_on_id")
            .bind(id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?;

    let labels: Vec<String> = sqlx::query_scalar("SELECT label FROM labels WHERE cell_id = ? ORDER BY label")
        .bind(id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?;

    let comments: Vec<(String, String)> =
        sqlx::query_as("SELECT author, text FROM comments WHERE cell_id = ? ORDER BY id")
            .bind(id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?;

    Ok(CellRecord {
        id: row.try_get("id").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?,
        title: row.try_get("title").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?,
        description: row.try_get("description").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?,
        status: row.try_get("status").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?,
        priority: row.try_get("priority").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?,
        issue_type: row.try_get("cell_type").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?,
        created_at: parse_rfc3339(row.try_get("created_at").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?)?,
        updated_at: parse_rfc3339(row.try_get("updated_at").map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?)?,
        dependencies: deps
            .into_iter()
            .map(|(depends_on_id, relationship)| DependencyRecord { depends_on_id, relationship })
            .collect(),
        labels,
        comments: comments.into_iter().map(|(author, text)| Comment { author, text }).collect(),
    })
}

async fn write_record(tx: &mut Transaction<'_, Sqlite>, project_key: &str, record: &CellRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cells (id, project_key, title, description, cell_type, status, priority, parent_id, created_at, updated_at, deleted_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, NULL)
        ON CONFLICT (id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            cell_type = excluded.cell_type,
            status = excluded.status,
            priority = excluded.priority,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.id)
    .bind(project_key)
    .bind(&record.title)
    .bind(&record.description)
    .bind(&record.issue_type)
    .bind(&record.status)
    .bind(record.priority)
    .bind(record.created_at.to_rfc3339())
    .bind(record.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;

    sqlx::query("DELETE FROM labels WHERE cell_id = ?")
        .bind(&record.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;
    for label in &record.labels {
        sqlx::query("INSERT INTO labels (cell_id, label) VALUES (?, ?)")
            .bind(&record.id)
            .bind(label)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;
    }

    sqlx::query("DELETE FROM comments WHERE cell_id = ?")
        .bind(&record.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;
    for comment in &record.comments {
        sqlx::query("INSERT INTO comments (cell_id, author, text, created_at) VALUES (?, ?, ?, ?)")
            .bind(&record.id)
            .bind(&comment.author)
            .bind(&comment.text)
            .bind(record.updated_at.to_rfc3339())
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;
    }

    for dep in &record.dependencies {
        sqlx::query(
            r#"
            INSERT INTO dependencies (project_key, cell_id, depends_on_id, relationship, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (cell_id, depends_on_id, relationship) DO NOTHING
            "#,
        )
        .bind(project_key)
        .bind(&record.id)
        .bind(&dep.depends_on_id)
        .bind(&dep.relationship)
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;
    }
    Ok(())
}

fn parse_rfc3339(s: String) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::io("hive.export_jsonl", format!("parsing timestamp {s}: {e}")))
}
