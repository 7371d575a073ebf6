//! Maintains the materialized `blocked_cache` table (spec §4.6).
//!
//! Called by the projector on every event that can change a cell's status
//! or dependency edges. Recomputes the affected set (the cell plus its
//! transitive `blocks`-descendants, depth-bounded) and rewrites their
//! cache rows: if an open blocker remains, upsert; otherwise delete.

use crate::error::{Error, Result};
use sqlx::{Sqlite, Transaction};
use std::collections::{HashSet, VecDeque};

/// Default depth bound for transitive descent, per spec §4.6.
pub const DEFAULT_DEPTH_LIMIT: usize = 100;

/// Recompute blocked-cache rows for `cell_id` and everything that
/// transitively depends on it via `blocks` edges (i.e. cells that list
/// `cell_id`, directly or indirectly, as a `depends_on_id`).
pub async fn rebuild_affected(tx: &mut Transaction<'_, Sqlite>, project_key: &str, cell_id: &str) -> Result<()> {
    let affected = transitive_dependents(tx, cell_id, DEFAULT_DEPTH_LIMIT).await?;
    for id in std::iter::once(cell_id.to_string()).chain(affected) {
        rewrite_one(tx, project_key, &id).await?;
    }
    Ok(())
}

/// Recompute every cell in a project. Used by `Hive::rebuild_blocked_cache(None)`.
pub async fn rebuild_all(tx: &mut Transaction<'_, Sqlite>, project_key: &str) -> Result<()> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM cells WHERE project_key = ?")
        .bind(project_key)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.rebuild_blocked_cache", e.to_string()))?;
    for id in ids {
        rewrite_one(tx, project_key, &id).await?;
    }
    Ok(())
}

/// BFS over `blocks` edges pointing at `root` (i.e. rows whose
/// `depends_on_id = root`), bounded by `depth_limit` hops.
async fn transitive_dependents(tx: &mut Transaction<'_, Sqlite>, root: &str, depth_limit: usize) -> Result<HashSet<String>> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((root.to_string(), 0usize));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= depth_limit {
            continue;
        }
        let dependents: Vec<String> = sqlx::query_scalar(
            "SELECT cell_id FROM dependencies WHERE depends_on_id = ? AND relationship = 'blocks'",
        )
        .bind(&current)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.blocked_cache", e.to_string()))?;

        for dependent in dependents {
            if seen.insert(dependent.clone()) {
                queue.push_back((dependent, depth + 1));
            }
        }
    }
    Ok(seen)
}

/// Recompute just one cell's blocked-cache row(s): find every open
/// (non-`closed`, non-`tombstone`) cell reachable from it via `blocks`
/// edges; upsert if any exist, else delete the row entirely.
async fn rewrite_one(tx: &mut Transaction<'_, Sqlite>, project_key: &str, cell_id: &str) -> Result<()> {
    let blockers = open_blockers(tx, cell_id, DEFAULT_DEPTH_LIMIT).await?;

    sqlx::query("DELETE FROM blocked_cache WHERE project_key = ? AND cell_id = ?")
        .bind(project_key)
        .bind(cell_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.blocked_cache", e.to_string()))?;

    for blocker in blockers {
        sqlx::query(
            "INSERT INTO blocked_cache (project_key, cell_id, blocker_id) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(project_key)
        .bind(cell_id)
        .bind(&blocker)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.blocked_cache", e.to_string()))?;
    }
    Ok(())
}

/// Transitive `blocks`-parents of `cell_id` that are still open/blocked
/// (not closed, not tombstoned), bounded by `depth_limit`.
async fn open_blockers(tx: &mut Transaction<'_, Sqlite>, cell_id: &str, depth_limit: usize) -> Result<HashSet<String>> {
    let mut result = HashSet::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((cell_id.to_string(), 0usize));
    seen.insert(cell_id.to_string());

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= depth_limit {
            continue;
        }
        let parents: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT d.depends_on_id, c.status
            FROM dependencies d
            JOIN cells c ON c.id = d.depends_on_id
            WHERE d.cell_id = ? AND d.relationship = 'blocks'
            "#,
        )
        .bind(&current)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.blocked_cache", e.to_string()))?;

        for (parent_id, status) in parents {
            if status != "closed" && status != "tombstone" {
                result.insert(parent_id.clone());
            }
            if seen.insert(parent_id.clone()) {
                queue.push_back((parent_id, depth + 1));
            }
        }
    }
    Ok(result)
}
