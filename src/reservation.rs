//! File-path reservations with TTL, conflict detection, and admin release
//! paths (spec §4.5).

use crate::domain::models::{EventType, NewEvent, ReserveOutcome, Reservation};
use crate::error::{Error, ReservationConflict, Result};
use crate::event_log::EventLog;
use crate::store::Store;
use serde_json::json;
use sqlx::Row;

pub struct ReservationMgr<'a> {
    store: &'a Store,
    project_key: String,
    default_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct ReserveOptions {
    pub reason: Option<String>,
    pub exclusive: bool,
    pub ttl_seconds: i64,
}

impl Default for ReserveOptions {
    fn default() -> Self {
        Self { reason: None, exclusive: true, ttl_seconds: 3600 }
    }
}

impl<'a> ReservationMgr<'a> {
    pub fn new(store: &'a Store, project_key: impl Into<String>, default_ttl_seconds: i64) -> Self {
        Self { store, project_key: project_key.into(), default_ttl_seconds }
    }

    /// Atomic: every requested path is granted, or none are. Expired
    /// reservations are swept (self-healed) within the same transaction
    /// before conflicts are computed.
    #[tracing::instrument(skip(self, paths))]
    pub async fn reserve(&self, agent: &str, paths: &[String], options: ReserveOptions) -> Result<ReserveOutcome> {
        if paths.is_empty() {
            return Err(Error::validation("reservation.reserve", "at least one path is required"));
        }

        let mut tx = self.store.transaction().await?;
        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE reservations SET released_at = ? WHERE project_key = ? AND released_at IS NULL AND expires_at < ?",
        )
        .bind(now.to_rfc3339())
        .bind(&self.project_key)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::io("reservation.reserve", e.to_string()))?;

        let active: Vec<(String, String, bool, String, String)> = sqlx::query_as(
            "SELECT id, agent_name, exclusive, path_pattern, expires_at FROM reservations WHERE project_key = ? AND released_at IS NULL",
        )
        .bind(&self.project_key)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| Error::io("reservation.reserve", e.to_string()))?;

        let mut conflicts = Vec::new();
        for path in paths {
            let mut holders = Vec::new();
            let mut expires_at = now;
            for (_, holder, existing_exclusive, pattern, expires) in &active {
                if holder == agent {
                    continue;
                }
                if !(*existing_exclusive || options.exclusive) {
                    continue;
                }
                if patterns_intersect(path, pattern) {
                    holders.push(holder.clone());
                    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(expires) {
                        expires_at = expires_at.max(dt.with_timezone(&chrono::Utc));
                    }
                }
            }
            if !holders.is_empty() {
                conflicts.push(ReservationConflict { path: path.clone(), holders, expires_at });
            }
        }

        if !conflicts.is_empty() {
            tx.commit().await.map_err(|e| Error::io("reservation.reserve", e.to_string()))?;
            return Ok(ReserveOutcome { granted: Vec::new(), conflicts });
        }
        tx.commit().await.map_err(|e| Error::io("reservation.reserve", e.to_string()))?;

        let ttl = if options.ttl_seconds > 0 { options.ttl_seconds } else { self.default_ttl_seconds };
        let expires_at = now + chrono::Duration::seconds(ttl);

        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::FileReserved,
            json!({
                "agent_name": agent,
                "paths": paths,
                "exclusive": options.exclusive,
                "ttl_seconds": ttl,
                "expires_at": expires_at.to_rfc3339(),
                "reason": options.reason,
            }),
        ))
        .await?;

        let granted = self
            .active_for()
            .await?
            .into_iter()
            .filter(|r| r.agent_name == agent && paths.contains(&r.path_pattern))
            .collect();

        Ok(ReserveOutcome { granted, conflicts: Vec::new() })
    }

    /// Agent-scoped release. With both `paths` and `reservation_ids` empty,
    /// releases all of the agent's own active reservations.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, agent: &str, paths: Option<&[String]>, reservation_ids: Option<&[String]>) -> Result<()> {
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::FileReleased,
            json!({
                "agent_name": agent,
                "paths": paths,
                "reservation_ids": reservation_ids,
            }),
        ))
        .await?;
        Ok(())
    }

    /// Admin path: release every active reservation in the project,
    /// recorded with `release_all=true` for audit.
    #[tracing::instrument(skip(self))]
    pub async fn release_all(&self, actor: &str) -> Result<()> {
        self.audit(actor, "release_all", None).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::FileReleased,
            json!({ "agent_name": actor, "release_all": true }),
        ))
        .await?;
        Ok(())
    }

    /// Admin path: release a specific agent's reservations on another
    /// actor's behalf, recorded with `target_agent` for audit.
    #[tracing::instrument(skip(self))]
    pub async fn release_agent(&self, actor: &str, target: &str) -> Result<()> {
        self.audit(actor, "release_agent", Some(target)).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::FileReleased,
            json!({ "agent_name": actor, "release_all": true, "target_agent": target }),
        ))
        .await?;
        Ok(())
    }

    /// All currently active (unreleased, unexpired) reservations in this
    /// project.
    pub async fn active_for(&self) -> Result<Vec<Reservation>> {
        let now = chrono::Utc::now().to_rfc3339();
        let rows = sqlx::query(
            "SELECT id, project_key, agent_name, path_pattern, exclusive, reason, created_at, expires_at, released_at FROM reservations WHERE project_key = ? AND released_at IS NULL AND expires_at > ?",
        )
        .bind(&self.project_key)
        .bind(&now)
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::io("reservation.active_for", e.to_string()))?;
        rows.iter().map(row_to_reservation).collect()
    }

    pub async fn conflicts_for(&self, paths: &[String], exclude_agent: Option<&str>) -> Result<Vec<ReservationConflict>> {
        let active = self.active_for().await?;
        let mut conflicts = Vec::new();
        for path in paths {
            let holders: Vec<String> = active
                .iter()
                .filter(|r| exclude_agent != Some(r.agent_name.as_str()))
                .filter(|r| patterns_intersect(path, &r.path_pattern))
                .map(|r| r.agent_name.clone())
                .collect();
            if !holders.is_empty() {
                let expires_at = active
                    .iter()
                    .filter(|r| holders.contains(&r.agent_name))
                    .map(|r| r.expires_at)
                    .max()
                    .unwrap_or_else(chrono::Utc::now);
                conflicts.push(ReservationConflict { path: path.clone(), holders, expires_at });
            }
        }
        Ok(conflicts)
    }

    async fn audit(&self, actor: &str, action: &str, target: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (project_key, actor, action, target, detail, created_at) VALUES (?, ?, ?, ?, '{}', ?)",
        )
        .bind(&self.project_key)
        .bind(actor)
        .bind(action)
        .bind(target)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await
        .map_err(|e| Error::io("reservation.audit", e.to_string()))?;
        Ok(())
    }
}

fn row_to_reservation(row: &sqlx::sqlite::SqliteRow) -> Result<Reservation> {
    Ok(Reservation {
        id: row.try_get("id").map_err(|e| Error::io("reservation", e.to_string()))?,
        project_key: row.try_get("project_key").map_err(|e| Error::io("reservation", e.to_string()))?,
        agent_name: row.try_get("agent_name").map_err(|e| Error::io("reservation", e.to_string()))?,
        path_pattern: row.try_get("path_pattern").map_err(|e| Error::io("reservation", e.to_string()))?,
        exclusive: row.try_get::<i64, _>("exclusive").map_err(|e| Error::io("reservation", e.to_string()))? != 0,
        reason: row.try_get("reason").map_err(|e| Error::io("reservation", e.to_string()))?,
        created_at: parse_ts(row, "created_at")?,
        expires_at: parse_ts(row, "expires_at")?,
        released_at: row
            .try_get::<Option<String>, _>("released_at")
            .map_err(|e| Error::io("reservation", e.to_string()))?
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc)),
    })
}

fn parse_ts(row: &sqlx::sqlite::SqliteRow, column: &'static str) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row.try_get(column).map_err(|e| Error::io("reservation", e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::io("reservation", format!("parsing {column}: {e}")))
}

/// Two glob-like path patterns intersect iff some literal path could match
/// both. Compared segment-by-segment (`/`-delimited); `**` matches any
/// remaining depth, `*` and partial wildcards (`*.ts`) use the `glob`
/// crate's own pattern matcher for the segment comparison.
pub fn patterns_intersect(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let a_segs: Vec<&str> = a.split('/').collect();
    let b_segs: Vec<&str> = b.split('/').collect();
    segments_intersect(&a_segs, &b_segs)
}

fn segments_intersect(a: &[&str], b: &[&str]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(&"**"), _) | (_, Some(&"**")) => true,
        (Some(sa), Some(sb)) => segment_matches(sa, sb) && segments_intersect(&a[1..], &b[1..]),
    }
}

fn segment_matches(sa: &str, sb: &str) -> bool {
    if sa == "*" || sb == "*" || sa == sb {
        return true;
    }
    if let Ok(pattern) = glob::Pattern::new(sa) {
        if pattern.matches(sb) {
            return true;
        }
    }
    if let Ok(pattern) = glob::Pattern::new(sb) {
        if pattern.matches(sa) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_paths_intersect_only_when_equal() {
        assert!(patterns_intersect("src/auth/login.ts", "src/auth/login.ts"));
        assert!(!patterns_intersect("src/auth/login.ts", "src/auth/logout.ts"));
    }

    #[test]
    fn glob_intersects_with_concrete_path() {
        assert!(patterns_intersect("src/auth/**", "src/auth/login.ts"));
        assert!(!patterns_intersect("src/auth/**", "src/payments/login.ts"));
    }

    #[test]
    fn single_star_segment_matches_anything_at_that_depth() {
        assert!(patterns_intersect("src/*/login.ts", "src/auth/login.ts"));
        assert!(!patterns_intersect("src/*/login.ts", "src/auth/logout.ts"));
    }

    #[test]
    fn extension_glob_intersects_matching_file() {
        assert!(patterns_intersect("src/auth/*.ts", "src/auth/login.ts"));
        assert!(!patterns_intersect("src/auth/*.ts", "src/auth/login.rs"));
    }
}
