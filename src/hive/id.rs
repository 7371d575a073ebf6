//! Cell ID generation and resolution (spec §6).
//!
//! Shape: `<project-slug>-<base36-epoch-suffix>-<random-hash>`, matching
//! `/^[a-z0-9][a-z0-9-]*-[0-9a-z]{6,}-[0-9a-z]{6,}$/`.

use crate::error::{Error, Result};
use sqlx::{Sqlite, Transaction};

pub fn generate(project_slug: &str) -> String {
    let mut epoch_suffix = to_base36(chrono::Utc::now().timestamp() as u64);
    while epoch_suffix.len() < 6 {
        epoch_suffix.insert(0, '0');
    }
    let hash = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{project_slug}-{epoch_suffix}-{hash}")
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_else(|_| "0".to_string())
}

/// Resolve a full id, hash-only suffix, or any unambiguous substring to
/// exactly one cell id in this project. Ambiguous matches return
/// `Error::AmbiguousId` with every candidate.
pub async fn resolve(tx: &mut Transaction<'_, Sqlite>, project_key: &str, fragment: &str) -> Result<String> {
    let exact: Option<String> = sqlx::query_scalar("SELECT id FROM cells WHERE project_key = ? AND id = ?")
        .bind(project_key)
        .bind(fragment)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.resolve_id", e.to_string()))?;
    if let Some(id) = exact {
        return Ok(id);
    }

    let pattern = format!("%{fragment}%");
    let candidates: Vec<String> = sqlx::query_scalar("SELECT id FROM cells WHERE project_key = ? AND id LIKE ?")
        .bind(project_key)
        .bind(&pattern)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.resolve_id", e.to_string()))?;

    match candidates.len() {
        0 => Err(Error::not_found("hive.resolve_id", "no cell matches id fragment", fragment)),
        1 => Ok(candidates.into_iter().next().unwrap()),
        _ => Err(Error::AmbiguousId {
            operation: "hive.resolve_id",
            fragment: fragment.to_string(),
            candidates,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_base36_is_lowercase_alnum() {
        let s = to_base36(123_456_789);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn generate_matches_expected_shape() {
        let id = generate("swarmmail");
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "swarmmail");
        assert!(parts[2].len() >= 6);
    }
}
