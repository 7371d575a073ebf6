//! Cycle prevention for the dependency graph (spec §4.6).
//!
//! The DAG property is checked across *all* relationship kinds combined,
//! not just `blocks`: before accepting edge `(from -> to, rel)`, a
//! depth-bounded reachability search from `to` must not find `from`.

use crate::error::{Error, Result};
use sqlx::{Sqlite, Transaction};
use std::collections::{HashSet, VecDeque};

const DEPTH_LIMIT: usize = 1000;

/// Returns `Ok(())` if adding `from -> to` would not create a cycle,
/// otherwise `Err(Error::Cycle)` carrying the discovered path
/// `to -> ... -> from -> to` for the caller's diagnostic.
pub async fn check(tx: &mut Transaction<'_, Sqlite>, operation: &'static str, from: &str, to: &str) -> Result<()> {
    if from == to {
        return Err(Error::Cycle { operation, path: vec![from.to_string(), to.to_string()] });
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    // parent map to reconstruct the path once `from` is found reachable from `to`.
    let mut parent: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    queue.push_back((to.to_string(), 0usize));
    seen.insert(to.to_string());

    while let Some((current, depth)) = queue.pop_front() {
        if current == from {
            // `chain` runs to -> ... -> from (the existing path that would
            // close the cycle); prepend `from` so the reported path reads
            // as the new edge's source first: from -> to -> ... -> from.
            let mut chain = vec![from.to_string()];
            let mut cursor = from.to_string();
            while let Some(p) = parent.get(&cursor) {
                chain.push(p.clone());
                cursor = p.clone();
            }
            chain.reverse();
            let mut path = vec![from.to_string()];
            path.extend(chain);
            return Err(Error::Cycle { operation, path });
        }
        if depth >= DEPTH_LIMIT {
            continue;
        }
        let neighbors: Vec<String> =
            sqlx::query_scalar("SELECT depends_on_id FROM dependencies WHERE cell_id = ?")
                .bind(&current)
                .fetch_all(&mut **tx)
                .await
                .map_err(|e| Error::io("hive.cycle_check", e.to_string()))?;

        for next in neighbors {
            if seen.insert(next.clone()) {
                parent.insert(next.clone(), current.clone());
                queue.push_back((next, depth + 1));
            }
        }
    }
    Ok(())
}
