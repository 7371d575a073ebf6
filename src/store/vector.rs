//! Vector similarity backend selection.
//!
//! Prefers the `vec0` SQLite extension (SIMD cosine distance via a virtual
//! table) when it loaded successfully; otherwise falls back to scanning
//! `memories.embedding` BLOBs and computing cosine distance in pure Rust.
//! Either path is transparent to [`crate::semantic_memory::SemanticMemory`].

use crate::error::{Error, Result};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    NativeVec0,
    PureRust,
}

impl VectorBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NativeVec0 => "vec0",
            Self::PureRust => "pure-rust",
        }
    }
}

/// Probe whether `vec0` loaded on this connection by calling its
/// `vec_version()` scalar function. Any failure (function missing,
/// extension absent) means we fall back; this is the only place that
/// distinguishes the two backends.
pub async fn detect(pool: &SqlitePool) -> VectorBackend {
    match sqlx::query_scalar::<_, String>("SELECT vec_version()").fetch_optional(pool).await {
        Ok(Some(version)) => {
            tracing::info!(version = %version, "vec0 extension active");
            VectorBackend::NativeVec0
        }
        _ => {
            tracing::info!("vec0 extension unavailable, using pure-Rust cosine fallback");
            VectorBackend::PureRust
        }
    }
}

/// Create the `vec0` virtual table once we know the extension is loaded.
/// Dimensionality is fixed per the configured embedding model (spec §6
/// `embedding.dim`); the table is created lazily on first use with the
/// dimension baked in, since `vec0` requires it at creation time.
pub async fn ensure_shadow_table(pool: &SqlitePool) -> Result<()> {
    // The dimension-specific table is created on demand by
    // `SemanticMemory::ensure_vector_table`, once the configured dimension
    // is known; nothing to do at Store::open time beyond confirming the
    // extension is present (done in `detect`).
    let _ = pool;
    Ok(())
}

/// Cosine similarity between two equal-length vectors, mapped into
/// `[0, 1]` (spec requires scores in that range; raw cosine similarity is
/// `[-1, 1]`).
pub fn cosine_score(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(Error::validation(
            "vector.cosine_score",
            format!("dimension mismatch: {} vs {}", a.len(), b.len()),
        ));
    }
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok((cosine + 1.0) / 2.0)
}

/// Serialize an `f32` embedding to the little-endian byte layout `vec0`
/// and our pure-Rust fallback both use for the `embedding` BLOB column.
pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_score_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        let score = cosine_score(&v, &v).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_score_opposite_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let score = cosine_score(&a, &b).unwrap();
        assert!(score.abs() < 1e-9);
    }

    #[test]
    fn encode_decode_round_trips() {
        let v = vec![1.5f32, -2.25, 0.0, 3.125];
        let bytes = encode_embedding(&v);
        let decoded = decode_embedding(&bytes);
        assert_eq!(v, decoded);
    }

    #[test]
    fn cosine_score_rejects_mismatched_dimensions() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(cosine_score(&a, &b).is_err());
    }
}
