//! Sparse dot products, row normalisation and cosine similarity

use crate::core::{SparseMatrix, SparseVector};

/// Compute dot product between two sparse vectors
///
/// Since both vectors have sorted indices, we can compute this efficiently
/// using a merge-like algorithm in O(nnz(x) + nnz(y)) time.
pub fn dot(x: &SparseVector, y: &SparseVector) -> f64 {
    let mut result = 0.0;
    let mut i = 0;
    let mut j = 0;

    while i < x.indices.len() && j < y.indices.len() {
        let x_idx = x.indices[i];
        let y_idx = y.indices[j];

        if x_idx == y_idx {
            result += x.values[i] * y.values[j];
            i += 1;
            j += 1;
        } else if x_idx < y_idx {
            i += 1;
        } else {
            j += 1;
        }
    }

    result
}

/// Scale a vector to unit L2 norm
///
/// A zero norm is treated as 1, so an all-zero vector comes back unchanged.
pub fn normalize(x: &SparseVector) -> SparseVector {
    let norm = x.norm();
    let norm = if norm == 0.0 { 1.0 } else { norm };
    let mut normalized = x.clone();
    normalized.scale(1.0 / norm);
    normalized
}

/// Normalise every row of a matrix
pub fn normalize_rows(m: &SparseMatrix) -> SparseMatrix {
    let rows = m.rows().iter().map(normalize).collect();
    SparseMatrix::from_rows(rows, m.ncols()).unwrap_or_else(|_| m.clone())
}

/// Cosine similarity of two sparse vectors, 0 if either is all zero
pub fn cosine_similarity(x: &SparseVector, y: &SparseVector) -> f64 {
    dot(&normalize(x), &normalize(y))
}

/// Similarity of an already normalised query against normalised rows
pub fn similarities(query: &SparseVector, normalized_rows: &SparseMatrix) -> Vec<f64> {
    normalized_rows.rows().iter().map(|row| dot(query, row)).collect()
}
