//! Core type definitions for rating data and model parameters

use crate::core::{Result, ZeroError};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// A `(user_index, item_index)` query pair
pub type Pair = (usize, usize);

/// Matrix dimensions bound to a model before fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub nb_users: usize,
    pub nb_works: usize,
}

impl Dimensions {
    pub fn new(nb_users: usize, nb_works: usize) -> Self {
        Self { nb_users, nb_works }
    }

    /// Check that a pair lies inside the bound dimensions
    pub fn check_pair(&self, (user, item): Pair) -> Result<()> {
        self.check_user(user)?;
        self.check_item(item)
    }

    pub fn check_user(&self, user: usize) -> Result<()> {
        if user >= self.nb_users {
            return Err(ZeroError::IndexOutOfRange {
                kind: "user",
                index: user,
                bound: self.nb_users,
            });
        }
        Ok(())
    }

    pub fn check_item(&self, item: usize) -> Result<()> {
        if item >= self.nb_works {
            return Err(ZeroError::IndexOutOfRange {
                kind: "item",
                index: item,
                bound: self.nb_works,
            });
        }
        Ok(())
    }
}

/// A single observed rating
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user: usize,
    pub item: usize,
    pub rating: f64,
}

impl Rating {
    pub fn new(user: usize, item: usize, rating: f64) -> Self {
        Self { user, item, rating }
    }
}

/// Ordered set of `(user, item, rating)` triplets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingSet {
    ratings: Vec<Rating>,
}

impl RatingSet {
    pub fn new(ratings: Vec<Rating>) -> Self {
        Self { ratings }
    }

    /// Build a rating set from parallel pair and value slices
    pub fn from_pairs(pairs: &[Pair], values: &[f64]) -> Result<Self> {
        if pairs.len() != values.len() {
            return Err(ZeroError::DimensionMismatch {
                expected: pairs.len(),
                actual: values.len(),
            });
        }
        let ratings = pairs
            .iter()
            .zip(values)
            .map(|(&(user, item), &rating)| Rating::new(user, item, rating))
            .collect();
        Ok(Self { ratings })
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rating> {
        self.ratings.iter()
    }

    pub fn as_slice(&self) -> &[Rating] {
        &self.ratings
    }

    pub fn push(&mut self, rating: Rating) {
        self.ratings.push(rating);
    }

    /// The `(user, item)` pairs in order
    pub fn pairs(&self) -> Vec<Pair> {
        self.ratings.iter().map(|r| (r.user, r.item)).collect()
    }

    /// The rating values in order
    pub fn values(&self) -> Vec<f64> {
        self.ratings.iter().map(|r| r.rating).collect()
    }

    /// Largest user and item index plus one
    pub fn infer_dimensions(&self) -> Dimensions {
        let nb_users = self.ratings.iter().map(|r| r.user + 1).max().unwrap_or(0);
        let nb_works = self.ratings.iter().map(|r| r.item + 1).max().unwrap_or(0);
        Dimensions::new(nb_users, nb_works)
    }

    /// Fail if any triplet references an index outside `dims`
    pub fn check_bounds(&self, dims: Dimensions) -> Result<()> {
        self.ratings
            .iter()
            .try_for_each(|r| dims.check_pair((r.user, r.item)))
    }

    /// Build the sparse user × item matrix of this rating set
    pub fn to_matrix(&self, dims: Dimensions) -> Result<SparseMatrix> {
        SparseMatrix::from_triplets(
            dims.nb_users,
            dims.nb_works,
            self.ratings.iter().map(|r| (r.user, r.item, r.rating)),
        )
    }

    /// Split into the first `ratio` share and the rest, keeping order
    pub fn split(&self, ratio: f64) -> Result<(RatingSet, RatingSet)> {
        if ratio <= 0.0 || ratio >= 1.0 {
            return Err(ZeroError::InvalidParameter(format!(
                "Train ratio must be between 0 and 1, got: {ratio}"
            )));
        }
        let train_size = (self.ratings.len() as f64 * ratio) as usize;
        let (train, test) = self.ratings.split_at(train_size);
        Ok((RatingSet::new(train.to_vec()), RatingSet::new(test.to_vec())))
    }
}

impl FromIterator<Rating> for RatingSet {
    fn from_iter<I: IntoIterator<Item = Rating>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Sparse vector representation with sorted indices
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVector {
    /// Sorted indices of non-zero elements
    pub indices: Vec<usize>,
    /// Values corresponding to indices
    pub values: Vec<f64>,
}

impl SparseVector {
    /// Create a new sparse vector, ensuring indices are sorted
    ///
    /// When an index appears more than once the last value wins.
    pub fn new(indices: Vec<usize>, values: Vec<f64>) -> Self {
        assert_eq!(
            indices.len(),
            values.len(),
            "Indices and values must have same length"
        );

        // Stable sort keeps insertion order among duplicates
        let mut pairs: Vec<_> = indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|&(idx, _)| idx);

        let mut deduped: Vec<(usize, f64)> = Vec::with_capacity(pairs.len());
        for (idx, value) in pairs {
            match deduped.last_mut() {
                Some(last) if last.0 == idx => last.1 = value,
                _ => deduped.push((idx, value)),
            }
        }

        let (indices, values): (Vec<_>, Vec<_>) = deduped.into_iter().unzip();
        Self { indices, values }
    }

    /// Create an empty sparse vector
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the value at a specific index (0 if not present)
    pub fn get(&self, index: usize) -> f64 {
        self.find(index).unwrap_or(0.0)
    }

    /// Get the stored value at `index`, distinguishing absence from zero
    pub fn find(&self, index: usize) -> Option<f64> {
        self.indices
            .binary_search(&index)
            .ok()
            .map(|pos| self.values[pos])
    }

    /// Iterate over `(index, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Compute squared L2 norm
    pub fn norm_squared(&self) -> f64 {
        self.values.iter().map(|&v| v * v).sum()
    }

    /// Compute L2 norm
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Sum of stored values
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Mean of stored values, 0 for an empty vector
    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.sum() / self.nnz() as f64
        }
    }

    /// Multiply every stored value by `factor`
    pub fn scale(&mut self, factor: f64) {
        self.values.iter_mut().for_each(|v| *v *= factor);
    }

    /// Number of non-zero elements
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Check if vector is empty
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Row-compressed sparse matrix built from rows of [`SparseVector`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    rows: Vec<SparseVector>,
    ncols: usize,
}

impl SparseMatrix {
    /// An all-zero matrix with no stored entries
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            rows: vec![SparseVector::empty(); nrows],
            ncols,
        }
    }

    /// Build a matrix from `(row, col, value)` triplets
    pub fn from_triplets<I>(nrows: usize, ncols: usize, triplets: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut indices: Vec<Vec<usize>> = vec![Vec::new(); nrows];
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); nrows];

        for (row, col, value) in triplets {
            if row >= nrows {
                return Err(ZeroError::IndexOutOfRange {
                    kind: "row",
                    index: row,
                    bound: nrows,
                });
            }
            if col >= ncols {
                return Err(ZeroError::IndexOutOfRange {
                    kind: "column",
                    index: col,
                    bound: ncols,
                });
            }
            indices[row].push(col);
            values[row].push(value);
        }

        let rows = indices
            .into_iter()
            .zip(values)
            .map(|(idx, val)| SparseVector::new(idx, val))
            .collect();
        Ok(Self { rows, ncols })
    }

    /// Build a matrix from already assembled rows
    pub fn from_rows(rows: Vec<SparseVector>, ncols: usize) -> Result<Self> {
        for row in &rows {
            if let Some(&col) = row.indices.last() {
                if col >= ncols {
                    return Err(ZeroError::IndexOutOfRange {
                        kind: "column",
                        index: col,
                        bound: ncols,
                    });
                }
            }
        }
        Ok(Self { rows, ncols })
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(SparseVector::nnz).sum()
    }

    pub fn row(&self, i: usize) -> &SparseVector {
        &self.rows[i]
    }

    pub fn rows(&self) -> &[SparseVector] {
        &self.rows
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows[row].get(col)
    }

    /// Mean of the stored entries of every row; empty rows get 0
    pub fn row_means(&self) -> Vec<f64> {
        self.rows.iter().map(SparseVector::mean).collect()
    }

    /// Subtract each row's mean from its stored entries only
    ///
    /// Implicit zeros stay zero. Returns the removed means.
    pub fn center_rows(&mut self) -> Vec<f64> {
        let means = self.row_means();
        for (row, &mean) in self.rows.iter_mut().zip(&means) {
            row.values.iter_mut().for_each(|v| *v -= mean);
        }
        means
    }

    /// Subtract per-column means from stored entries only
    ///
    /// The column mean is the column sum divided by `divisor`; a zero divisor
    /// is treated as 1.
    pub fn center_columns(&mut self, divisor: usize) -> Vec<f64> {
        let divisor = divisor.max(1) as f64;
        let means: Vec<f64> = self
            .column_sums()
            .into_iter()
            .map(|sum| sum / divisor)
            .collect();
        for row in &mut self.rows {
            for (&col, value) in row.indices.iter().zip(row.values.iter_mut()) {
                *value -= means[col];
            }
        }
        means
    }

    /// Sum of stored entries per column
    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.ncols];
        for row in &self.rows {
            for (col, value) in row.iter() {
                sums[col] += value;
            }
        }
        sums
    }

    /// Number of stored entries per column
    pub fn column_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.ncols];
        for row in &self.rows {
            for &col in &row.indices {
                counts[col] += 1;
            }
        }
        counts
    }

    /// Transposed copy
    pub fn transpose(&self) -> SparseMatrix {
        let mut indices: Vec<Vec<usize>> = vec![Vec::new(); self.ncols];
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); self.ncols];
        for (r, row) in self.rows.iter().enumerate() {
            for (c, value) in row.iter() {
                indices[c].push(r);
                values[c].push(value);
            }
        }
        let rows = indices
            .into_iter()
            .zip(values)
            .map(|(idx, val)| SparseVector::new(idx, val))
            .collect();
        SparseMatrix {
            rows,
            ncols: self.rows.len(),
        }
    }

    /// Dense product `A · M` where `M` has `ncols` rows
    pub fn mul_dense(&self, m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if m.nrows() != self.ncols {
            return Err(ZeroError::DimensionMismatch {
                expected: self.ncols,
                actual: m.nrows(),
            });
        }
        let mut out = DMatrix::zeros(self.nrows(), m.ncols());
        for (r, row) in self.rows.iter().enumerate() {
            for (c, value) in row.iter() {
                for j in 0..m.ncols() {
                    out[(r, j)] += value * m[(c, j)];
                }
            }
        }
        Ok(out)
    }

    /// Dense product `Aᵀ · M` where `M` has `nrows` rows
    pub fn transpose_mul_dense(&self, m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if m.nrows() != self.nrows() {
            return Err(ZeroError::DimensionMismatch {
                expected: self.nrows(),
                actual: m.nrows(),
            });
        }
        let mut out = DMatrix::zeros(self.ncols, m.ncols());
        for (r, row) in self.rows.iter().enumerate() {
            for (c, value) in row.iter() {
                for j in 0..m.ncols() {
                    out[(c, j)] += value * m[(r, j)];
                }
            }
        }
        Ok(out)
    }
}

/// Parameters of a user absent from the trained model
///
/// Produced by `fit_single_user` and consumed by `predict_single_user` of the
/// same model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserParameters {
    /// A scalar offset (mean or bias) and a latent vector
    Latent { offset: f64, factors: Vec<f64> },
    /// Indices of the trained users closest to the new user
    Neighbors(Vec<usize>),
}

/// A recommended item and its combined score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: usize,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sparse_vector_creation() {
        let indices = vec![2, 0, 4];
        let values = vec![2.0, 1.0, 3.0];
        let sv = SparseVector::new(indices, values);

        // Check that indices are sorted
        assert_eq!(sv.indices, vec![0, 2, 4]);
        assert_eq!(sv.values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_sparse_vector_duplicates_keep_last() {
        let sv = SparseVector::new(vec![3, 1, 3], vec![1.0, 2.0, 5.0]);
        assert_eq!(sv.indices, vec![1, 3]);
        assert_eq!(sv.values, vec![2.0, 5.0]);
    }

    #[test]
    fn test_sparse_vector_get() {
        let sv = SparseVector::new(vec![1, 3, 5], vec![1.0, 2.0, 3.0]);

        assert_eq!(sv.get(0), 0.0);
        assert_eq!(sv.get(1), 1.0);
        assert_eq!(sv.find(3), Some(2.0));
        assert_eq!(sv.find(4), None);
        assert_eq!(sv.get(6), 0.0);
    }

    #[test]
    fn test_sparse_vector_norm_and_mean() {
        let sv = SparseVector::new(vec![0, 1], vec![3.0, 4.0]);
        assert_eq!(sv.norm_squared(), 25.0);
        assert_eq!(sv.norm(), 5.0);
        assert_eq!(sv.mean(), 3.5);
        assert_eq!(SparseVector::empty().mean(), 0.0);
    }

    #[test]
    #[should_panic(expected = "Indices and values must have same length")]
    fn test_sparse_vector_length_mismatch() {
        SparseVector::new(vec![0, 1], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_matrix_from_triplets_rejects_out_of_range() {
        let err = SparseMatrix::from_triplets(2, 2, vec![(0, 0, 1.0), (2, 1, 1.0)]);
        assert!(matches!(
            err,
            Err(ZeroError::IndexOutOfRange { kind: "row", .. })
        ));
    }

    #[test]
    fn test_center_rows_zero_mean_on_stored_entries() {
        let mut m =
            SparseMatrix::from_triplets(3, 4, vec![(0, 0, 4.0), (0, 3, 2.0), (2, 1, 5.0)])
                .unwrap();
        let means = m.center_rows();

        assert_eq!(means, vec![3.0, 0.0, 5.0]);
        for row in m.rows() {
            assert_relative_eq!(row.sum(), 0.0, epsilon = 1e-12);
        }
        // Implicit zeros are untouched
        assert_eq!(m.row(0).nnz(), 2);
        assert_eq!(m.get(0, 1), 0.0);
    }

    #[test]
    fn test_center_columns_uses_divisor() {
        let mut m =
            SparseMatrix::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 0, 4.0), (1, 1, 1.0)])
                .unwrap();
        let means = m.center_columns(2);
        assert_eq!(means, vec![3.0, 0.5]);
        assert_eq!(m.get(0, 0), -1.0);
        assert_eq!(m.get(1, 1), 0.5);
        assert_eq!(m.row(0).nnz(), 1);
    }

    #[test]
    fn test_dense_products() {
        let m = SparseMatrix::from_triplets(2, 3, vec![(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0)])
            .unwrap();
        let dense = DMatrix::from_row_slice(3, 1, &[1.0, 1.0, 1.0]);
        let product = m.mul_dense(&dense).unwrap();
        assert_eq!(product[(0, 0)], 3.0);
        assert_eq!(product[(1, 0)], 3.0);

        let left = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        let product = m.transpose_mul_dense(&left).unwrap();
        assert_eq!(product.as_slice(), &[1.0, 6.0, 2.0]);

        assert!(m.mul_dense(&left).is_err());
    }

    #[test]
    fn test_transpose() {
        let m = SparseMatrix::from_triplets(2, 3, vec![(0, 2, 2.0), (1, 0, 3.0)]).unwrap();
        let t = m.transpose();
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.ncols(), 2);
        assert_eq!(t.get(2, 0), 2.0);
        assert_eq!(t.get(0, 1), 3.0);
        assert_eq!(t.column_counts(), vec![1, 1]);
    }

    #[test]
    fn test_rating_set_split_and_bounds() {
        let set: RatingSet = (0..10).map(|i| Rating::new(i % 3, i % 4, 1.0)).collect();
        let (train, test) = set.split(0.8).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert!(set.split(1.5).is_err());

        assert_eq!(set.infer_dimensions(), Dimensions::new(3, 4));
        assert!(set.check_bounds(Dimensions::new(3, 4)).is_ok());
        assert!(set.check_bounds(Dimensions::new(2, 4)).is_err());
    }
}
