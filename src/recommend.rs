//! Top-k recommendation for a group of users
//!
//! Known users are scored with one batched `predict` over the cross product
//! of users and candidate items; users absent from the trained model are
//! scored from their `fit_single_user` parameters. Rows are combined per item
//! and the `k` best items are returned by descending score. Equal scores are
//! ordered by ascending item id.
//!
//! ```rust,no_run
//! use zero::recommend::RecommendRequest;
//! use zero::{Registry, RecommendationAlgorithm};
//!
//! # fn main() -> zero::Result<()> {
//! let registry = Registry::with_builtin();
//! let mut model = registry.instantiate("svd")?;
//! # let ratings = zero::RatingSet::default();
//! model.set_parameters(100, 50);
//! model.fit(&ratings)?;
//!
//! let top = model.recommend(&RecommendRequest::new().with_users(vec![3, 7]).with_k(10))?;
//! # Ok(())
//! # }
//! ```

use crate::core::{Recommendation, RecommendationAlgorithm, Result, UserParameters, ZeroError};
use crate::linalg::top_k_sorted;
use crate::utils::validation::check_items;
use log::debug;
use std::fmt;
use std::str::FromStr;

/// How predictions of several users are merged into one score per item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombinationMethod {
    #[default]
    Mean,
}

impl fmt::Display for CombinationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinationMethod::Mean => write!(f, "mean"),
        }
    }
}

impl FromStr for CombinationMethod {
    type Err = ZeroError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(CombinationMethod::Mean),
            other => Err(ZeroError::UnsupportedOperation(format!(
                "combination method \"{other}\" (only \"mean\" is available)"
            ))),
        }
    }
}

/// Who to recommend for, among which items, and how many
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendRequest {
    /// Users present in the trained model
    pub user_ids: Option<Vec<usize>>,
    /// Parameters of users absent from it, from `fit_single_user`
    pub extra_users_parameters: Option<Vec<UserParameters>>,
    /// Candidate items, all items when `None`
    pub item_ids: Option<Vec<usize>>,
    /// Number of items to return, all candidates when `None`
    pub k: Option<usize>,
    pub method: String,
}

impl Default for RecommendRequest {
    fn default() -> Self {
        Self {
            user_ids: None,
            extra_users_parameters: None,
            item_ids: None,
            k: None,
            method: CombinationMethod::default().to_string(),
        }
    }
}

impl RecommendRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(mut self, user_ids: Vec<usize>) -> Self {
        self.user_ids = Some(user_ids);
        self
    }

    pub fn with_extra_users(mut self, parameters: Vec<UserParameters>) -> Self {
        self.extra_users_parameters = Some(parameters);
        self
    }

    pub fn with_items(mut self, item_ids: Vec<usize>) -> Self {
        self.item_ids = Some(item_ids);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

/// Mean of each column of equally long rows
fn column_means(rows: &[Vec<f64>], nb_columns: usize) -> Vec<f64> {
    let mut sums = vec![0.0; nb_columns];
    for row in rows {
        for (sum, value) in sums.iter_mut().zip(row) {
            *sum += value;
        }
    }
    let count = rows.len() as f64;
    sums.into_iter().map(|s| s / count).collect()
}

/// Rank candidate items for the users of `request`
///
/// Returns `min(k, |items|)` recommendations, or none when the request names
/// neither known nor extra users.
pub fn recommend<A>(model: &A, request: &RecommendRequest) -> Result<Vec<Recommendation>>
where
    A: RecommendationAlgorithm + ?Sized,
{
    let method: CombinationMethod = request.method.parse()?;
    let dims = model.require_dimensions()?;

    let users = request.user_ids.as_deref().unwrap_or(&[]);
    let extra = request.extra_users_parameters.as_deref().unwrap_or(&[]);
    if users.is_empty() && extra.is_empty() {
        return Ok(Vec::new());
    }

    let items: Vec<usize> = match &request.item_ids {
        Some(items) => {
            check_items(dims, items)?;
            items.clone()
        }
        None => (0..dims.nb_works).collect(),
    };
    let k = request.k.unwrap_or(items.len()).min(items.len());

    let mut rows = Vec::with_capacity(users.len() + extra.len());
    if !users.is_empty() {
        let pairs: Vec<_> = users
            .iter()
            .flat_map(|&user| items.iter().map(move |&item| (user, item)))
            .collect();
        let predictions = model.predict(&pairs)?;
        rows.extend(predictions.chunks(items.len().max(1)).map(<[f64]>::to_vec));
    }
    for parameters in extra {
        rows.push(model.predict_single_user(&items, parameters)?);
    }

    let combined = match method {
        CombinationMethod::Mean => column_means(&rows, items.len()),
    };
    debug!(
        "Combined {} users over {} items, keeping {k}",
        rows.len(),
        items.len()
    );

    Ok(top_k_sorted(&combined, k)
        .into_iter()
        .map(|i| Recommendation {
            item_id: items[i],
            score: combined[i],
        })
        .collect())
}
