//! Utility functions shared by the recommendation models

use crate::core::{Dimensions, Pair, RatingSet, Result, UserParameters, ZeroError};

/// Wall-clock phase timing
pub mod timing {
    use log::debug;
    use std::time::{Duration, Instant};

    /// Records the duration of consecutive training phases
    ///
    /// Every call to [`Chrono::save`] logs the time elapsed since the previous
    /// call (or since creation) at debug level.
    #[derive(Debug, Clone)]
    pub struct Chrono {
        start: Instant,
        last: Instant,
        phases: Vec<(String, Duration)>,
    }

    impl Default for Chrono {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Chrono {
        pub fn new() -> Self {
            let now = Instant::now();
            Self {
                start: now,
                last: now,
                phases: Vec::new(),
            }
        }

        /// Close the current phase under `label`
        pub fn save(&mut self, label: &str) -> Duration {
            let now = Instant::now();
            let elapsed = now - self.last;
            debug!("{label}: {:.3}s", elapsed.as_secs_f64());
            self.phases.push((label.to_string(), elapsed));
            self.last = now;
            elapsed
        }

        pub fn phases(&self) -> &[(String, Duration)] {
            &self.phases
        }

        /// Time since creation
        pub fn total(&self) -> Duration {
            self.start.elapsed()
        }
    }
}

/// Input validation shared by the models
pub mod validation {
    use super::*;

    /// Fail on the first pair outside `dims`
    pub fn check_pairs(dims: Dimensions, pairs: &[Pair]) -> Result<()> {
        pairs.iter().try_for_each(|&pair| dims.check_pair(pair))
    }

    /// Check the arguments of a cold-start fit
    pub fn check_single_user(
        dims: Dimensions,
        rated_items: &[usize],
        ratings: &[f64],
    ) -> Result<()> {
        if rated_items.len() != ratings.len() {
            return Err(ZeroError::DimensionMismatch {
                expected: rated_items.len(),
                actual: ratings.len(),
            });
        }
        rated_items
            .iter()
            .try_for_each(|&item| dims.check_item(item))
    }

    pub fn check_items(dims: Dimensions, item_ids: &[usize]) -> Result<()> {
        item_ids.iter().try_for_each(|&item| dims.check_item(item))
    }

    /// Offset and latent vector of a cold-start user
    ///
    /// `expected_rank` is the latent dimension of the model; any other length,
    /// or neighbor parameters, are rejected with an error naming `model`.
    pub fn latent_parameters<'a>(
        parameters: &'a UserParameters,
        expected_rank: usize,
        model: &str,
    ) -> Result<(f64, &'a [f64])> {
        match parameters {
            UserParameters::Latent { offset, factors } if factors.len() == expected_rank => {
                Ok((*offset, factors.as_slice()))
            }
            UserParameters::Latent { factors, .. } => Err(ZeroError::InvalidParameter(format!(
                "{model} expects {expected_rank} latent factors, got {}",
                factors.len()
            ))),
            UserParameters::Neighbors(_) => Err(ZeroError::InvalidParameter(format!(
                "{model} expects latent user parameters, got a neighbor list"
            ))),
        }
    }
}

/// Summary statistics
pub mod stats {
    use super::*;

    /// Arithmetic mean, 0 for an empty slice
    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Shape and value summary of a rating set
    #[derive(Debug, Clone, PartialEq)]
    pub struct RatingStats {
        pub nb_ratings: usize,
        pub nb_users: usize,
        pub nb_works: usize,
        /// Share of the user × item matrix that is rated
        pub density: f64,
        pub mean_rating: f64,
        pub min_rating: f64,
        pub max_rating: f64,
    }

    /// Summarise `ratings` within `dims`
    pub fn rating_stats(ratings: &RatingSet, dims: Dimensions) -> RatingStats {
        let values = ratings.values();
        let cells = dims.nb_users * dims.nb_works;
        RatingStats {
            nb_ratings: values.len(),
            nb_users: dims.nb_users,
            nb_works: dims.nb_works,
            density: if cells == 0 {
                0.0
            } else {
                values.len() as f64 / cells as f64
            },
            mean_rating: mean(&values),
            min_rating: values.iter().copied().fold(f64::INFINITY, f64::min),
            max_rating: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rating;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_of_empty_is_zero() {
        assert_eq!(stats::mean(&[]), 0.0);
        assert_relative_eq!(stats::mean(&[1.0, 2.0, 4.5]), 2.5);
    }

    #[test]
    fn test_rating_stats() {
        let ratings: RatingSet = vec![
            Rating::new(0, 0, 1.0),
            Rating::new(0, 2, 3.0),
            Rating::new(1, 1, 5.0),
        ]
        .into_iter()
        .collect();
        let stats = stats::rating_stats(&ratings, Dimensions::new(2, 3));
        assert_eq!(stats.nb_ratings, 3);
        assert_relative_eq!(stats.density, 0.5);
        assert_relative_eq!(stats.mean_rating, 3.0);
        assert_eq!(stats.min_rating, 1.0);
        assert_eq!(stats.max_rating, 5.0);
    }

    #[test]
    fn test_single_user_validation() {
        let dims = Dimensions::new(3, 4);
        assert!(validation::check_single_user(dims, &[0, 3], &[1.0, 2.0]).is_ok());
        assert!(matches!(
            validation::check_single_user(dims, &[0, 4], &[1.0, 2.0]),
            Err(ZeroError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            validation::check_single_user(dims, &[0], &[1.0, 2.0]),
            Err(ZeroError::DimensionMismatch { .. })
        ));
        assert!(validation::check_pairs(dims, &[(2, 3), (0, 0)]).is_ok());
        assert!(validation::check_pairs(dims, &[(3, 0)]).is_err());
    }

    #[test]
    fn test_latent_parameters_shape() {
        let params = UserParameters::Latent {
            offset: 2.0,
            factors: vec![0.5, 0.25],
        };
        let (offset, factors) = validation::latent_parameters(&params, 2, "als-2").unwrap();
        assert_eq!(offset, 2.0);
        assert_eq!(factors, &[0.5, 0.25]);
        assert!(validation::latent_parameters(&params, 3, "als-3").is_err());
        assert!(
            validation::latent_parameters(&UserParameters::Neighbors(vec![1]), 2, "als-2").is_err()
        );
    }

    #[test]
    fn test_chrono_records_phases() {
        let mut chrono = timing::Chrono::new();
        chrono.save("first");
        chrono.save("second");
        let labels: Vec<&str> = chrono.phases().iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["first", "second"]);
        assert!(chrono.total() >= chrono.phases()[0].1);
    }
}
