//! CSV rating files
//!
//! Each line holds `user,item,rating` with dense 0-based indices. A first
//! line whose user field is not an integer is treated as a header, and lines
//! starting with `#` are skipped.

use crate::core::{Dimensions, Rating, RatingSet, Result, ZeroError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Ratings loaded from a CSV file, with dimensions inferred from the indices
#[derive(Debug, Clone, PartialEq)]
pub struct RatingsDataset {
    ratings: RatingSet,
    dimensions: Dimensions,
}

impl RatingsDataset {
    /// Load a dataset from a CSV file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load a dataset from a reader
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut ratings = RatingSet::default();
        let mut first = true;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if std::mem::take(&mut first) && Self::is_header_line(line) {
                continue;
            }

            let rating = Self::parse_data_line(line).map_err(|e| {
                ZeroError::ParseError(format!("Error parsing line {}: {}", line_num + 1, e))
            })?;
            ratings.push(rating);
        }

        if ratings.is_empty() {
            return Err(ZeroError::EmptyDataset);
        }

        let dimensions = ratings.infer_dimensions();
        Ok(Self {
            ratings,
            dimensions,
        })
    }

    /// Check if a line appears to be a header
    fn is_header_line(line: &str) -> bool {
        line.split(',')
            .next()
            .is_some_and(|field| field.trim().parse::<usize>().is_err())
    }

    /// Parse a `user,item,rating` line
    fn parse_data_line(line: &str) -> Result<Rating> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        if fields.len() != 3 {
            return Err(ZeroError::ParseError(format!(
                "Expected user,item,rating, got {} fields: {}",
                fields.len(),
                line
            )));
        }

        let user = fields[0]
            .parse::<usize>()
            .map_err(|_| ZeroError::ParseError(format!("Invalid user: {}", fields[0])))?;
        let item = fields[1]
            .parse::<usize>()
            .map_err(|_| ZeroError::ParseError(format!("Invalid item: {}", fields[1])))?;
        let rating = fields[2]
            .parse::<f64>()
            .map_err(|_| ZeroError::ParseError(format!("Invalid rating: {}", fields[2])))?;

        Ok(Rating::new(user, item, rating))
    }

    pub fn ratings(&self) -> &RatingSet {
        &self.ratings
    }

    /// One past the largest user and item index
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Train/test split, shuffled first when a seed is given
    pub fn split(&self, ratio: f64, seed: Option<u64>) -> Result<(RatingSet, RatingSet)> {
        match seed {
            Some(seed) => shuffled(&self.ratings, seed).split(ratio),
            None => self.ratings.split(ratio),
        }
    }
}

/// A copy of `ratings` in a seeded random order
pub fn shuffled(ratings: &RatingSet, seed: u64) -> RatingSet {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut order = ratings.as_slice().to_vec();
    order.shuffle(&mut rng);
    RatingSet::new(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_from_reader_with_header() {
        let data = "user,item,rating\n0,2,4.5\n3,1,1\n";
        let dataset = RatingsDataset::from_reader(Cursor::new(data)).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.dimensions(), Dimensions::new(4, 3));
        assert_eq!(dataset.ratings().as_slice()[0], Rating::new(0, 2, 4.5));
    }

    #[test]
    fn test_from_reader_without_header_and_comments() {
        let data = "# exported ratings\n0, 0, 2\n\n1,1,3\n";
        let dataset = RatingsDataset::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(dataset.ratings().values(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = RatingsDataset::from_reader(Cursor::new("0,0,1\n0,x,1\n")).unwrap_err();
        assert!(err.to_string().contains("line 2"));

        assert!(RatingsDataset::from_reader(Cursor::new("0,0\n")).is_err());
        assert!(RatingsDataset::from_reader(Cursor::new("0,0,bad\n")).is_err());
    }

    #[test]
    fn test_empty_dataset() {
        let result = RatingsDataset::from_reader(Cursor::new("user,item,rating\n"));
        assert!(matches!(result, Err(ZeroError::EmptyDataset)));
    }

    #[test]
    fn test_split_sequential_and_seeded() {
        let data: String = (0..10).map(|i| format!("{i},{i},{i}\n")).collect();
        let dataset = RatingsDataset::from_reader(Cursor::new(data)).unwrap();

        let (train, test) = dataset.split(0.8, None).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.as_slice()[0], Rating::new(8, 8, 8.0));

        let (a, _) = dataset.split(0.8, Some(7)).unwrap();
        let (b, _) = dataset.split(0.8, Some(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }
}
