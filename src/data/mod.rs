//! Dataset loading: CSV ratings, LibSVM files and tag side information

pub mod libsvm;
pub mod ratings;
pub mod side;

pub use self::libsvm::*;
pub use self::ratings::*;
pub use self::side::*;
