use crate::dataset::Split;

/// Errors raised while loading data, configuring or running the benchmark.
#[derive(Debug, thiserror::Error)]
pub enum OrangeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read NPZ archive: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    #[error("Failed to write NPZ archive: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    #[error("Archive has no array named {0:?}")]
    MissingArray(String),

    #[error("Failed to parse config {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed record at row {row}: {message}")]
    MalformedRecord { row: usize, message: String },

    #[error("Invalid label {0} (expected -1 or +1)")]
    InvalidLabel(f64),

    #[error("Feature width mismatch: expected {expected}, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("Length mismatch: {what} has {got} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Replicate {replicate} has an empty {split} partition")]
    EmptyPartition { replicate: usize, split: Split },

    #[error("Cannot fit a classifier on empty input")]
    EmptyInput,

    #[error("Singular least-squares system in {0}")]
    SingularSystem(&'static str),

    #[error("Chart rendering failed: {0}")]
    Chart(String),
}

pub type Result<T> = std::result::Result<T, OrangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrangeError::EmptyPartition {
            replicate: 7,
            split: Split::Test,
        };
        assert_eq!(err.to_string(), "Replicate 7 has an empty test partition");

        let err = OrangeError::FeatureMismatch {
            expected: 4,
            got: 10,
        };
        assert_eq!(err.to_string(), "Feature width mismatch: expected 4, got 10");

        let err = OrangeError::InvalidLabel(0.5);
        assert_eq!(err.to_string(), "Invalid label 0.5 (expected -1 or +1)");

        let err = OrangeError::MissingArray("six_noise".to_string());
        assert_eq!(err.to_string(), "Archive has no array named \"six_noise\"");
    }
}
