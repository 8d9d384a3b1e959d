// crates/common/src/error.rs
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Insufficient sample for {statistic}: need {required}, have {actual}")]
    InsufficientSample {
        statistic: String,
        required: usize,
        actual: usize,
    },

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Generator error: {0}")]
    Generator(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Transient failures worth another attempt later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Generator(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(Error::Generator("timeout".into()).is_retryable());
        assert!(!Error::Solver("diverged".into()).is_retryable());
        assert!(!Error::InvalidData("bad column".into()).is_retryable());

        let err = Error::InsufficientSample {
            statistic: "pearson".into(),
            required: 10,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Insufficient sample for pearson: need 10, have 3");
    }
}
