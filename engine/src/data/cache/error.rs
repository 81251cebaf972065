//! Cache error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = CacheError::Config("max_entries must be greater than zero".to_string());
        assert_eq!(
            err.to_string(),
            "Cache configuration error: max_entries must be greater than zero"
        );
    }
}
