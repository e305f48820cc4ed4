//! Error types for the niix2bids core library.

/// Top-level error enum for the niix2bids core library.
#[derive(Debug, thiserror::Error)]
pub enum NiixError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    #[error("No input: {0}")]
    NoInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type NiixResult<T> = Result<T, NiixError>;

#[cfg(test)]
mod tests {
    use super::NiixError;

    #[test]
    fn test_preflight_message_names_the_check() {
        let err = NiixError::Preflight("no sidecar has \"Modality\"".to_string());
        assert_eq!(
            err.to_string(),
            "Pre-flight check failed: no sidecar has \"Modality\""
        );
    }

    #[test]
    fn test_io_error_converts() {
        fn read_missing() -> Result<String, NiixError> {
            Ok(std::fs::read_to_string("/definitely/not/here.json")?)
        }
        assert!(matches!(read_missing(), Err(NiixError::Io(_))));
    }
}
