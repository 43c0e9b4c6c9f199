use thiserror::Error;

/// Top-level error type for the Sesh system.
///
/// Subsystem crates define their own error types and implement
/// `From<SeshError>` (or wrap it) so that the `?` operator works across
/// crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SeshError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for SeshError {
    fn from(err: toml::de::Error) -> Self {
        SeshError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SeshError {
    fn from(err: toml::ser::Error) -> Self {
        SeshError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SeshError {
    fn from(err: serde_json::Error) -> Self {
        SeshError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Sesh operations.
pub type Result<T> = std::result::Result<T, SeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(SeshError, &str)> = vec![
            (
                SeshError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                SeshError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                SeshError::Serialization("eof".to_string()),
                "Serialization error: eof",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SeshError = io_err.into();
        assert!(matches!(err, SeshError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: SeshError = json_err.into();
        assert!(matches!(err, SeshError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
        let err: SeshError = toml_err.into();
        assert!(matches!(err, SeshError::Config(_)));
    }
}
