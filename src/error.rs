//! Error types for MigrationPilot.

use thiserror::Error;

use crate::parser::ParseError;

/// The main error type for MigrationPilot operations.
#[derive(Debug, Error)]
pub enum PilotError {
    /// The migration could not be parsed. Carries every message the parser
    /// reported; no statement of the file was classified or scored.
    #[error("Parse error: {}", join_messages(.errors))]
    Parse { errors: Vec<ParseError> },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed TOML configuration file.
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed production snapshot.
    #[error("Invalid production snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PilotError {
    /// Create a parse error from the parser's error list.
    pub fn parse(errors: Vec<ParseError>) -> Self {
        Self::Parse { errors }
    }

    /// The parser messages, if this is a parse failure.
    pub fn parse_messages(&self) -> Vec<String> {
        match self {
            Self::Parse { errors } => errors.iter().map(|e| e.to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

fn join_messages(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for MigrationPilot operations.
pub type PilotResult<T> = Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PilotError::parse(vec![
            ParseError::new("syntax error at or near \"SELEC\"", 0, 1),
            ParseError::new("unterminated quoted string", 40, 3),
        ]);
        assert_eq!(
            err.to_string(),
            "Parse error: line 1: syntax error at or near \"SELEC\"; line 3: unterminated quoted string"
        );
        assert_eq!(err.parse_messages().len(), 2);
    }

    #[test]
    fn test_config_error_has_no_parse_messages() {
        let err = PilotError::Config("pg_version must be between 9 and 18".to_string());
        assert!(err.parse_messages().is_empty());
    }
}
