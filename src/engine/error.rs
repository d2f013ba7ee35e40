//! Engine error types
//!
//! Every native client failure is converted into an `EngineError` at the
//! driver boundary. The façade turns these into the error form of a result,
//! so nothing below this type ever reaches a caller as a panic or raw error.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unsupported DB type: {tag}")]
    UnsupportedEngine { tag: String },

    #[error("{message}")]
    ConnectionFailed { message: String },

    #[error("{message}")]
    AuthenticationFailed { message: String },

    #[error("{message}")]
    SyntaxError { message: String },

    #[error("{message}")]
    ExecutionError { message: String },

    #[error("Missing {name}")]
    MissingArgument { name: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn unsupported_engine(tag: impl Into<String>) -> Self {
        Self::UnsupportedEngine { tag: tag.into() }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: message.into(),
        }
    }

    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
        }
    }

    pub fn missing_argument(name: impl Into<String>) -> Self {
        Self::MissingArgument { name: name.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classifies a failure raised while opening a native session.
    pub fn from_connect(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("authentication failed")
            || lower.contains("access denied")
            || lower.contains("login failed")
            || lower.contains("ora-01017")
        {
            Self::auth_failed(message)
        } else {
            Self::connection_failed(message)
        }
    }

    /// Classifies a failure raised while running a statement.
    pub fn from_execute(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("syntax error") || lower.contains("incorrect syntax") {
            Self::syntax_error(message)
        } else {
            Self::execution_error(message)
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::AuthenticationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_engine_message_names_the_tag() {
        let err = EngineError::unsupported_engine("db2");
        assert_eq!(err.to_string(), "Unsupported DB type: db2");
    }

    #[test]
    fn connect_failures_are_split_by_cause() {
        assert!(matches!(
            EngineError::from_connect("password authentication failed for user \"x\""),
            EngineError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            EngineError::from_connect("Connection refused (os error 111)"),
            EngineError::ConnectionFailed { .. }
        ));
        assert!(EngineError::from_connect("Login failed for user 'sa'").is_connection_error());
    }

    #[test]
    fn execute_failures_detect_syntax_errors() {
        assert!(matches!(
            EngineError::from_execute("near \"SELEC\": syntax error"),
            EngineError::SyntaxError { .. }
        ));
        assert!(matches!(
            EngineError::from_execute("no such table: nonexistent_table_xyz"),
            EngineError::ExecutionError { .. }
        ));
    }

    #[test]
    fn native_messages_pass_through_unchanged() {
        let err = EngineError::execution_error("no such table: t");
        assert_eq!(err.to_string(), "no such table: t");
    }
}
