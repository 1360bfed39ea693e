//! Page store error types.

use thiserror::Error;

/// Page store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration errors
    InvalidConfiguration,

    // Serialization errors
    NotSerializable,
    CorruptedPageData,
    UnknownPageKind,

    // Integration errors
    UnexpectedObjectType,

    // Storage errors
    Io,
    CorruptedIndex,
    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidConfiguration => "InvalidConfiguration",
            ErrorCode::NotSerializable => "NotSerializable",
            ErrorCode::CorruptedPageData => "CorruptedPageData",
            ErrorCode::UnknownPageKind => "UnknownPageKind",
            ErrorCode::UnexpectedObjectType => "UnexpectedObjectType",
            ErrorCode::Io => "Io",
            ErrorCode::CorruptedIndex => "CorruptedIndex",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidConfiguration => "The page store configuration is invalid.",
            ErrorCode::NotSerializable => "The page object graph could not be serialized.",
            ErrorCode::CorruptedPageData => "The serialized page data is malformed.",
            ErrorCode::UnknownPageKind => "No decoder is registered for the page kind.",
            ErrorCode::UnexpectedObjectType => "Unknown object type.",
            ErrorCode::Io => "An I/O error occurred while accessing the file store.",
            ErrorCode::CorruptedIndex => "The page store index could not be parsed.",
            ErrorCode::InternalError => "The page store encountered an internal error.",
        }
    }

    /// Returns true if the error is caused by the caller's code or setup
    /// rather than by the runtime state of the file store.
    pub fn is_integration_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidConfiguration
                | ErrorCode::NotSerializable
                | ErrorCode::UnknownPageKind
                | ErrorCode::UnexpectedObjectType
        )
    }
}

/// Page store error with code and message.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct PageStoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl PageStoreError {
    /// Creates a new error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
        }
    }

    /// Creates a new error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for a [`ErrorCode::CorruptedPageData`] error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::CorruptedPageData, message)
    }
}

impl From<std::io::Error> for PageStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::with_message(ErrorCode::Io, e.to_string())
    }
}

impl From<serde_json::Error> for PageStoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::with_message(ErrorCode::CorruptedIndex, e.to_string())
    }
}

/// Result type alias for page store operations.
pub type PageStoreResult<T> = Result<T, PageStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_message() {
        let err = PageStoreError::new(ErrorCode::UnexpectedObjectType);
        assert_eq!(err.message, "Unknown object type.");
        assert_eq!(err.to_string(), "UnexpectedObjectType: Unknown object type.");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PageStoreError = io.into();
        assert_eq!(err.code, ErrorCode::Io);
        assert!(!err.code.is_integration_error());
        assert!(ErrorCode::InvalidConfiguration.is_integration_error());
    }
}
