//! Error kinds surfaced by the core library.
//!
//! Every error the model client can produce renders, through `Display`, as the
//! exact text shown to the user in place of a response.

use thiserror::Error;

/// Shown when a failure carries no usable message.
pub const UNKNOWN_ERROR_TEXT: &str = "An unknown error occurred while contacting the AI model.";

/// Failure to turn an encoded image back into bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("Invalid data URL")]
    InvalidDataUrl,

    #[error("Could not find MIME type in data URL")]
    MissingMimeType,

    #[error("Invalid base64 image payload: {0}")]
    InvalidBase64(String),

    #[error("Not an image: {0}")]
    NotAnImage(String),
}

/// Failure of a single model query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// No credential was available when the client was built.
    #[error("Error: {service} API key is not configured. Please contact the administrator.")]
    NotConfigured { service: &'static str },

    /// The request never produced a readable response.
    #[error("{}", error_text(.0))]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("{}", error_text(.message))]
    Api { status: u16, message: String },

    /// The attached image could not be decoded; nothing was sent.
    #[error("An error occurred: {0}")]
    Attachment(#[from] AttachmentError),
}

impl QueryError {
    pub fn is_attachment(&self) -> bool {
        matches!(self, QueryError::Attachment(_))
    }
}

fn error_text(message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        UNKNOWN_ERROR_TEXT.to_string()
    } else {
        format!("An error occurred: {}", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_configured_text() {
        let err = QueryError::NotConfigured { service: "Gemini" };
        assert_eq!(
            err.to_string(),
            "Error: Gemini API key is not configured. Please contact the administrator."
        );
    }

    #[test]
    fn test_transport_text() {
        let err = QueryError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "An error occurred: connection refused");
    }

    #[test]
    fn test_empty_message_falls_back() {
        let err = QueryError::Api { status: 500, message: "  ".to_string() };
        assert_eq!(err.to_string(), UNKNOWN_ERROR_TEXT);
    }

    #[test]
    fn test_attachment_kind() {
        let err = QueryError::from(AttachmentError::InvalidDataUrl);
        assert!(err.is_attachment());
        assert_eq!(err.to_string(), "An error occurred: Invalid data URL");
        assert!(!QueryError::Transport("x".into()).is_attachment());
    }
}
