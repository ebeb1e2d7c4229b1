//! Mail failure taxonomy.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;

/// Failure classification for a mail send.
///
/// Template and addressing problems are permanent; network trouble and
/// provider throttling are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailErrorCode {
    TemplateMissing,
    TemplateExecution,
    NetworkFailure,
    AuthFailure,
    RateLimited,
    InvalidRecipient,
}

impl MailErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailErrorCode::TemplateMissing => "TEMPLATE_MISSING",
            MailErrorCode::TemplateExecution => "TEMPLATE_EXECUTION",
            MailErrorCode::NetworkFailure => "NETWORK_FAILURE",
            MailErrorCode::AuthFailure => "AUTH_FAILURE",
            MailErrorCode::RateLimited => "RATE_LIMITED",
            MailErrorCode::InvalidRecipient => "INVALID_RECIPIENT",
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            MailErrorCode::NetworkFailure | MailErrorCode::RateLimited
        )
    }
}

impl fmt::Display for MailErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mail delivery failure: code, retriability, wrapped cause, and free-form
/// metadata for the logs.
#[derive(Debug, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct MailError {
    pub code: MailErrorCode,
    pub message: String,
    pub retriable: bool,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub metadata: HashMap<String, Value>,
}

impl MailError {
    pub fn new(code: MailErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retriable: code.is_retriable(),
            source: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn template_missing(template: &str) -> Self {
        Self::new(
            MailErrorCode::TemplateMissing,
            format!("no such template: {template}"),
        )
        .with_metadata("template", template)
    }

    pub fn template_execution(template: &str, detail: impl Into<String>) -> Self {
        Self::new(
            MailErrorCode::TemplateExecution,
            format!("failed to render template {template}"),
        )
        .with_metadata("template", template)
        .with_metadata("detail", detail.into())
    }

    pub fn network(op: &str) -> Self {
        Self::new(
            MailErrorCode::NetworkFailure,
            format!("network failure during {op}"),
        )
        .with_metadata("operation", op)
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(MailErrorCode::AuthFailure, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(MailErrorCode::RateLimited, message)
    }

    pub fn invalid_recipient(recipient: &str) -> Self {
        Self::new(
            MailErrorCode::InvalidRecipient,
            format!("recipient address rejected: {recipient}"),
        )
        .with_metadata("recipient", recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_follows_code() {
        assert!(MailError::network("dial").retriable);
        assert!(MailError::rate_limited("slow down").retriable);
        assert!(!MailError::template_missing("nope").retriable);
        assert!(!MailError::auth_failure("bad credentials").retriable);
        assert!(!MailError::invalid_recipient("x@y").retriable);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = MailError::network("smtp dial");
        assert_eq!(
            err.to_string(),
            "[NETWORK_FAILURE] network failure during smtp dial"
        );
    }

    #[test]
    fn constructors_attach_metadata() {
        let err = MailError::template_execution("user_welcome", "missing variable");
        assert_eq!(err.metadata["template"], "user_welcome");
        assert_eq!(err.metadata["detail"], "missing variable");
    }
}
