//! Structured failure payloads.
//!
//! Every failure that leaves the invocation controller is an
//! `ApplicationFailure` carrying a `DslTaskErrorInfo`, so the durable
//! executor and downstream observability can correlate it without
//! re-parsing message text.

use serde::{Deserialize, Serialize};

/// Closed set of error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Registration with an already-used action key
    DuplicateKey,
    /// Registration target has no implementation
    NotCallable,
    /// Invocation supplied positional arguments
    KeywordArgsRequired,
    /// Supplied arguments do not satisfy the derived schema
    ArgsValidationFailed,
    /// Lookup of an unregistered key
    UnknownAction,
    /// An action's own expected failure
    DomainActionError,
    /// A structured failure surfacing from a nested boundary
    UnexpectedApplicationError,
    /// Any uncaught error; never retried
    UnknownError,
    /// History correlator given an event type it does not handle
    UnsupportedEventKind,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateKey => "DuplicateKey",
            Self::NotCallable => "NotCallable",
            Self::KeywordArgsRequired => "KeywordArgsRequired",
            Self::ArgsValidationFailed => "ArgsValidationFailed",
            Self::UnknownAction => "UnknownAction",
            Self::DomainActionError => "DomainActionError",
            Self::UnexpectedApplicationError => "UnexpectedApplicationError",
            Self::UnknownError => "UnknownError",
            Self::UnsupportedEventKind => "UnsupportedEventKind",
        }
    }

    /// Parse a tag string back into a kind
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "DuplicateKey" => Self::DuplicateKey,
            "NotCallable" => Self::NotCallable,
            "KeywordArgsRequired" => Self::KeywordArgsRequired,
            "ArgsValidationFailed" => Self::ArgsValidationFailed,
            "UnknownAction" => Self::UnknownAction,
            "DomainActionError" => Self::DomainActionError,
            "UnexpectedApplicationError" => Self::UnexpectedApplicationError,
            "UnknownError" => Self::UnknownError,
            "UnsupportedEventKind" => Self::UnsupportedEventKind,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical structured-error payload attached to every surfaced failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DslTaskErrorInfo {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub attempt: u32,
}

/// A structured failure handed to the durable executor
///
/// `non_retryable` is the only signal the executor uses to decide whether to
/// schedule another attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ApplicationFailure {
    pub message: String,

    #[serde(rename = "type")]
    pub kind: ErrorKind,

    #[serde(default)]
    pub non_retryable: bool,

    #[serde(default)]
    pub details: Option<DslTaskErrorInfo>,

    /// The failure this one wraps, if any
    #[serde(default)]
    pub cause: Option<Box<ApplicationFailure>>,
}

impl ApplicationFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            non_retryable: false,
            details: None,
            cause: None,
        }
    }

    pub fn non_retryable(mut self, non_retryable: bool) -> Self {
        self.non_retryable = non_retryable;
        self
    }

    pub fn with_details(mut self, details: DslTaskErrorInfo) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_cause(mut self, cause: ApplicationFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_retryable(&self) -> bool {
        !self.non_retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_tags_round_trip() {
        for kind in [
            ErrorKind::DuplicateKey,
            ErrorKind::NotCallable,
            ErrorKind::KeywordArgsRequired,
            ErrorKind::ArgsValidationFailed,
            ErrorKind::UnknownAction,
            ErrorKind::DomainActionError,
            ErrorKind::UnexpectedApplicationError,
            ErrorKind::UnknownError,
            ErrorKind::UnsupportedEventKind,
        ] {
            assert_eq!(ErrorKind::from_tag(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(ErrorKind::from_tag("ValueError"), None);
    }

    #[test]
    fn test_error_info_wire_names() {
        let info = DslTaskErrorInfo {
            ref_: "step1".to_string(),
            message: "boom".to_string(),
            kind: ErrorKind::DomainActionError,
            attempt: 2,
        };
        let wire = serde_json::to_value(&info).unwrap();

        assert_eq!(wire["ref"], "step1");
        assert_eq!(wire["type"], "DomainActionError");
        assert_eq!(wire["attempt"], 2);
    }
}
