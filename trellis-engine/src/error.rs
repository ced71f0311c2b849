//! Error types for the Trellis engine

use crate::failure::{Failure, FailureClass, FailureOrigin, FailureRecord};
use thiserror::Error;

/// Result type for engine assembly and request handling
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that escape the engine to its caller
#[derive(Error, Debug)]
pub enum EngineError {
    /// Recovery itself failed; no further recovery is attempted
    #[error("Recovery failed: {secondary} (while recovering from {original})")]
    Fatal {
        original: Failure,
        #[source]
        secondary: Failure,
        /// Whether response bytes had already been committed
        response_started: bool,
    },

    /// Configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(#[from] trellis_common::Error),

    /// Engine builder was missing a required collaborator
    #[error("Engine assembly error: {0}")]
    Assembly(String),
}

/// Per-field binding errors
///
/// Recorded in the request's binding report; neither variant aborts the
/// stage chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// The path named no member, crossed an absent value, or needed an
    /// intermediate object that could not be created
    #[error("Cannot resolve '{path}' at '{segment}': {reason}")]
    Resolution {
        path: String,
        segment: String,
        reason: String,
    },

    /// No conversion rule exists for the target type, or the rule rejected
    /// the raw values
    #[error("Cannot convert {values:?} to {target} for '{path}': {reason}")]
    Conversion {
        path: String,
        values: Vec<String>,
        target: &'static str,
        reason: String,
    },
}

impl BindingError {
    pub(crate) fn resolution(
        path: &str,
        segment: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BindingError::Resolution {
            path: path.to_string(),
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    /// Path expression the error was raised for
    pub fn path(&self) -> &str {
        match self {
            BindingError::Resolution { path, .. } | BindingError::Conversion { path, .. } => path,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            BindingError::Resolution { .. } => FailureClass::BINDING_RESOLUTION,
            BindingError::Conversion { .. } => FailureClass::BINDING_CONVERSION,
        }
    }

    pub fn record(&self) -> FailureRecord {
        FailureRecord {
            origin: FailureOrigin::Field(self.path().to_string()),
            class: self.class().as_str().to_string(),
            message: self.to_string(),
            recovery_code: None,
        }
    }
}
