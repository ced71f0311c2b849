//! Pipeline failures and their classification
//!
//! Failures are classified by a dot-separated [`FailureClass`]. The class
//! lineage (`routing.not_found` → `routing` → root) is the hierarchy the
//! recovery pipeline walks, most specific first, when it looks for a typed
//! failure handler.

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

// ============================================================================
// Failure classes
// ============================================================================

/// Hierarchical failure classification
///
/// The root class (empty name) is the ancestor of every class; a handler
/// registered for it catches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureClass(Cow<'static, str>);

impl FailureClass {
    /// Ancestor of every class
    pub const ROOT: FailureClass = FailureClass(Cow::Borrowed(""));

    /// A stage deliberately refused to continue and named a recovery code
    pub const DELIBERATE: FailureClass = FailureClass(Cow::Borrowed("control.deliberate"));

    /// No route matched the request
    pub const ROUTE_NOT_FOUND: FailureClass = FailureClass(Cow::Borrowed("routing.not_found"));

    /// Business logic failed without a more specific class
    pub const HANDLER: FailureClass = FailureClass(Cow::Borrowed("handler"));

    /// A binding path named no member or crossed an absent value
    pub const BINDING_RESOLUTION: FailureClass = FailureClass(Cow::Borrowed("binding.resolution"));

    /// Raw input could not be converted to a member's declared type
    pub const BINDING_CONVERSION: FailureClass = FailureClass(Cow::Borrowed("binding.conversion"));

    /// The engine was assembled or configured inconsistently
    pub const CONFIGURATION: FailureClass = FailureClass(Cow::Borrowed("internal.configuration"));

    /// Create a class from a dot-separated name
    ///
    /// Leading and trailing dots are ignored, so `".a.b."` equals `"a.b"`.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        let trimmed = name.trim_matches('.');
        if trimmed.len() == name.len() {
            FailureClass(name)
        } else {
            FailureClass(Cow::Owned(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Immediate ancestor, `None` for the root class
    pub fn parent(&self) -> Option<FailureClass> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('.') {
            Some(split) => Some(FailureClass(Cow::Owned(self.0[..split].to_string()))),
            None => Some(Self::ROOT),
        }
    }

    /// This class followed by every ancestor down to the root
    pub fn lineage(&self) -> impl Iterator<Item = FailureClass> {
        std::iter::successors(Some(self.clone()), FailureClass::parent)
    }

    /// Whether `ancestor` appears in this class's lineage
    pub fn is_a(&self, ancestor: &FailureClass) -> bool {
        ancestor.is_root()
            || self.0 == ancestor.0
            || (self.0.starts_with(ancestor.as_str())
                && self.0[ancestor.0.len()..].starts_with('.'))
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ============================================================================
// Recovery codes
// ============================================================================

/// Names the response-generation path taken after a failure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecoveryCode(String);

impl RecoveryCode {
    pub fn new(code: impl Into<String>) -> Self {
        RecoveryCode(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecoveryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecoveryCode {
    fn from(code: &str) -> Self {
        RecoveryCode::new(code)
    }
}

impl From<String> for RecoveryCode {
    fn from(code: String) -> Self {
        RecoveryCode(code)
    }
}

// ============================================================================
// Failure
// ============================================================================

/// A stage failure routed to the recovery pipeline
#[derive(Debug)]
pub struct Failure {
    class: FailureClass,
    message: String,
    stage: Option<&'static str>,
    code: Option<RecoveryCode>,
    status: Option<u16>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Failure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            stage: None,
            code: None,
            status: None,
            source: None,
        }
    }

    /// Deliberate short-circuit carrying an explicit recovery code
    pub fn deliberate(code: impl Into<RecoveryCode>, message: impl Into<String>) -> Self {
        Self::new(FailureClass::DELIBERATE, message).with_code(code)
    }

    /// Business-logic failure with no more specific class
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(FailureClass::HANDLER, message)
    }

    /// Wrap an error value, keeping it as the failure's source
    pub fn from_error<E>(class: FailureClass, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut failure = Self::new(class, error.to_string());
        failure.source = Some(Box::new(error));
        failure
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<RecoveryCode>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the originating stage; the innermost stage wins
    pub fn within(mut self, stage: &'static str) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage);
        }
        self
    }

    pub fn class(&self) -> &FailureClass {
        &self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stage(&self) -> Option<&'static str> {
        self.stage
    }

    /// Explicit recovery code (deliberate failures)
    pub fn code(&self) -> Option<&RecoveryCode> {
        self.code.as_ref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_deliberate(&self) -> bool {
        self.class.is_a(&FailureClass::DELIBERATE)
    }

    /// Snapshot for display and logging
    pub fn record(&self, recovery_code: Option<&RecoveryCode>) -> FailureRecord {
        FailureRecord {
            origin: match self.stage {
                Some(stage) => FailureOrigin::Stage(stage.to_string()),
                None => FailureOrigin::Unknown,
            },
            class: self.class.as_str().to_string(),
            message: self.message.clone(),
            recovery_code: recovery_code.map(|code| code.as_str().to_string()),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "[{}] {} (stage {})", self.class, self.message, stage),
            None => write!(f, "[{}] {}", self.class, self.message),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        let mut failure = Self::handler(format!("{:#}", error));
        failure.source = Some(error.into());
        failure
    }
}

// ============================================================================
// Failure records
// ============================================================================

/// Where a recorded failure came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum FailureOrigin {
    /// Binding of the named field path
    Field(String),
    /// The named pipeline stage
    Stage(String),
    /// Raised before any stage claimed it
    Unknown,
}

/// Serializable description of a failure for later stages and display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub origin: FailureOrigin,
    pub class: String,
    pub message: String,
    pub recovery_code: Option<String>,
}
