//! Narrow interfaces to the engine's external collaborators
//!
//! Route discovery, handler construction, rendering, access decisions and
//! response transport all live outside the engine. The stages only see the
//! traits below.

use crate::binding::BindingReport;
use crate::exchange::{Request, ResultStore};
use crate::failure::{Failure, RecoveryCode};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use trellis_common::{Parameters, ResultConfig};

/// Access to the concrete type behind a trait object
///
/// Implemented for every `'static` type. Call it through a reference to
/// the trait object (`handler.as_any()` on `&dyn Handler`, or
/// `boxed.as_ref().as_any()`), never on the `Box` itself, which would yield
/// the box.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Per-route configuration, shared read-only by every request on the route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Unique route name
    pub name: String,

    /// Operation the handler is asked to perform
    pub operation: String,

    /// Access guard consulted before binding
    #[serde(default)]
    pub guard: Option<String>,

    /// Results by outcome or recovery code; falls back to the global table
    #[serde(default)]
    pub results: HashMap<String, ResultConfig>,

    /// Whether response generation runs for this route
    #[serde(default = "default_render")]
    pub render: bool,
}

fn default_render() -> bool {
    true
}

impl RouteConfig {
    pub fn new(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            guard: None,
            results: HashMap::new(),
            render: true,
        }
    }

    pub fn guarded_by(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn result(mut self, key: impl Into<String>, result: ResultConfig) -> Self {
        self.results.insert(key.into(), result);
        self
    }

    pub fn without_render(mut self) -> Self {
        self.render = false;
        self
    }
}

/// A resolved route plus the parameters captured from the URI
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub config: Arc<RouteConfig>,
    pub uri_parameters: Parameters,
}

/// Maps a request to its route
pub trait RouteResolver: Send + Sync {
    fn lookup(&self, method: &str, uri: &str) -> Option<RouteMatch>;
}

/// Creates a fresh handler instance for a resolved route
pub trait HandlerFactory: Send + Sync {
    fn create(&self, route: &RouteConfig) -> Result<Box<dyn Handler>, Failure>;
}

// ============================================================================
// Handlers
// ============================================================================

/// What a handler sees while performing its operation
pub struct Invocation<'a> {
    pub operation: &'a str,
    pub request: &'a Request,
    pub binding: &'a BindingReport,
    /// Messages queued for the response
    pub messages: &'a mut Vec<String>,
}

/// Business-logic object bound from request data and then invoked
///
/// The handler's concrete type must be registered with the binding engine
/// for its members to be bindable.
pub trait Handler: AsAny + Send {
    /// Perform the operation and return the outcome name
    fn invoke(&mut self, call: &mut Invocation<'_>) -> Result<String, Failure>;
}

// ============================================================================
// Rendering and access
// ============================================================================

/// Data handed to the renderer
pub struct View<'a> {
    pub template: &'a str,
    /// Active handler, absent when no route was resolved
    pub handler: Option<&'a dyn Handler>,
    pub result: &'a ResultStore,
    pub binding: &'a BindingReport,
}

impl fmt::Debug for View<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("template", &self.template)
            .field("handler", &self.handler.is_some())
            .field("result", &self.result)
            .finish()
    }
}

pub trait Renderer: Send + Sync {
    fn render(&self, view: &View<'_>, response: &mut dyn Response) -> Result<(), Failure>;
}

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { code: RecoveryCode, message: String },
}

pub trait AccessPolicy: Send + Sync {
    fn check(&self, guard: &str, request: &Request) -> Decision;
}

// ============================================================================
// Responses
// ============================================================================

/// Outbound response sink
pub trait Response: AsAny + Send {
    fn set_status(&mut self, status: u16);

    fn status(&self) -> u16;

    fn set_header(&mut self, name: &str, value: &str);

    /// Append body text; the response counts as started afterwards
    fn write(&mut self, chunk: &str);

    /// Whether any bytes have been committed to the client
    fn is_started(&self) -> bool;
}

/// In-memory response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: String::new(),
        }
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

impl Response for BufferedResponse {
    fn set_status(&mut self, status: u16) {
        if self.is_started() {
            warn!(status, "Response already started, status change ignored");
            return;
        }
        self.status = status;
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if self.is_started() {
            warn!(name, "Response already started, header ignored");
            return;
        }
        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    fn write(&mut self, chunk: &str) {
        self.body.push_str(chunk);
    }

    fn is_started(&self) -> bool {
        !self.body.is_empty()
    }
}
