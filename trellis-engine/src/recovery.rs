//! Recovery pipeline
//!
//! Activated once per request when the primary chain fails or
//! short-circuits.
//!
//! # State machine
//!
//! ```text
//! Normal ──failure──▶ Failed ──handler found──▶ Recovering ──chain done──▶ Terminal
//!                        │                          │
//!                        └──── handler fails ───────┴── chain fails ──▶ EngineError::Fatal
//! ```
//!
//! Typed handlers are looked up along the failure's class lineage, most
//! specific first; the first registered handler wins. With no match the
//! default handler applies the configured generic code and status.

use crate::chain::{Chain, Flow, Stage};
use crate::error::EngineError;
use crate::exchange::Exchange;
use crate::failure::{Failure, FailureClass, RecoveryCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use trellis_common::config::RecoveryConfig;

/// Where a request stands with respect to recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryState {
    #[default]
    Normal,
    Failed,
    Recovering,
    Terminal,
}

/// Turns a failure into a recovery code, adjusting the response as needed
pub trait FailureHandler: Send + Sync {
    fn handle(&self, failure: &Failure, exchange: &mut Exchange) -> Result<RecoveryCode, Failure>;
}

/// Failure class → handler table
#[derive(Clone, Default)]
pub struct FailureHandlerRegistry {
    handlers: HashMap<FailureClass, Arc<dyn FailureHandler>>,
}

impl FailureHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `class` and every class below it
    pub fn register(&mut self, class: FailureClass, handler: Arc<dyn FailureHandler>) {
        self.handlers.insert(class, handler);
    }

    /// Register unless a handler for `class` already exists
    pub fn register_default(&mut self, class: FailureClass, handler: Arc<dyn FailureHandler>) {
        self.handlers.entry(class).or_insert(handler);
    }

    /// Most specific handler for `class`, with the class it was registered under
    pub fn lookup(&self, class: &FailureClass) -> Option<(FailureClass, Arc<dyn FailureHandler>)> {
        class.lineage().find_map(|candidate| {
            self.handlers
                .get(&candidate)
                .map(|handler| (candidate.clone(), Arc::clone(handler)))
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for FailureHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<&str> = self.handlers.keys().map(FailureClass::as_str).collect();
        classes.sort_unstable();
        f.debug_struct("FailureHandlerRegistry")
            .field("classes", &classes)
            .finish()
    }
}

// ============================================================================
// Built-in handlers
// ============================================================================

/// Fallback: configured generic code and server-error status
///
/// A status carried by the failure is ignored here; typed handlers decide
/// whether to honour it.
#[derive(Debug, Clone)]
pub struct DefaultFailureHandler {
    code: RecoveryCode,
    status: u16,
}

impl DefaultFailureHandler {
    pub fn new(code: impl Into<RecoveryCode>, status: u16) -> Self {
        Self {
            code: code.into(),
            status,
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.default_code.as_str(), config.default_status)
    }
}

impl FailureHandler for DefaultFailureHandler {
    fn handle(&self, failure: &Failure, exchange: &mut Exchange) -> Result<RecoveryCode, Failure> {
        exchange.response.set_status(self.status);
        exchange.result.push_message(failure.message());
        Ok(self.code.clone())
    }
}

/// Deliberate short-circuits: the failure names its own recovery code
#[derive(Debug, Clone)]
pub struct DeliberateFailureHandler {
    fallback: RecoveryCode,
}

impl DeliberateFailureHandler {
    pub fn new(fallback: impl Into<RecoveryCode>) -> Self {
        Self {
            fallback: fallback.into(),
        }
    }
}

impl FailureHandler for DeliberateFailureHandler {
    fn handle(&self, failure: &Failure, exchange: &mut Exchange) -> Result<RecoveryCode, Failure> {
        if let Some(status) = failure.status() {
            exchange.response.set_status(status);
        }
        if !failure.message().is_empty() {
            exchange.result.push_message(failure.message());
        }
        Ok(failure.code().cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Fixed code and status, e.g. `not_found` / 404
#[derive(Debug, Clone)]
pub struct StatusFailureHandler {
    code: RecoveryCode,
    status: u16,
}

impl StatusFailureHandler {
    pub fn new(code: impl Into<RecoveryCode>, status: u16) -> Self {
        Self {
            code: code.into(),
            status,
        }
    }
}

impl FailureHandler for StatusFailureHandler {
    fn handle(&self, failure: &Failure, exchange: &mut Exchange) -> Result<RecoveryCode, Failure> {
        exchange.response.set_status(self.status);
        exchange.result.push_message(failure.message());
        Ok(self.code.clone())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Typed dispatch followed by the recovery stage chain
pub struct RecoveryPipeline {
    handlers: FailureHandlerRegistry,
    fallback: Arc<dyn FailureHandler>,
    stages: Vec<Arc<dyn Stage>>,
}

impl RecoveryPipeline {
    pub fn new(
        handlers: FailureHandlerRegistry,
        fallback: Arc<dyn FailureHandler>,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        Self {
            handlers,
            fallback,
            stages,
        }
    }

    pub fn handlers(&self) -> &FailureHandlerRegistry {
        &self.handlers
    }

    /// Handle `failure` exactly once and run the recovery chain
    ///
    /// The context active when the failure occurred stays current
    /// throughout. A failing handler or recovery chain ends the request
    /// with [`EngineError::Fatal`].
    pub fn recover(&self, failure: Failure, exchange: &mut Exchange) -> Result<Flow, EngineError> {
        exchange.recovery = RecoveryState::Failed;
        if failure.is_deliberate() {
            debug!(failure = %failure, "Deliberate short-circuit, entering recovery");
        } else {
            warn!(failure = %failure, "Stage failed, entering recovery");
        }

        let (matched, handler) = match self.handlers.lookup(failure.class()) {
            Some((class, handler)) => (class.to_string(), handler),
            None => ("default".to_string(), Arc::clone(&self.fallback)),
        };
        exchange.recovery = RecoveryState::Recovering;

        let code = match handler.handle(&failure, exchange) {
            Ok(code) => code,
            Err(secondary) => return Err(fatal(failure, secondary, exchange)),
        };
        debug!(handler = %matched, code = %code, "Failure handled");

        exchange.result.set_failure(failure.record(Some(&code)));
        exchange.result.set_recovery_code(code);

        let outcome = Chain::new("recovery", &self.stages).proceed(exchange);
        exchange.recovery = RecoveryState::Terminal;
        match outcome {
            Ok(Flow::ShortCircuit { stage, code, .. }) => {
                warn!(stage, code = %code, "Short-circuit during recovery ignored");
                Ok(Flow::Halted { stage })
            }
            Ok(flow) => Ok(flow),
            Err(secondary) => Err(fatal(failure, secondary, exchange)),
        }
    }
}

fn fatal(original: Failure, secondary: Failure, exchange: &mut Exchange) -> EngineError {
    exchange.recovery = RecoveryState::Terminal;
    let response_started = exchange.response.is_started();
    error!(
        original = %original,
        secondary = %secondary,
        response_started,
        "Recovery failed"
    );
    EngineError::Fatal {
        original,
        secondary,
        response_started,
    }
}
