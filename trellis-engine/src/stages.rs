//! Standard pipeline stages
//!
//! Primary chain: route resolution → access guard → binding → invocation →
//! response generation. The recovery chain reuses [`ResponseStage`].

use crate::binding::BindingEngine;
use crate::chain::{Chain, Flow, Stage, StageResult};
use crate::collaborators::{
    AccessPolicy, Decision, HandlerFactory, Invocation, Renderer, RouteResolver, View,
};
use crate::context::InvocationContext;
use crate::exchange::Exchange;
use crate::failure::{Failure, FailureClass};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use trellis_common::ResultConfig;

// ============================================================================
// Route resolution
// ============================================================================

/// Finds the route, creates its handler and pushes the invocation context
pub struct RouteResolutionStage {
    resolver: Arc<dyn RouteResolver>,
    factory: Arc<dyn HandlerFactory>,
}

impl RouteResolutionStage {
    pub fn new(resolver: Arc<dyn RouteResolver>, factory: Arc<dyn HandlerFactory>) -> Self {
        Self { resolver, factory }
    }
}

impl Stage for RouteResolutionStage {
    fn name(&self) -> &'static str {
        "route"
    }

    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult {
        let method = exchange.request.method().to_string();
        let uri = exchange.request.uri().to_string();

        let matched = self.resolver.lookup(&method, &uri).ok_or_else(|| {
            Failure::new(
                FailureClass::ROUTE_NOT_FOUND,
                format!("no route for {} {}", method, uri),
            )
        })?;
        let handler = self.factory.create(&matched.config)?;
        debug!(route = %matched.config.name, operation = %matched.config.operation, "Route resolved");

        exchange.contexts.set_current(InvocationContext::new(
            handler,
            matched.config,
            uri,
            matched.uri_parameters,
        ));
        chain.proceed(exchange)
    }
}

// ============================================================================
// Access guard
// ============================================================================

/// Consults the access policy when the route names a guard
pub struct GuardStage {
    policy: Option<Arc<dyn AccessPolicy>>,
}

impl GuardStage {
    pub fn new(policy: Option<Arc<dyn AccessPolicy>>) -> Self {
        Self { policy }
    }
}

impl Stage for GuardStage {
    fn name(&self) -> &'static str {
        "guard"
    }

    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult {
        let Some(guard) = exchange.contexts.require_current()?.config().guard.clone() else {
            return chain.proceed(exchange);
        };
        let policy = self.policy.as_ref().ok_or_else(|| {
            Failure::new(
                FailureClass::CONFIGURATION,
                format!("route requires guard '{}' but no access policy is installed", guard),
            )
        })?;

        match policy.check(&guard, &exchange.request) {
            Decision::Allow => {
                debug!(guard = %guard, "Access granted");
                chain.proceed(exchange)
            }
            Decision::Deny { code, message } => {
                info!(guard = %guard, code = %code, "Access denied");
                Ok(Flow::ShortCircuit {
                    stage: self.name(),
                    code,
                    message: Some(message),
                })
            }
        }
    }
}

// ============================================================================
// Binding
// ============================================================================

/// Binds request parameters, then URI parameters, into the current handler
///
/// Per-field failures are stored on the exchange; they never stop the
/// chain. The handler decides what to do with them.
pub struct BindingStage {
    engine: Arc<BindingEngine>,
}

impl BindingStage {
    pub fn new(engine: Arc<BindingEngine>) -> Self {
        Self { engine }
    }
}

impl Stage for BindingStage {
    fn name(&self) -> &'static str {
        "binding"
    }

    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult {
        let context = exchange.contexts.require_current_mut()?;
        let (handler, _, uri_parameters) = context.parts_mut();
        let target = handler.as_any_mut();

        let mut report = self.engine.bind(target, exchange.request.parameters());
        report.merge(self.engine.bind(target, uri_parameters));

        if report.is_clean() {
            debug!(bound = report.bound().len(), skipped = report.skipped().len(), "Binding complete");
        } else {
            info!(
                bound = report.bound().len(),
                failed = report.failures().len(),
                "Binding completed with field failures"
            );
        }
        exchange.binding.merge(report);
        chain.proceed(exchange)
    }
}

// ============================================================================
// Invocation
// ============================================================================

/// Invokes the handler's operation and records its outcome
pub struct InvocationStage;

impl Stage for InvocationStage {
    fn name(&self) -> &'static str {
        "invocation"
    }

    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult {
        let context = exchange.contexts.require_current_mut()?;
        let (handler, operation, _) = context.parts_mut();

        let mut call = Invocation {
            operation,
            request: &exchange.request,
            binding: &exchange.binding,
            messages: exchange.result.messages_mut(),
        };
        let outcome = handler.invoke(&mut call)?;
        debug!(operation, outcome = %outcome, "Handler invoked");

        exchange.result.set_outcome(outcome);
        chain.proceed(exchange)
    }
}

// ============================================================================
// Response generation
// ============================================================================

/// Applies the result configured for the recovery code or outcome
///
/// Lookup order: the route's results, then the global results table.
/// `Redirect` halts the chain; `Render` and `Status` continue it.
pub struct ResponseStage {
    renderer: Option<Arc<dyn Renderer>>,
    results: HashMap<String, ResultConfig>,
}

impl ResponseStage {
    pub fn new(renderer: Option<Arc<dyn Renderer>>, results: HashMap<String, ResultConfig>) -> Self {
        Self { renderer, results }
    }

    fn select(&self, exchange: &Exchange, key: &str) -> Option<ResultConfig> {
        exchange
            .contexts
            .current()
            .and_then(|context| context.config().results.get(key))
            .or_else(|| self.results.get(key))
            .cloned()
    }
}

impl Stage for ResponseStage {
    fn name(&self) -> &'static str {
        "response"
    }

    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult {
        if exchange.contexts.current().is_some_and(|context| !context.render()) {
            debug!("Rendering disabled for this invocation");
            return chain.proceed(exchange);
        }

        let key = match (exchange.result.recovery_code(), exchange.result.outcome()) {
            (Some(code), _) => code.as_str().to_string(),
            (None, Some(outcome)) => outcome.to_string(),
            (None, None) => {
                debug!("No outcome to respond to");
                return chain.proceed(exchange);
            }
        };
        let result = self.select(exchange, &key).ok_or_else(|| {
            Failure::new(
                FailureClass::CONFIGURATION,
                format!("no result configured for '{}'", key),
            )
        })?;

        match result {
            ResultConfig::Render { template } => {
                let renderer = self.renderer.as_ref().ok_or_else(|| {
                    Failure::new(
                        FailureClass::CONFIGURATION,
                        format!("result '{}' renders '{}' but no renderer is installed", key, template),
                    )
                })?;
                let view = View {
                    template: &template,
                    handler: exchange.contexts.current().map(InvocationContext::handler),
                    result: &exchange.result,
                    binding: &exchange.binding,
                };
                renderer.render(&view, exchange.response.as_mut())?;
                debug!(key = %key, template = %template, "Rendered");
                chain.proceed(exchange)
            }
            ResultConfig::Status { code } => {
                exchange.response.set_status(code);
                debug!(key = %key, status = code, "Status set");
                chain.proceed(exchange)
            }
            ResultConfig::Redirect { location } => {
                exchange.response.set_status(302);
                exchange.response.set_header("Location", &location);
                debug!(key = %key, location = %location, "Redirecting");
                Ok(Flow::Halted { stage: self.name() })
            }
        }
    }
}
