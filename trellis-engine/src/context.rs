//! Invocation context store
//!
//! Every request owns one [`ContextStack`] inside its
//! [`Exchange`](crate::exchange::Exchange). Stages reach the active context
//! through the exchange they are handed, so contexts of requests running
//! on other threads are never visible.

use crate::collaborators::{Handler, RouteConfig};
use crate::failure::{Failure, FailureClass};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use trellis_common::Parameters;

/// Everything needed to invoke one handler operation
///
/// Only created once route resolution has produced a handler, so a context
/// always owns one.
pub struct InvocationContext {
    handler: Box<dyn Handler>,
    operation: String,
    config: Arc<RouteConfig>,
    uri: String,
    uri_parameters: Parameters,
    render: bool,
}

impl InvocationContext {
    pub fn new(
        handler: Box<dyn Handler>,
        config: Arc<RouteConfig>,
        uri: impl Into<String>,
        uri_parameters: Parameters,
    ) -> Self {
        Self {
            handler,
            operation: config.operation.clone(),
            render: config.render,
            config,
            uri: uri.into(),
            uri_parameters,
        }
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    pub fn handler_mut(&mut self) -> &mut dyn Handler {
        self.handler.as_mut()
    }

    /// Downcast the handler to its concrete type
    pub fn handler_as<H: Any>(&self) -> Option<&H> {
        self.handler.as_ref().as_any().downcast_ref::<H>()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn uri_parameters(&self) -> &Parameters {
        &self.uri_parameters
    }

    /// Whether response generation runs for this invocation
    pub fn render(&self) -> bool {
        self.render
    }

    pub fn set_render(&mut self, render: bool) {
        self.render = render;
    }

    /// Handler borrowed mutably alongside the read-only parts
    pub fn parts_mut(&mut self) -> (&mut dyn Handler, &str, &Parameters) {
        (self.handler.as_mut(), &self.operation, &self.uri_parameters)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("route", &self.config.name)
            .field("operation", &self.operation)
            .field("uri", &self.uri)
            .field("uri_parameters", &self.uri_parameters)
            .field("render", &self.render)
            .finish()
    }
}

/// LIFO of invocation contexts for one request
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<InvocationContext>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top of the stack
    pub fn current(&self) -> Option<&InvocationContext> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut InvocationContext> {
        self.frames.last_mut()
    }

    /// [`ContextStack::current`], failing when no route has been resolved
    pub fn require_current(&self) -> Result<&InvocationContext, Failure> {
        self.current().ok_or_else(missing_context)
    }

    pub fn require_current_mut(&mut self) -> Result<&mut InvocationContext, Failure> {
        self.current_mut().ok_or_else(missing_context)
    }

    /// Push a context; it becomes current
    pub fn set_current(&mut self, context: InvocationContext) {
        trace!(depth = self.frames.len() + 1, route = %context.config.name, "Context pushed");
        self.frames.push(context);
    }

    /// Pop the current context
    pub fn remove_current(&mut self) -> Option<InvocationContext> {
        let popped = self.frames.pop();
        if popped.is_some() {
            trace!(depth = self.frames.len(), "Context popped");
        }
        popped
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Pop every context, returning how many were released
    pub fn clear(&mut self) -> usize {
        let mut released = 0;
        while self.remove_current().is_some() {
            released += 1;
        }
        released
    }
}

fn missing_context() -> Failure {
    Failure::new(
        FailureClass::CONFIGURATION,
        "no invocation context is active; route resolution must run first",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Invocation;
    use std::sync::mpsc;
    use std::thread;

    #[derive(Default)]
    struct Marker {
        label: String,
    }

    impl Handler for Marker {
        fn invoke(&mut self, _call: &mut Invocation<'_>) -> Result<String, Failure> {
            Ok("done".to_string())
        }
    }

    fn context(label: &str) -> InvocationContext {
        let handler = Marker {
            label: label.to_string(),
        };
        InvocationContext::new(
            Box::new(handler),
            Arc::new(RouteConfig::new(label, "run")),
            format!("/{}", label),
            Parameters::new(),
        )
    }

    #[test]
    fn test_push_pop_order() {
        let mut stack = ContextStack::new();
        assert!(stack.current().is_none());

        stack.set_current(context("outer"));
        stack.set_current(context("inner"));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().unwrap().uri(), "/inner");

        let popped = stack.remove_current().unwrap();
        assert_eq!(popped.config().name, "inner");
        assert_eq!(stack.current().unwrap().uri(), "/outer");
        assert_eq!(stack.clear(), 1);
        assert!(stack.remove_current().is_none());
    }

    #[test]
    fn test_require_current_without_route() {
        let mut stack = ContextStack::new();
        let failure = stack.require_current_mut().unwrap_err();
        assert_eq!(failure.class(), &FailureClass::CONFIGURATION);
    }

    #[test]
    fn test_handler_downcast() {
        let ctx = context("marker");
        assert_eq!(ctx.handler_as::<Marker>().unwrap().label, "marker");
        assert!(ctx.render());
        assert_eq!(ctx.operation(), "run");
    }

    #[test]
    fn test_stacks_isolated_across_threads() {
        let (tx, rx) = mpsc::channel();
        let workers: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|label| {
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut stack = ContextStack::new();
                    stack.set_current(context(label));
                    for _ in 0..100 {
                        thread::yield_now();
                        assert_eq!(stack.current().unwrap().config().name, label);
                    }
                    tx.send((label, stack.depth())).unwrap();
                })
            })
            .collect();
        drop(tx);
        for worker in workers {
            worker.join().unwrap();
        }
        let depths: Vec<_> = rx.iter().collect();
        assert_eq!(depths.len(), 2);
        assert!(depths.iter().all(|(_, depth)| *depth == 1));
    }
}
