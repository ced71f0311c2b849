//! Engine driver
//!
//! Assembles the primary and recovery chains from the collaborators handed
//! to [`EngineBuilder`], then drives each request through them inside the
//! failure boundary.

use crate::binding::{BindingEngine, TypeDescriptor, TypeRegistry};
use crate::chain::{Chain, Flow, Stage};
use crate::collaborators::{AccessPolicy, HandlerFactory, Renderer, Response, RouteResolver};
use crate::convert::{ConversionRegistry, ConversionRule, ConversionRuleProvider};
use crate::error::{EngineError, Result};
use crate::exchange::{Exchange, Request};
use crate::failure::{Failure, FailureClass};
use crate::recovery::{
    DefaultFailureHandler, DeliberateFailureHandler, FailureHandler, FailureHandlerRegistry,
    RecoveryPipeline, StatusFailureHandler,
};
use crate::stages::{BindingStage, GuardStage, InvocationStage, ResponseStage, RouteResolutionStage};
use std::sync::Arc;
use tracing::{debug, info, info_span, trace};
use trellis_common::EngineConfig;

/// Request-processing engine
///
/// Immutable once built and shared by every request thread.
pub struct Engine {
    config: Arc<EngineConfig>,
    binding: Arc<BindingEngine>,
    stages: Vec<Arc<dyn Stage>>,
    recovery: RecoveryPipeline,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn binding(&self) -> &Arc<BindingEngine> {
        &self.binding
    }

    /// Run one request through the primary chain, recovering on failure
    ///
    /// Every invocation context is popped before returning, whatever the
    /// outcome.
    pub fn handle(&self, request: Request, response: Box<dyn Response>) -> Result<Exchange> {
        let span = info_span!(
            "request",
            id = %request.id(),
            method = %request.method(),
            uri = %request.uri()
        );
        let _enter = span.enter();

        let mut exchange = Exchange::new(request, response);
        let outcome = self.run(&mut exchange);

        let released = exchange.contexts.clear();
        trace!(released, "Invocation contexts released");

        match outcome {
            Ok(flow) => {
                info!(
                    status = exchange.response.status(),
                    flow = ?flow,
                    recovered = exchange.result.recovery_code().is_some(),
                    "Request finished"
                );
                Ok(exchange)
            }
            Err(e) => Err(e),
        }
    }

    fn run(&self, exchange: &mut Exchange) -> Result<Flow> {
        let failure = match Chain::new("primary", &self.stages).proceed(exchange) {
            Ok(Flow::ShortCircuit {
                stage,
                code,
                message,
            }) => {
                let message =
                    message.unwrap_or_else(|| format!("short-circuited by stage '{}'", stage));
                Failure::deliberate(code, message).within(stage)
            }
            Ok(flow) => return Ok(flow),
            Err(failure) => failure,
        };
        self.recovery.recover(failure, exchange)
    }
}

/// Collects collaborators and overrides for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    types: TypeRegistry,
    rules: ConversionRegistry,
    resolver: Option<Arc<dyn RouteResolver>>,
    factory: Option<Arc<dyn HandlerFactory>>,
    renderer: Option<Arc<dyn Renderer>>,
    policy: Option<Arc<dyn AccessPolicy>>,
    handlers: FailureHandlerRegistry,
    stages: Option<Vec<Arc<dyn Stage>>>,
    recovery_stages: Option<Vec<Arc<dyn Stage>>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            types: TypeRegistry::new(),
            rules: ConversionRegistry::with_builtin_rules(),
            resolver: None,
            factory: None,
            renderer: None,
            policy: None,
            handlers: FailureHandlerRegistry::new(),
            stages: None,
            recovery_stages: None,
        }
    }

    /// Describe a bindable type (handlers and every type reachable from them)
    pub fn register_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.register(descriptor);
        self
    }

    pub fn conversion_rule(mut self, rule: Arc<dyn ConversionRule>) -> Self {
        self.rules.register(rule);
        self
    }

    pub fn conversion_provider(mut self, provider: &dyn ConversionRuleProvider) -> Self {
        self.rules.register_provider(provider);
        self
    }

    /// Use one object as both route resolver and handler factory
    pub fn routes<R>(mut self, routes: Arc<R>) -> Self
    where
        R: RouteResolver + HandlerFactory + 'static,
    {
        self.resolver = Some(routes.clone());
        self.factory = Some(routes);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn RouteResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Typed failure handler for `class` and every class below it
    pub fn failure_handler(mut self, class: FailureClass, handler: Arc<dyn FailureHandler>) -> Self {
        self.handlers.register(class, handler);
        self
    }

    /// Replace the primary chain
    pub fn stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Replace the recovery chain
    pub fn recovery_stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.recovery_stages = Some(stages);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let binding = Arc::new(BindingEngine::new(
            self.types,
            self.rules,
            self.config.binding.clone(),
        ));
        let response: Arc<dyn Stage> = Arc::new(ResponseStage::new(
            self.renderer.clone(),
            self.config.recovery.results.clone(),
        ));

        let stages = match self.stages {
            Some(stages) => stages,
            None => {
                let resolver = self.resolver.ok_or_else(|| {
                    EngineError::Assembly("a route resolver is required for the default chain".to_string())
                })?;
                let factory = self.factory.ok_or_else(|| {
                    EngineError::Assembly("a handler factory is required for the default chain".to_string())
                })?;
                vec![
                    Arc::new(RouteResolutionStage::new(resolver, factory)) as Arc<dyn Stage>,
                    Arc::new(GuardStage::new(self.policy)),
                    Arc::new(BindingStage::new(Arc::clone(&binding))),
                    Arc::new(InvocationStage),
                    Arc::clone(&response),
                ]
            }
        };
        let recovery_stages = self.recovery_stages.unwrap_or_else(|| vec![response]);

        let mut handlers = self.handlers;
        let recovery_config = &self.config.recovery;
        handlers.register_default(
            FailureClass::DELIBERATE,
            Arc::new(DeliberateFailureHandler::new(recovery_config.default_code.as_str())),
        );
        handlers.register_default(
            FailureClass::ROUTE_NOT_FOUND,
            Arc::new(StatusFailureHandler::new("not_found", 404)),
        );
        let fallback = Arc::new(DefaultFailureHandler::from_config(recovery_config));

        debug!(
            stages = stages.len(),
            recovery_stages = recovery_stages.len(),
            failure_handlers = handlers.len(),
            types = binding.types().len(),
            conversion_rules = binding.rules().len(),
            "Engine assembled"
        );

        Ok(Engine {
            recovery: RecoveryPipeline::new(handlers, fallback, recovery_stages),
            config: Arc::new(self.config),
            binding,
            stages,
        })
    }
}
