//! # Trellis Engine
//!
//! Request-processing core of a server-side MVC framework:
//! - Stage chain engine (ordered, composable, single-use pipelines)
//! - Expression binding engine with a pluggable conversion registry
//! - Per-request invocation context store
//! - Recovery pipeline with typed, hierarchical failure dispatch
//!
//! **Architecture:** one thread per in-flight request, all operations
//! synchronous. [`Engine`], [`BindingEngine`] and the registries are built
//! once and shared read-only; per-request state lives in the [`Exchange`].

pub mod binding;
pub mod chain;
pub mod collaborators;
pub mod context;
pub mod convert;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod failure;
pub mod recovery;
pub mod routes;
pub mod stages;

pub use binding::{BindingEngine, BindingReport, TypeDescriptor, TypeRegistry};
pub use chain::{Chain, Flow, FnStage, Stage, StageGroup, StageResult};
pub use collaborators::{
    AccessPolicy, AsAny, BufferedResponse, Decision, Handler, HandlerFactory, Invocation,
    Renderer, Response, RouteConfig, RouteMatch, RouteResolver, View,
};
pub use context::{ContextStack, InvocationContext};
pub use convert::{ConversionError, ConversionRegistry, ConversionRule, ConversionRuleProvider, ScalarRule};
pub use engine::{Engine, EngineBuilder};
pub use error::{BindingError, EngineError, Result};
pub use exchange::{Exchange, Request, ResultStore};
pub use failure::{Failure, FailureClass, FailureOrigin, FailureRecord, RecoveryCode};
pub use recovery::{FailureHandler, FailureHandlerRegistry, RecoveryPipeline, RecoveryState};
pub use routes::RouteTable;
pub use trellis_common::{EngineConfig, Parameters, ResultConfig};
