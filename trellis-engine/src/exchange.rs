//! Per-request state threaded through every stage

use crate::binding::BindingReport;
use crate::collaborators::Response;
use crate::context::ContextStack;
use crate::failure::{FailureRecord, RecoveryCode};
use crate::recovery::RecoveryState;
use std::any::Any;
use std::fmt;
use trellis_common::Parameters;
use uuid::Uuid;

/// Inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    id: Uuid,
    method: String,
    uri: String,
    parameters: Parameters,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            uri: uri.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.append(name, value);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
}

/// What the request produced, read by response generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStore {
    outcome: Option<String>,
    recovery_code: Option<RecoveryCode>,
    messages: Vec<String>,
    failure: Option<FailureRecord>,
}

impl ResultStore {
    /// Outcome name returned by the handler
    pub fn outcome(&self) -> Option<&str> {
        self.outcome.as_deref()
    }

    pub fn set_outcome(&mut self, outcome: impl Into<String>) {
        self.outcome = Some(outcome.into());
    }

    /// Code chosen by the recovery pipeline
    pub fn recovery_code(&self) -> Option<&RecoveryCode> {
        self.recovery_code.as_ref()
    }

    pub fn set_recovery_code(&mut self, code: RecoveryCode) {
        self.recovery_code = Some(code);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<String> {
        &mut self.messages
    }

    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// The failure that triggered recovery
    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    pub fn set_failure(&mut self, record: FailureRecord) {
        self.failure = Some(record);
    }
}

/// One request in flight
///
/// Fields are public so stages can borrow disjoint parts at once (the
/// current handler mutably while reading the request parameters).
pub struct Exchange {
    pub request: Request,
    pub response: Box<dyn Response>,
    pub contexts: ContextStack,
    pub result: ResultStore,
    pub binding: BindingReport,
    pub recovery: RecoveryState,
}

impl Exchange {
    pub fn new(request: Request, response: Box<dyn Response>) -> Self {
        Self {
            request,
            response,
            contexts: ContextStack::new(),
            result: ResultStore::default(),
            binding: BindingReport::default(),
            recovery: RecoveryState::Normal,
        }
    }

    /// Downcast the response sink to its concrete type
    pub fn response_as<R: Any>(&self) -> Option<&R> {
        self.response.as_ref().as_any().downcast_ref::<R>()
    }

    pub fn response_as_mut<R: Any>(&mut self) -> Option<&mut R> {
        self.response.as_mut().as_any_mut().downcast_mut::<R>()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("request", &self.request)
            .field("status", &self.response.status())
            .field("contexts", &self.contexts.depth())
            .field("result", &self.result)
            .field("binding", &self.binding)
            .field("recovery", &self.recovery)
            .finish()
    }
}
