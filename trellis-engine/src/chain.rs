//! Stage chain engine
//!
//! A [`Chain`] is a single-use cursor over a fixed slice of stages. A stage
//! continues the pipeline by calling [`Chain::proceed`]; returning without
//! calling it halts the remainder of the chain and of every enclosing chain.
//!
//! # Architecture
//!
//! - [`Stage`]: unit of work, stateless and shared by every request
//! - [`Flow`]: how a chain finished (completed, halted, short-circuited)
//! - [`Continuation`]: what an exhausted chain resumes, which lets a
//!   nested chain ([`StageGroup`]) hand control back to its parent
//! - Failures propagate as `Err(Failure)`, tagged with the innermost
//!   failing stage

use crate::exchange::Exchange;
use crate::failure::{Failure, RecoveryCode};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

pub type StageResult = Result<Flow, Failure>;

/// How a chain finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Every stage ran
    Completed,
    /// A stage stopped the pipeline without error
    Halted { stage: &'static str },
    /// A stage stopped the pipeline and asked for recovery under `code`
    ShortCircuit {
        stage: &'static str,
        code: RecoveryCode,
        message: Option<String>,
    },
}

impl Flow {
    pub fn is_completed(&self) -> bool {
        matches!(self, Flow::Completed)
    }
}

/// Unit of work in a chain
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Do this stage's work; call `chain.proceed(exchange)` to continue
    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult;
}

/// Something that can resume the pipeline
pub trait Continuation {
    fn proceed(&mut self, exchange: &mut Exchange) -> StageResult;
}

/// Cursor over an ordered stage sequence
pub struct Chain<'a> {
    label: &'static str,
    stages: &'a [Arc<dyn Stage>],
    cursor: usize,
    outer: Option<&'a mut dyn Continuation>,
}

impl<'a> Chain<'a> {
    pub fn new(label: &'static str, stages: &'a [Arc<dyn Stage>]) -> Self {
        Self {
            label,
            stages,
            cursor: 0,
            outer: None,
        }
    }

    /// Chain that resumes `outer` once its own stages are exhausted
    pub fn nested(
        label: &'static str,
        stages: &'a [Arc<dyn Stage>],
        outer: &'a mut dyn Continuation,
    ) -> Self {
        Self {
            label,
            stages,
            cursor: 0,
            outer: Some(outer),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Stages not yet entered
    pub fn remaining(&self) -> usize {
        self.stages.len().saturating_sub(self.cursor)
    }

    /// Invoke the next stage, or resume the enclosing chain when none remain
    pub fn proceed(&mut self, exchange: &mut Exchange) -> StageResult {
        let stages = self.stages;
        match stages.get(self.cursor) {
            Some(stage) => {
                self.cursor += 1;
                trace!(chain = self.label, stage = stage.name(), "Entering stage");
                stage
                    .perform(self, exchange)
                    .map_err(|failure| failure.within(stage.name()))
            }
            None => match self.outer.as_mut() {
                Some(outer) => {
                    trace!(chain = self.label, "Chain exhausted, resuming enclosing chain");
                    outer.proceed(exchange)
                }
                None => Ok(Flow::Completed),
            },
        }
    }
}

impl Continuation for Chain<'_> {
    fn proceed(&mut self, exchange: &mut Exchange) -> StageResult {
        Chain::proceed(self, exchange)
    }
}

impl fmt::Debug for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("label", &self.label)
            .field("stages", &self.stages.len())
            .field("cursor", &self.cursor)
            .field("nested", &self.outer.is_some())
            .finish()
    }
}

/// Stage backed by a closure
pub struct FnStage<F> {
    name: &'static str,
    run: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut Chain<'_>, &mut Exchange) -> StageResult + Send + Sync + 'static,
{
    pub fn new(name: &'static str, run: F) -> Self {
        Self { name, run }
    }

    pub fn shared(name: &'static str, run: F) -> Arc<dyn Stage> {
        Arc::new(Self::new(name, run))
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&mut Chain<'_>, &mut Exchange) -> StageResult + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult {
        (self.run)(chain, exchange)
    }
}

/// Bounded sub-sequence run as a single stage
///
/// When the group's stages complete, control resumes the enclosing chain.
pub struct StageGroup {
    label: &'static str,
    stages: Vec<Arc<dyn Stage>>,
}

impl StageGroup {
    pub fn new(label: &'static str, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { label, stages }
    }
}

impl Stage for StageGroup {
    fn name(&self) -> &'static str {
        self.label
    }

    fn perform(&self, chain: &mut Chain<'_>, exchange: &mut Exchange) -> StageResult {
        let mut inner = Chain::nested(self.label, &self.stages, chain);
        inner.proceed(exchange)
    }
}
