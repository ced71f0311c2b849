//! Expression binding engine
//!
//! Evaluates and assigns dotted/indexed path expressions against object
//! graphs described by a [`TypeRegistry`], converting raw text through a
//! [`ConversionRegistry`].
//!
//! # Architecture
//!
//! - [`expression`]: path parsing (`user.tags[2]`, `prefs['theme']`)
//! - [`descriptor`]: per-type descriptor table, built once at startup
//! - `access`: typed accessors for plain, optional, list and map members
//! - [`BindingEngine`]: resolution (member chains cached per root type and
//!   subscript-free shape), read traversal, mutating traversal with
//!   auto-vivification, and the request-wide [`BindingEngine::bind`] pass
//!
//! Binding never rolls back: intermediates created along a path stay in
//! place when a later segment or the final conversion fails.

mod access;
pub mod descriptor;
pub mod expression;

pub use descriptor::{FieldDescriptor, FieldShape, TypeBuilder, TypeDescriptor, TypeRegistry};
pub use expression::{Expression, PathSegment, Subscript};

use crate::convert::ConversionRegistry;
use crate::error::BindingError;
use crate::failure::FailureRecord;
use access::{AccessError, Traversal};
use serde_json::json;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};
use trellis_common::config::BindingConfig;
use trellis_common::Parameters;

/// Expression with every segment paired to the member it addresses
#[derive(Debug)]
struct ResolvedExpression {
    expression: Expression,
    fields: Arc<[Arc<FieldDescriptor>]>,
}

impl ResolvedExpression {
    fn steps(&self) -> impl Iterator<Item = (&PathSegment, &FieldDescriptor)> {
        self.expression
            .segments()
            .iter()
            .zip(self.fields.iter().map(Arc::as_ref))
    }
}

/// Root type plus [`Expression::shape`]; subscript values never reach the key
type CacheKey = (TypeId, String);

/// Path-expression evaluator and binder
///
/// Shared by every request; the member-chain cache is the only mutable
/// state.
pub struct BindingEngine {
    types: TypeRegistry,
    rules: ConversionRegistry,
    options: BindingConfig,
    cache: RwLock<HashMap<CacheKey, Arc<[Arc<FieldDescriptor>]>>>,
}

impl BindingEngine {
    pub fn new(types: TypeRegistry, rules: ConversionRegistry, options: BindingConfig) -> Self {
        Self {
            types,
            rules,
            options,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn rules(&self) -> &ConversionRegistry {
        &self.rules
    }

    pub fn options(&self) -> &BindingConfig {
        &self.options
    }

    /// Number of resolved member chains held in the cache
    ///
    /// Paths differing only in subscripts (`tags[1]`, `tags[2]`,
    /// `prefs['a']`) share one entry.
    pub fn cached_expressions(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn resolve(&self, root_type: TypeId, path: &str) -> Result<ResolvedExpression, BindingError> {
        let expression = Expression::parse(path)?;
        let key = (root_type, expression.shape());

        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let fields = match cached {
            Some(fields) => fields,
            None => {
                let fields: Arc<[Arc<FieldDescriptor>]> =
                    self.resolve_members(root_type, &expression)?.into();
                trace!(shape = %key.1, "Resolved member chain cached");
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, Arc::clone(&fields));
                fields
            }
        };

        for (segment, field) in expression.segments().iter().zip(fields.iter()) {
            if let (FieldShape::List, Some(Subscript::Index(index))) =
                (field.shape(), segment.subscript())
            {
                if *index > self.options.max_index {
                    return Err(BindingError::resolution(
                        path,
                        segment.to_string(),
                        format!(
                            "index {} exceeds the configured maximum {}",
                            index, self.options.max_index
                        ),
                    ));
                }
            }
        }

        Ok(ResolvedExpression { expression, fields })
    }

    fn resolve_members(
        &self,
        root_type: TypeId,
        expression: &Expression,
    ) -> Result<Vec<Arc<FieldDescriptor>>, BindingError> {
        let path = expression.source();
        let mut fields = Vec::with_capacity(expression.len());
        let mut current = root_type;
        let mut current_name = "root";
        let last = expression.len() - 1;

        for (position, segment) in expression.segments().iter().enumerate() {
            let descriptor = self.types.get(current).ok_or_else(|| {
                BindingError::resolution(
                    path,
                    segment.to_string(),
                    format!("{} is not a registered type", current_name),
                )
            })?;
            let field = descriptor.field(segment.name()).ok_or_else(|| {
                BindingError::resolution(
                    path,
                    segment.to_string(),
                    format!("{} has no member '{}'", descriptor.name(), segment.name()),
                )
            })?;

            if segment.subscript().is_some() && !field.is_collection() {
                return Err(BindingError::resolution(
                    path,
                    segment.to_string(),
                    format!("member '{}' is not a list or map", field.name()),
                ));
            }
            if position < last && segment.subscript().is_none() && field.is_collection() {
                return Err(BindingError::resolution(
                    path,
                    segment.to_string(),
                    format!("collection member '{}' requires a subscript", field.name()),
                ));
            }

            current = field.value_type();
            current_name = field.value_type_name();
            fields.push(Arc::clone(field));
        }
        Ok(fields)
    }

    /// Read the value a path addresses
    ///
    /// An absent intermediate is a resolution error; an absent terminal
    /// (empty `Option`, index past the end, missing key) is `Ok(None)`.
    pub fn evaluate<'a>(&self, path: &str, root: &'a dyn Any) -> Result<Option<&'a dyn Any>, BindingError> {
        let resolved = self.resolve((*root).type_id(), path)?;
        let last = resolved.fields.len() - 1;
        let mut current = root;

        for (position, (segment, field)) in resolved.steps().enumerate() {
            let value = field
                .access
                .read(current, segment.subscript())
                .map_err(|e| access_failure(path, segment, field, &[], e))?;
            match value {
                Some(value) if position == last => return Ok(Some(value)),
                Some(value) => current = value,
                None if position == last => return Ok(None),
                None => {
                    return Err(BindingError::resolution(
                        path,
                        segment.to_string(),
                        "intermediate value is absent",
                    ))
                }
            }
        }
        Ok(Some(current))
    }

    /// [`BindingEngine::evaluate`] followed by a downcast to `V`
    pub fn evaluate_as<'a, V: Any>(&self, path: &str, root: &'a dyn Any) -> Result<Option<&'a V>, BindingError> {
        match self.evaluate(path, root)? {
            None => Ok(None),
            Some(value) => value.downcast_ref::<V>().map(Some).ok_or_else(|| {
                BindingError::resolution(
                    path,
                    path,
                    format!("value is not a {}", type_name::<V>()),
                )
            }),
        }
    }

    /// Convert `values` and store them at `path`, creating absent
    /// intermediates along the way
    pub fn assign(&self, path: &str, root: &mut dyn Any, values: &[String]) -> Result<(), BindingError> {
        let resolved = self.resolve((*root).type_id(), path)?;
        let traversal = Traversal {
            types: &self.types,
            rules: &self.rules,
            max_index: self.options.max_index,
        };

        let steps: Vec<(&PathSegment, &FieldDescriptor)> = resolved.steps().collect();
        let Some(((segment, field), intermediates)) = steps.split_last() else {
            return Err(BindingError::resolution(path, "", "empty expression"));
        };

        let mut current = root;
        for (segment, field) in intermediates {
            current = field
                .access
                .descend(current, segment.subscript(), &traversal)
                .map_err(|e| access_failure(path, segment, field, values, e))?;
        }

        field
            .access
            .assign(current, segment.subscript(), values, &traversal)
            .map_err(|e| access_failure(path, segment, field, values, e))
    }

    /// Assign every parameter independently, collecting per-field results
    ///
    /// Parameters are processed in arrival order. With
    /// `ignore_unknown_parameters`, a parameter whose first segment names no
    /// member of the root type is skipped rather than recorded as a failure.
    pub fn bind(&self, root: &mut dyn Any, parameters: &Parameters) -> BindingReport {
        let root_type = (*root).type_id();
        let mut report = BindingReport::default();

        for (name, values) in parameters.iter() {
            if self.options.ignore_unknown_parameters && !self.names_member(root_type, name) {
                debug!(parameter = name, "Skipping parameter with no matching member");
                report.skipped.push(name.to_string());
                continue;
            }
            match self.assign(name, root, values) {
                Ok(()) => {
                    trace!(parameter = name, "Bound");
                    report.bound.push(name.to_string());
                }
                Err(e) => {
                    debug!(parameter = name, error = %e, "Binding failed");
                    report.failures.push(e);
                }
            }
        }
        report
    }

    /// Whether the first segment of `path` names a member of the root type
    ///
    /// Unregistered root types answer `true` so the failure is recorded.
    fn names_member(&self, root_type: TypeId, path: &str) -> bool {
        let head = path.split(['.', '[']).next().unwrap_or(path);
        self.types
            .get(root_type)
            .map_or(true, |descriptor| descriptor.field(head).is_some())
    }
}

fn access_failure(
    path: &str,
    segment: &PathSegment,
    field: &FieldDescriptor,
    values: &[String],
    error: AccessError,
) -> BindingError {
    match error {
        AccessError::Conversion(e) => BindingError::Conversion {
            path: path.to_string(),
            values: values.to_vec(),
            target: field.value_type_name(),
            reason: e.reason().to_string(),
        },
        other => BindingError::resolution(path, segment.to_string(), other.to_string()),
    }
}

/// Outcome of one binding pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingReport {
    bound: Vec<String>,
    skipped: Vec<String>,
    failures: Vec<BindingError>,
}

impl BindingReport {
    /// Paths assigned successfully
    pub fn bound(&self) -> &[String] {
        &self.bound
    }

    /// Parameters ignored because they named no member
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn failures(&self) -> &[BindingError] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_for(&self, path: &str) -> Option<&BindingError> {
        self.failures.iter().find(|f| f.path() == path)
    }

    /// Append another pass's results (URI parameters after request parameters)
    pub fn merge(&mut self, other: BindingReport) {
        self.bound.extend(other.bound);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }

    pub fn records(&self) -> Vec<FailureRecord> {
        self.failures.iter().map(BindingError::record).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "bound": self.bound,
            "skipped": self.skipped,
            "failures": self.records(),
        })
    }
}
