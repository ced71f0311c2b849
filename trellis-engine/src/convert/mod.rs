//! Conversion registry
//!
//! Maps raw textual values to typed values, selected by the target's
//! [`TypeId`]. The binding engine consults the registry for the declared
//! type of every field it assigns.
//!
//! # Architecture
//!
//! - [`ConversionRule`]: one target type, `&[String]` in, boxed value out
//! - [`ScalarRule`]: adapts a `&str` parser; the first raw value wins
//! - [`ConversionRegistry`]: `TypeId` → rule table, seeded from the
//!   built-in metadata in [`rules`]
//! - [`ConversionRuleProvider`]: hook for applications to contribute rules

pub mod rules;

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Conversion failures reported by the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("No conversion rule registered for {target}")]
    NoRule { target: &'static str },

    #[error("Cannot convert to {target}: {reason}")]
    Rejected {
        target: &'static str,
        reason: String,
    },
}

impl ConversionError {
    /// Human-readable reason without the target type
    pub fn reason(&self) -> &str {
        match self {
            ConversionError::NoRule { .. } => "no conversion rule registered",
            ConversionError::Rejected { reason, .. } => reason,
        }
    }
}

/// Converts raw textual values to one target type
pub trait ConversionRule: Send + Sync {
    fn target(&self) -> TypeId;

    fn target_name(&self) -> &'static str;

    /// Produce a boxed value of the target type, or a rejection reason
    fn convert(&self, values: &[String]) -> Result<Box<dyn Any + Send>, String>;
}

/// Source of application-specific conversion rules
pub trait ConversionRuleProvider {
    fn rules(&self) -> Vec<Arc<dyn ConversionRule>>;
}

type Parser<T> = Box<dyn Fn(&str) -> Result<T, String> + Send + Sync>;

/// Rule for single-valued targets built from a `&str` parser
///
/// Only the first raw value is parsed; additional values are ignored.
pub struct ScalarRule<T> {
    parse: Parser<T>,
    _target: PhantomData<fn() -> T>,
}

impl<T: Any + Send> ScalarRule<T> {
    pub fn new(parse: impl Fn(&str) -> Result<T, String> + Send + Sync + 'static) -> Self {
        Self {
            parse: Box::new(parse),
            _target: PhantomData,
        }
    }

    /// Build the rule already wrapped for registration
    pub fn shared(
        parse: impl Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    ) -> Arc<dyn ConversionRule> {
        Arc::new(Self::new(parse))
    }
}

impl<T: Any + Send> ConversionRule for ScalarRule<T> {
    fn target(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn target_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn convert(&self, values: &[String]) -> Result<Box<dyn Any + Send>, String> {
        let first = values
            .first()
            .ok_or_else(|| "no value supplied".to_string())?;
        (self.parse)(first).map(|value| Box::new(value) as Box<dyn Any + Send>)
    }
}

/// `TypeId` → conversion rule table
///
/// Shared read-only once the engine is built.
#[derive(Clone, Default)]
pub struct ConversionRegistry {
    rules: HashMap<TypeId, Arc<dyn ConversionRule>>,
}

impl ConversionRegistry {
    /// Empty registry, no rules at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with every rule in [`rules::metadata`]
    pub fn with_builtin_rules() -> Self {
        let mut registry = Self::new();
        for meta in rules::metadata() {
            registry.register((meta.build)());
        }
        debug!(rules = registry.len(), "Built-in conversion rules registered");
        registry
    }

    /// Add a rule, returning the one it replaced for the same target
    pub fn register(&mut self, rule: Arc<dyn ConversionRule>) -> Option<Arc<dyn ConversionRule>> {
        self.rules.insert(rule.target(), rule)
    }

    pub fn register_provider(&mut self, provider: &dyn ConversionRuleProvider) {
        for rule in provider.rules() {
            if let Some(replaced) = self.register(rule) {
                debug!(target = replaced.target_name(), "Conversion rule overridden by provider");
            }
        }
    }

    pub fn supports(&self, target: TypeId) -> bool {
        self.rules.contains_key(&target)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Convert to a target known only by `TypeId`
    pub fn convert_any(
        &self,
        target: TypeId,
        target_name: &'static str,
        values: &[String],
    ) -> Result<Box<dyn Any + Send>, ConversionError> {
        let rule = self
            .rules
            .get(&target)
            .ok_or(ConversionError::NoRule {
                target: target_name,
            })?;
        rule.convert(values)
            .map_err(|reason| ConversionError::Rejected {
                target: target_name,
                reason,
            })
    }

    /// Convert to `T`
    pub fn convert<T: Any>(&self, values: &[String]) -> Result<T, ConversionError> {
        let target = type_name::<T>();
        let boxed = self.convert_any(TypeId::of::<T>(), target, values)?;
        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| ConversionError::Rejected {
                target,
                reason: "rule produced a value of a different type".to_string(),
            })
    }
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<&str> = self.rules.values().map(|r| r.target_name()).collect();
        targets.sort_unstable();
        f.debug_struct("ConversionRegistry")
            .field("targets", &targets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[derive(Debug, PartialEq)]
    struct Celsius(f64);

    struct TemperatureRules;

    impl ConversionRuleProvider for TemperatureRules {
        fn rules(&self) -> Vec<Arc<dyn ConversionRule>> {
            vec![ScalarRule::shared(|s: &str| {
                s.trim()
                    .strip_suffix("C")
                    .ok_or_else(|| "expected a value like '21.5C'".to_string())?
                    .parse::<f64>()
                    .map(Celsius)
                    .map_err(|e| e.to_string())
            })]
        }
    }

    #[test]
    fn test_first_value_wins() {
        let registry = ConversionRegistry::with_builtin_rules();
        let age: u32 = registry.convert(&values(&["25", "30"])).unwrap();
        assert_eq!(age, 25);
    }

    #[test]
    fn test_empty_values_rejected() {
        let registry = ConversionRegistry::with_builtin_rules();
        let result = registry.convert::<u32>(&[]);
        assert!(matches!(result, Err(ConversionError::Rejected { .. })));
    }

    #[test]
    fn test_unknown_target_has_no_rule() {
        let registry = ConversionRegistry::with_builtin_rules();
        let result = registry.convert::<Celsius>(&values(&["21C"]));
        assert!(matches!(result, Err(ConversionError::NoRule { .. })));
        assert!(!registry.supports(TypeId::of::<Celsius>()));
    }

    #[test]
    fn test_provider_adds_rules() {
        let mut registry = ConversionRegistry::with_builtin_rules();
        let before = registry.len();
        registry.register_provider(&TemperatureRules);

        assert_eq!(registry.len(), before + 1);
        assert_eq!(
            registry.convert::<Celsius>(&values(&["21.5C"])).unwrap(),
            Celsius(21.5)
        );
        let rejected = registry.convert::<Celsius>(&values(&["hot"])).unwrap_err();
        assert_eq!(rejected.reason(), "expected a value like '21.5C'");
    }

    #[test]
    fn test_register_replaces_existing_rule() {
        let mut registry = ConversionRegistry::with_builtin_rules();
        let replaced = registry.register(ScalarRule::<bool>::shared(|s| Ok(s == "si")));
        assert!(replaced.is_some());
        assert!(registry.convert::<bool>(&values(&["si"])).unwrap());
        assert!(!registry.convert::<bool>(&values(&["true"])).unwrap());
    }
}
