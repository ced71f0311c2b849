//! Typed member accessors behind the descriptor table
//!
//! Each accessor knows its owner type `T` and value type `F` statically and
//! exposes them through `dyn Any` so the binding engine can walk an object
//! graph whose shape is only known at runtime.

use super::descriptor::TypeRegistry;
use super::expression::Subscript;
use crate::convert::{ConversionError, ConversionRegistry};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use thiserror::Error;

/// Shared state for one traversal
pub(crate) struct Traversal<'r> {
    pub(crate) types: &'r TypeRegistry,
    pub(crate) rules: &'r ConversionRegistry,
    pub(crate) max_index: usize,
}

impl Traversal<'_> {
    /// Create an absent intermediate through its registered constructor
    pub(crate) fn instantiate<F: Any>(&self) -> Result<F, AccessError> {
        let descriptor = self
            .types
            .get(TypeId::of::<F>())
            .ok_or(AccessError::NotInstantiable(type_name::<F>()))?;
        let made = descriptor
            .instantiate()
            .ok_or(AccessError::NotInstantiable(descriptor.name()))?;
        made.downcast::<F>()
            .map(|value| *value)
            .map_err(|_| AccessError::NotInstantiable(descriptor.name()))
    }

    fn check_index(&self, index: usize) -> Result<(), AccessError> {
        if index > self.max_index {
            Err(AccessError::IndexTooLarge {
                index,
                max: self.max_index,
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Error, Debug)]
pub(crate) enum AccessError {
    #[error("descriptor applied to a value of another type")]
    OwnerMismatch,

    #[error("member is not a list or map and takes no subscript")]
    UnexpectedSubscript,

    #[error("collection member requires a subscript")]
    MissingSubscript,

    #[error("list member requires a numeric index, got key '{0}'")]
    KeyOnList(String),

    #[error("index {index} exceeds the configured maximum {max}")]
    IndexTooLarge { index: usize, max: usize },

    #[error("{0} has no registered constructor")]
    NotInstantiable(&'static str),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Read, descend into, and assign one member of an owner value
pub(crate) trait FieldAccess: Send + Sync {
    /// Shared access; `None` when the value is absent
    fn read<'a>(
        &self,
        owner: &'a dyn Any,
        subscript: Option<&Subscript>,
    ) -> Result<Option<&'a dyn Any>, AccessError>;

    /// Mutable access to an intermediate, creating it when absent
    fn descend<'a>(
        &self,
        owner: &'a mut dyn Any,
        subscript: Option<&Subscript>,
        traversal: &Traversal<'_>,
    ) -> Result<&'a mut dyn Any, AccessError>;

    /// Convert `values` to the member's type and store the result
    fn assign(
        &self,
        owner: &mut dyn Any,
        subscript: Option<&Subscript>,
        values: &[String],
        traversal: &Traversal<'_>,
    ) -> Result<(), AccessError>;
}

fn owner_ref<T: Any>(owner: &dyn Any) -> Result<&T, AccessError> {
    owner.downcast_ref::<T>().ok_or(AccessError::OwnerMismatch)
}

fn owner_mut<T: Any>(owner: &mut dyn Any) -> Result<&mut T, AccessError> {
    owner.downcast_mut::<T>().ok_or(AccessError::OwnerMismatch)
}

fn no_subscript(subscript: Option<&Subscript>) -> Result<(), AccessError> {
    match subscript {
        None => Ok(()),
        Some(_) => Err(AccessError::UnexpectedSubscript),
    }
}

fn index_of(subscript: Option<&Subscript>) -> Result<usize, AccessError> {
    match subscript {
        Some(Subscript::Index(index)) => Ok(*index),
        Some(Subscript::Key(key)) => Err(AccessError::KeyOnList(key.clone())),
        None => Err(AccessError::MissingSubscript),
    }
}

fn key_of(subscript: Option<&Subscript>) -> Result<String, AccessError> {
    match subscript {
        Some(Subscript::Key(key)) => Ok(key.clone()),
        Some(Subscript::Index(index)) => Ok(index.to_string()),
        None => Err(AccessError::MissingSubscript),
    }
}

// ============================================================================
// Plain: F
// ============================================================================

pub(crate) struct Plain<T, F> {
    pub(crate) get: fn(&T) -> &F,
    pub(crate) get_mut: fn(&mut T) -> &mut F,
}

impl<T: Any, F: Any> FieldAccess for Plain<T, F> {
    fn read<'a>(
        &self,
        owner: &'a dyn Any,
        subscript: Option<&Subscript>,
    ) -> Result<Option<&'a dyn Any>, AccessError> {
        no_subscript(subscript)?;
        let value = (self.get)(owner_ref::<T>(owner)?);
        Ok(Some(value as &dyn Any))
    }

    fn descend<'a>(
        &self,
        owner: &'a mut dyn Any,
        subscript: Option<&Subscript>,
        _traversal: &Traversal<'_>,
    ) -> Result<&'a mut dyn Any, AccessError> {
        no_subscript(subscript)?;
        Ok((self.get_mut)(owner_mut::<T>(owner)?))
    }

    fn assign(
        &self,
        owner: &mut dyn Any,
        subscript: Option<&Subscript>,
        values: &[String],
        traversal: &Traversal<'_>,
    ) -> Result<(), AccessError> {
        no_subscript(subscript)?;
        let value = traversal.rules.convert::<F>(values)?;
        *(self.get_mut)(owner_mut::<T>(owner)?) = value;
        Ok(())
    }
}

// ============================================================================
// Optional: Option<F>
// ============================================================================

pub(crate) struct Optional<T, F> {
    pub(crate) get: fn(&T) -> &Option<F>,
    pub(crate) get_mut: fn(&mut T) -> &mut Option<F>,
}

impl<T: Any, F: Any> FieldAccess for Optional<T, F> {
    fn read<'a>(
        &self,
        owner: &'a dyn Any,
        subscript: Option<&Subscript>,
    ) -> Result<Option<&'a dyn Any>, AccessError> {
        no_subscript(subscript)?;
        let slot = (self.get)(owner_ref::<T>(owner)?);
        Ok(slot.as_ref().map(|value| value as &dyn Any))
    }

    fn descend<'a>(
        &self,
        owner: &'a mut dyn Any,
        subscript: Option<&Subscript>,
        traversal: &Traversal<'_>,
    ) -> Result<&'a mut dyn Any, AccessError> {
        no_subscript(subscript)?;
        let slot = (self.get_mut)(owner_mut::<T>(owner)?);
        let value = match slot.take() {
            Some(existing) => existing,
            None => traversal.instantiate::<F>()?,
        };
        Ok(slot.insert(value))
    }

    fn assign(
        &self,
        owner: &mut dyn Any,
        subscript: Option<&Subscript>,
        values: &[String],
        traversal: &Traversal<'_>,
    ) -> Result<(), AccessError> {
        no_subscript(subscript)?;
        let value = traversal.rules.convert::<F>(values)?;
        *(self.get_mut)(owner_mut::<T>(owner)?) = Some(value);
        Ok(())
    }
}

// ============================================================================
// List: Vec<F>
// ============================================================================

pub(crate) struct List<T, F> {
    pub(crate) get: fn(&T) -> &Vec<F>,
    pub(crate) get_mut: fn(&mut T) -> &mut Vec<F>,
}

impl<T: Any, F: Any + Default> List<T, F> {
    fn slot<'a>(
        &self,
        owner: &'a mut dyn Any,
        index: usize,
        traversal: &Traversal<'_>,
    ) -> Result<&'a mut F, AccessError> {
        traversal.check_index(index)?;
        let list = (self.get_mut)(owner_mut::<T>(owner)?);
        if list.len() <= index {
            list.resize_with(index + 1, F::default);
        }
        Ok(&mut list[index])
    }
}

impl<T: Any, F: Any + Default> FieldAccess for List<T, F> {
    fn read<'a>(
        &self,
        owner: &'a dyn Any,
        subscript: Option<&Subscript>,
    ) -> Result<Option<&'a dyn Any>, AccessError> {
        let list = (self.get)(owner_ref::<T>(owner)?);
        match subscript {
            None => Ok(Some(list as &dyn Any)),
            Some(_) => {
                let index = index_of(subscript)?;
                Ok(list.get(index).map(|value| value as &dyn Any))
            }
        }
    }

    fn descend<'a>(
        &self,
        owner: &'a mut dyn Any,
        subscript: Option<&Subscript>,
        traversal: &Traversal<'_>,
    ) -> Result<&'a mut dyn Any, AccessError> {
        let index = index_of(subscript)?;
        Ok(self.slot(owner, index, traversal)?)
    }

    fn assign(
        &self,
        owner: &mut dyn Any,
        subscript: Option<&Subscript>,
        values: &[String],
        traversal: &Traversal<'_>,
    ) -> Result<(), AccessError> {
        match subscript {
            None => {
                let converted = values
                    .iter()
                    .map(|value| traversal.rules.convert::<F>(std::slice::from_ref(value)))
                    .collect::<Result<Vec<F>, _>>()?;
                *(self.get_mut)(owner_mut::<T>(owner)?) = converted;
            }
            Some(_) => {
                let index = index_of(subscript)?;
                traversal.check_index(index)?;
                let value = traversal.rules.convert::<F>(values)?;
                *self.slot(owner, index, traversal)? = value;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Map: HashMap<String, F>
// ============================================================================

pub(crate) struct Map<T, F> {
    pub(crate) get: fn(&T) -> &HashMap<String, F>,
    pub(crate) get_mut: fn(&mut T) -> &mut HashMap<String, F>,
}

impl<T: Any, F: Any + Default> FieldAccess for Map<T, F> {
    fn read<'a>(
        &self,
        owner: &'a dyn Any,
        subscript: Option<&Subscript>,
    ) -> Result<Option<&'a dyn Any>, AccessError> {
        let map = (self.get)(owner_ref::<T>(owner)?);
        match subscript {
            None => Ok(Some(map as &dyn Any)),
            Some(_) => {
                let key = key_of(subscript)?;
                Ok(map.get(&key).map(|value| value as &dyn Any))
            }
        }
    }

    fn descend<'a>(
        &self,
        owner: &'a mut dyn Any,
        subscript: Option<&Subscript>,
        _traversal: &Traversal<'_>,
    ) -> Result<&'a mut dyn Any, AccessError> {
        let key = key_of(subscript)?;
        let map = (self.get_mut)(owner_mut::<T>(owner)?);
        Ok(map.entry(key).or_default())
    }

    fn assign(
        &self,
        owner: &mut dyn Any,
        subscript: Option<&Subscript>,
        values: &[String],
        traversal: &Traversal<'_>,
    ) -> Result<(), AccessError> {
        let key = key_of(subscript)?;
        let value = traversal.rules.convert::<F>(values)?;
        (self.get_mut)(owner_mut::<T>(owner)?).insert(key, value);
        Ok(())
    }
}
