//! Explicit per-type descriptor table
//!
//! Every type the binding engine can traverse is registered once with a
//! [`TypeDescriptor`] listing its bindable members. A member's accessor and
//! mutator are plain function pointers, so descriptors are `Send + Sync`
//! and can be shared by every request.
//!
//! ```rust
//! # use trellis_engine::binding::{TypeDescriptor, TypeRegistry};
//! #[derive(Default)]
//! struct Address {
//!     street: String,
//! }
//!
//! #[derive(Default)]
//! struct User {
//!     name: String,
//!     address: Option<Address>,
//!     tags: Vec<String>,
//! }
//!
//! let types = TypeRegistry::new()
//!     .with(
//!         TypeDescriptor::of::<User>()
//!             .instantiable()
//!             .field("name", |u| &u.name, |u| &mut u.name)
//!             .optional("address", |u| &u.address, |u| &mut u.address)
//!             .list("tags", |u| &u.tags, |u| &mut u.tags)
//!             .build(),
//!     )
//!     .with(
//!         TypeDescriptor::of::<Address>()
//!             .instantiable()
//!             .field("street", |a| &a.street, |a| &mut a.street)
//!             .build(),
//!     );
//!
//! assert!(types.get_type::<User>().unwrap().field("address").is_some());
//! ```

use super::access::{FieldAccess, List, Map, Optional, Plain};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// How a member holds its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// `F`
    Plain,
    /// `Option<F>`, created on demand when traversed
    Optional,
    /// `Vec<F>`, addressed by index
    List,
    /// `HashMap<String, F>`, addressed by key
    Map,
}

/// One bindable member of a registered type
pub struct FieldDescriptor {
    name: &'static str,
    shape: FieldShape,
    value_type: TypeId,
    value_type_name: &'static str,
    pub(crate) access: Box<dyn FieldAccess>,
}

impl FieldDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> FieldShape {
        self.shape
    }

    /// Type of the value (element type for lists and maps)
    pub fn value_type(&self) -> TypeId {
        self.value_type
    }

    pub fn value_type_name(&self) -> &'static str {
        self.value_type_name
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.shape, FieldShape::List | FieldShape::Map)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("value_type", &self.value_type_name)
            .finish()
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// Bindable members of one type, plus its constructor if it has one
pub struct TypeDescriptor {
    name: &'static str,
    type_id: TypeId,
    constructor: Option<Constructor>,
    fields: HashMap<&'static str, Arc<FieldDescriptor>>,
}

impl TypeDescriptor {
    /// Start describing `T`
    pub fn of<T: Any + Send>() -> TypeBuilder<T> {
        TypeBuilder {
            descriptor: TypeDescriptor {
                name: type_name::<T>(),
                type_id: TypeId::of::<T>(),
                constructor: None,
                fields: HashMap::new(),
            },
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().map(Arc::as_ref)
    }

    /// Whether intermediates of this type can be created on demand
    pub fn is_instantiable(&self) -> bool {
        self.constructor.is_some()
    }

    pub(crate) fn instantiate(&self) -> Option<Box<dyn Any + Send>> {
        self.constructor.as_ref().map(|make| make())
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<&str> = self.fields.keys().copied().collect();
        fields.sort_unstable();
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("instantiable", &self.is_instantiable())
            .field("fields", &fields)
            .finish()
    }
}

/// Builder returned by [`TypeDescriptor::of`]
pub struct TypeBuilder<T> {
    descriptor: TypeDescriptor,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send> TypeBuilder<T> {
    /// Constructor used when an absent intermediate of this type is traversed
    pub fn constructor(mut self, make: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.descriptor.constructor = Some(Box::new(move || Box::new(make()) as Box<dyn Any + Send>));
        self
    }

    /// Use `T::default()` as the constructor
    pub fn instantiable(self) -> Self
    where
        T: Default,
    {
        self.constructor(T::default)
    }

    /// Member held directly
    pub fn field<F: Any>(self, name: &'static str, get: fn(&T) -> &F, get_mut: fn(&mut T) -> &mut F) -> Self {
        self.member::<F>(name, FieldShape::Plain, Box::new(Plain { get, get_mut }))
    }

    /// Member held as `Option<F>`
    pub fn optional<F: Any + Send>(
        self,
        name: &'static str,
        get: fn(&T) -> &Option<F>,
        get_mut: fn(&mut T) -> &mut Option<F>,
    ) -> Self {
        self.member::<F>(name, FieldShape::Optional, Box::new(Optional { get, get_mut }))
    }

    /// Member held as `Vec<F>`; growth fills gaps with `F::default()`
    pub fn list<F: Any + Default>(
        self,
        name: &'static str,
        get: fn(&T) -> &Vec<F>,
        get_mut: fn(&mut T) -> &mut Vec<F>,
    ) -> Self {
        self.member::<F>(name, FieldShape::List, Box::new(List { get, get_mut }))
    }

    /// Member held as `HashMap<String, F>`
    pub fn map<F: Any + Default>(
        self,
        name: &'static str,
        get: fn(&T) -> &HashMap<String, F>,
        get_mut: fn(&mut T) -> &mut HashMap<String, F>,
    ) -> Self {
        self.member::<F>(name, FieldShape::Map, Box::new(Map { get, get_mut }))
    }

    fn member<F: Any>(mut self, name: &'static str, shape: FieldShape, access: Box<dyn FieldAccess>) -> Self {
        let field = FieldDescriptor {
            name,
            shape,
            value_type: TypeId::of::<F>(),
            value_type_name: type_name::<F>(),
            access,
        };
        self.descriptor.fields.insert(name, Arc::new(field));
        self
    }

    pub fn build(self) -> TypeDescriptor {
        self.descriptor
    }
}

/// `TypeId` → descriptor table
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor, replacing any earlier one for the same type
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.type_id, descriptor);
    }

    /// Builder-style [`TypeRegistry::register`]
    pub fn with(mut self, descriptor: TypeDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, type_id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(&type_id)
    }

    pub fn get_type<T: Any>(&self) -> Option<&TypeDescriptor> {
        self.get(TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.types.values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Order {
        reference: String,
        note: Option<String>,
        lines: Vec<u32>,
        attributes: HashMap<String, String>,
    }

    struct Opaque;

    fn order_descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Order>()
            .instantiable()
            .field("reference", |o| &o.reference, |o| &mut o.reference)
            .optional("note", |o| &o.note, |o| &mut o.note)
            .list("lines", |o| &o.lines, |o| &mut o.lines)
            .map("attributes", |o| &o.attributes, |o| &mut o.attributes)
            .build()
    }

    #[test]
    fn test_builder_records_shapes_and_value_types() {
        let descriptor = order_descriptor();
        assert_eq!(descriptor.fields().count(), 4);

        let lines = descriptor.field("lines").unwrap();
        assert_eq!(lines.shape(), FieldShape::List);
        assert_eq!(lines.value_type(), TypeId::of::<u32>());
        assert!(lines.is_collection());

        let note = descriptor.field("note").unwrap();
        assert_eq!(note.shape(), FieldShape::Optional);
        assert_eq!(note.value_type(), TypeId::of::<String>());
        assert!(!note.is_collection());
    }

    #[test]
    fn test_instantiate_uses_constructor() {
        let descriptor = order_descriptor();
        let made = descriptor.instantiate().unwrap();
        assert!(made.downcast_ref::<Order>().is_some());
    }

    #[test]
    fn test_type_without_constructor_is_not_instantiable() {
        let descriptor = TypeDescriptor::of::<Opaque>().build();
        assert!(!descriptor.is_instantiable());
        assert!(descriptor.instantiate().is_none());
    }

    #[test]
    fn test_registry_lookup_by_type() {
        let types = TypeRegistry::new()
            .with(order_descriptor())
            .with(TypeDescriptor::of::<Opaque>().build());
        assert_eq!(types.len(), 2);
        assert!(types.get_type::<Order>().is_some());
        assert!(types.get_type::<String>().is_none());
    }
}
