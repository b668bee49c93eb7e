//! Object cells, property descriptors and the ordinary object operations.
//!
//! Every operation on an [`ObjectRef`] first checks for a proxy and routes
//! through its handler (with invariant checks, see [`super::proxy`]);
//! otherwise the ordinary algorithm runs against the object's own state.
//! No `RefCell` borrow is held across a call into another object, so traps,
//! getters and setters may freely re-enter.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use super::RealmId;
use super::proxy::{self, ProxyHandler};
use super::value::{PropertyKey, Value};
use crate::error::{Error, Result};

/// Upper bound on prototype chain walks.
pub(crate) const MAX_PROTOTYPE_CHAIN_DEPTH: usize = 1024;

/// Native call behaviour: `(this, args) -> result`.
pub type NativeCall = Rc<dyn Fn(&Value, &[Value]) -> Result<Value>>;

/// Native construct behaviour: `(args, new_target) -> result`.
pub type NativeConstruct = Rc<dyn Fn(&[Value], &ObjectRef) -> Result<Value>>;

/// A function implemented by a Rust closure.
#[derive(Clone)]
pub struct NativeFunction {
    pub(crate) name: String,
    pub(crate) call: NativeCall,
    pub(crate) construct: Option<NativeConstruct>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("constructor", &self.construct.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// A complete property descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDescriptor {
    /// Data property
    Data {
        /// Stored value
        value: Value,
        /// `[[Writable]]`
        writable: bool,
        /// `[[Enumerable]]`
        enumerable: bool,
        /// `[[Configurable]]`
        configurable: bool,
    },
    /// Accessor property
    Accessor {
        /// Getter function
        get: Option<ObjectRef>,
        /// Setter function
        set: Option<ObjectRef>,
        /// `[[Enumerable]]`
        enumerable: bool,
        /// `[[Configurable]]`
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Writable, enumerable, configurable data property.
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable, configurable, non-enumerable data property.
    pub fn hidden(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Enumerable, configurable accessor property.
    pub fn accessor(get: Option<ObjectRef>, set: Option<ObjectRef>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    /// `[[Configurable]]`.
    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    /// `[[Enumerable]]`.
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    /// Accessor descriptor?
    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    /// The stored value of a data descriptor.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    pub(crate) fn is_frozen_data(&self) -> bool {
        matches!(
            self,
            Self::Data {
                writable: false,
                configurable: false,
                ..
            }
        )
    }
}

// ---------------------------------------------------------------------------
// Object cells
// ---------------------------------------------------------------------------

/// Internal kind of an object, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// Plain object
    Ordinary,
    /// Array exotic object
    Array,
    /// Date object
    Date,
    /// Error object
    Error,
    /// String wrapper
    String,
    /// Number wrapper
    Number,
    /// Boolean wrapper
    Boolean,
    /// Callable object
    Function,
    /// Proxy exotic object
    Proxy,
}

#[derive(Clone)]
pub(crate) struct ProxySlot {
    pub(crate) target: ObjectRef,
    pub(crate) handler: Rc<dyn ProxyHandler>,
}

#[derive(Clone)]
pub(crate) enum ObjectKind {
    Ordinary,
    Array,
    Date(f64),
    Error,
    String(String),
    Number(f64),
    Boolean(bool),
    Function(NativeFunction),
    Proxy(ProxySlot),
}

impl ObjectKind {
    fn class(&self) -> ObjectClass {
        match self {
            Self::Ordinary => ObjectClass::Ordinary,
            Self::Array => ObjectClass::Array,
            Self::Date(_) => ObjectClass::Date,
            Self::Error => ObjectClass::Error,
            Self::String(_) => ObjectClass::String,
            Self::Number(_) => ObjectClass::Number,
            Self::Boolean(_) => ObjectClass::Boolean,
            Self::Function(_) => ObjectClass::Function,
            Self::Proxy(_) => ObjectClass::Proxy,
        }
    }
}

struct ObjectState {
    kind: ObjectKind,
    prototype: Option<ObjectRef>,
    extensible: bool,
    properties: Vec<(PropertyKey, PropertyDescriptor)>,
}

impl ObjectState {
    fn position(&self, key: &PropertyKey) -> Option<usize> {
        self.properties.iter().position(|(k, _)| k == key)
    }

    fn array_length(&self) -> Option<u32> {
        let length = PropertyKey::from("length");
        self.properties.iter().find_map(|(k, d)| match d {
            PropertyDescriptor::Data { value, .. } if *k == length => Some(value.to_number() as u32),
            _ => None,
        })
    }

    fn set_array_length(&mut self, new_length: u32) {
        for (key, desc) in &mut self.properties {
            if key.as_str() == Some("length")
                && let PropertyDescriptor::Data { value, .. } = desc
            {
                *value = Value::Number(f64::from(new_length));
            }
        }
    }
}

pub(crate) struct ObjectCell {
    realm: RealmId,
    state: RefCell<ObjectState>,
}

/// Shared handle to an object. Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Rc<ObjectCell>);

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = self.class();
        write!(f, "[object {class:?} realm={} @{:#x}]", self.realm(), self.addr())
    }
}

impl ObjectRef {
    pub(crate) fn new(realm: RealmId, kind: ObjectKind, prototype: Option<ObjectRef>) -> Self {
        let mut properties = Vec::new();
        if matches!(kind, ObjectKind::Array) {
            properties.push((
                PropertyKey::from("length"),
                PropertyDescriptor::Data {
                    value: Value::Number(0.0),
                    writable: true,
                    enumerable: false,
                    configurable: false,
                },
            ));
        }
        Self(Rc::new(ObjectCell {
            realm,
            state: RefCell::new(ObjectState {
                kind,
                prototype,
                extensible: true,
                properties,
            }),
        }))
    }

    pub(crate) fn new_proxy(realm: RealmId, target: ObjectRef, handler: Rc<dyn ProxyHandler>) -> Self {
        Self::new(realm, ObjectKind::Proxy(ProxySlot { target, handler }), None)
    }

    pub(crate) fn downgrade(&self) -> Weak<ObjectCell> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<ObjectCell>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Realm this object was allocated in.
    pub fn realm(&self) -> RealmId {
        self.0.realm
    }

    /// Internal kind of this object.
    pub fn class(&self) -> ObjectClass {
        self.0
            .state
            .try_borrow()
            .map(|s| s.kind.class())
            .unwrap_or(ObjectClass::Ordinary)
    }

    /// Whether this object is a proxy.
    pub fn is_proxy(&self) -> bool {
        self.proxy_slot().is_some()
    }

    /// Whether `[[Call]]` is defined.
    pub fn is_callable(&self) -> bool {
        match &self.0.state.borrow().kind {
            ObjectKind::Function(_) => true,
            ObjectKind::Proxy(slot) => slot.target.is_callable(),
            _ => false,
        }
    }

    /// Whether `[[Construct]]` is defined.
    pub fn is_constructor(&self) -> bool {
        match &self.0.state.borrow().kind {
            ObjectKind::Function(f) => f.construct.is_some(),
            ObjectKind::Proxy(slot) => slot.target.is_constructor(),
            _ => false,
        }
    }

    /// Primitive stored in a wrapper or date object.
    pub fn internal_value(&self) -> Option<Value> {
        match &self.0.state.borrow().kind {
            ObjectKind::String(s) => Some(Value::String(s.clone())),
            ObjectKind::Number(n) | ObjectKind::Date(n) => Some(Value::Number(*n)),
            ObjectKind::Boolean(b) => Some(Value::Bool(*b)),
            _ => None,
        }
    }

    fn proxy_slot(&self) -> Option<ProxySlot> {
        match &self.0.state.borrow().kind {
            ObjectKind::Proxy(slot) => Some(slot.clone()),
            _ => None,
        }
    }

    fn own(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        let state = self.0.state.borrow();
        state.position(key).map(|i| state.properties[i].1.clone())
    }

    fn prototype(&self) -> Option<ObjectRef> {
        self.0.state.borrow().prototype.clone()
    }

    /// Install a property on a freshly allocated ordinary object.
    pub(crate) fn init_property(&self, key: impl Into<PropertyKey>, desc: PropertyDescriptor) {
        self.ordinary_define(&key.into(), desc);
    }

    /// Drop own properties and the prototype link, breaking reference cycles.
    pub(crate) fn clear(&self) {
        let mut state = self.0.state.borrow_mut();
        state.properties.clear();
        state.prototype = None;
    }

    // -----------------------------------------------------------------------
    // Fundamental operations
    // -----------------------------------------------------------------------

    /// `[[GetPrototypeOf]]`
    pub fn get_prototype_of(&self) -> Result<Option<ObjectRef>> {
        match self.proxy_slot() {
            Some(slot) => proxy::get_prototype_of(&slot),
            None => Ok(self.prototype()),
        }
    }

    /// `[[SetPrototypeOf]]`
    pub fn set_prototype_of(&self, prototype: Option<ObjectRef>) -> Result<bool> {
        if let Some(slot) = self.proxy_slot() {
            return proxy::set_prototype_of(&slot, prototype);
        }
        let current = self.prototype();
        if current == prototype {
            return Ok(true);
        }
        if !self.0.state.borrow().extensible {
            return Ok(false);
        }
        let mut cursor = prototype.clone();
        while let Some(p) = cursor {
            if p == *self {
                return Ok(false);
            }
            if p.is_proxy() {
                break;
            }
            cursor = p.prototype();
        }
        self.0.state.borrow_mut().prototype = prototype;
        Ok(true)
    }

    /// `[[IsExtensible]]`
    pub fn is_extensible(&self) -> Result<bool> {
        match self.proxy_slot() {
            Some(slot) => proxy::is_extensible(&slot),
            None => Ok(self.0.state.borrow().extensible),
        }
    }

    /// `[[PreventExtensions]]`
    pub fn prevent_extensions(&self) -> Result<bool> {
        if let Some(slot) = self.proxy_slot() {
            return proxy::prevent_extensions(&slot);
        }
        self.0.state.borrow_mut().extensible = false;
        Ok(true)
    }

    /// `[[GetOwnProperty]]`
    pub fn get_own_property(&self, key: &PropertyKey) -> Result<Option<PropertyDescriptor>> {
        match self.proxy_slot() {
            Some(slot) => proxy::get_own_property(&slot, key),
            None => Ok(self.own(key)),
        }
    }

    /// `[[DefineOwnProperty]]`
    pub fn define_own_property(&self, key: &PropertyKey, desc: PropertyDescriptor) -> Result<bool> {
        match self.proxy_slot() {
            Some(slot) => proxy::define_own_property(&slot, key, desc),
            None => {
                self.check_array_length(key, &desc)?;
                Ok(self.ordinary_define(key, desc))
            }
        }
    }

    /// A new array `length` must be an integral number in `0..=u32::MAX`.
    fn check_array_length(&self, key: &PropertyKey, desc: &PropertyDescriptor) -> Result<()> {
        if !matches!(self.0.state.borrow().kind, ObjectKind::Array) || key.as_str() != Some("length") {
            return Ok(());
        }
        match desc.value() {
            Some(Value::Number(n)) if valid_array_length(*n) => Ok(()),
            Some(other) => Err(Error::Range(format!("Invalid array length {other}"))),
            None => Ok(()),
        }
    }

    fn ordinary_define(&self, key: &PropertyKey, desc: PropertyDescriptor) -> bool {
        let mut state = self.0.state.borrow_mut();
        let is_array = matches!(state.kind, ObjectKind::Array);
        let new_length = match desc.value() {
            Some(Value::Number(n)) if is_array && key.as_str() == Some("length") && valid_array_length(*n) => {
                Some(*n as u32)
            }
            _ => None,
        };
        match state.position(key) {
            None => {
                if !state.extensible {
                    return false;
                }
                state.properties.push((key.clone(), desc));
            }
            Some(i) => {
                let current = &state.properties[i].1;
                if !current.is_configurable() {
                    if desc.is_configurable() || desc.is_enumerable() != current.is_enumerable() {
                        return false;
                    }
                    let compatible = match (current, &desc) {
                        (
                            PropertyDescriptor::Data {
                                value: old,
                                writable: false,
                                ..
                            },
                            PropertyDescriptor::Data { value, writable, .. },
                        ) => !*writable && old.same_value(value),
                        (PropertyDescriptor::Data { .. }, PropertyDescriptor::Data { .. }) => true,
                        (
                            PropertyDescriptor::Accessor { get: og, set: os, .. },
                            PropertyDescriptor::Accessor { get, set, .. },
                        ) => og == get && os == set,
                        _ => false,
                    };
                    if !compatible {
                        return false;
                    }
                }
                state.properties[i].1 = desc.clone();
            }
        }
        if is_array {
            // Best-effort array exotic behaviour: indices grow length,
            // shrinking length drops trailing indices.
            if let Some(index) = key.array_index() {
                if state.array_length().is_some_and(|len| index >= len) {
                    state.set_array_length(index + 1);
                }
            } else if let Some(new_length) = new_length {
                state.properties.retain(|(k, d)| {
                    k.array_index().is_none_or(|i| i < new_length) || !d.is_configurable()
                });
            }
        }
        true
    }

    /// `[[HasProperty]]`
    pub fn has_property(&self, key: &PropertyKey) -> Result<bool> {
        let mut current = self.clone();
        for _ in 0..MAX_PROTOTYPE_CHAIN_DEPTH {
            if let Some(slot) = current.proxy_slot() {
                return proxy::has(&slot, key);
            }
            if current.own(key).is_some() {
                return Ok(true);
            }
            match current.prototype() {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
        Err(Error::type_error("prototype chain too deep"))
    }

    /// `[[Get]]`
    pub fn get(&self, key: &PropertyKey, receiver: &Value) -> Result<Value> {
        let mut current = self.clone();
        for _ in 0..MAX_PROTOTYPE_CHAIN_DEPTH {
            if let Some(slot) = current.proxy_slot() {
                return proxy::get(&slot, key, receiver);
            }
            match current.own(key) {
                Some(PropertyDescriptor::Data { value, .. }) => return Ok(value),
                Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
                    return getter.call(receiver, &[]);
                }
                Some(PropertyDescriptor::Accessor { get: None, .. }) => return Ok(Value::Undefined),
                None => match current.prototype() {
                    Some(parent) => current = parent,
                    None => return Ok(Value::Undefined),
                },
            }
        }
        Err(Error::type_error("prototype chain too deep"))
    }

    /// `[[Set]]`
    pub fn set(&self, key: &PropertyKey, value: Value, receiver: &Value) -> Result<bool> {
        let mut current = self.clone();
        let mut depth = 0;
        let own = loop {
            if let Some(slot) = current.proxy_slot() {
                return proxy::set(&slot, key, value, receiver);
            }
            if let Some(desc) = current.own(key) {
                break desc;
            }
            match current.prototype() {
                Some(parent) => current = parent,
                None => break PropertyDescriptor::data(Value::Undefined),
            }
            depth += 1;
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(Error::type_error("prototype chain too deep"));
            }
        };
        match own {
            PropertyDescriptor::Data { writable: false, .. } => Ok(false),
            PropertyDescriptor::Data { .. } => {
                let Value::Object(target) = receiver else {
                    return Ok(false);
                };
                match target.get_own_property(key)? {
                    Some(PropertyDescriptor::Accessor { .. })
                    | Some(PropertyDescriptor::Data { writable: false, .. }) => Ok(false),
                    Some(PropertyDescriptor::Data {
                        enumerable,
                        configurable,
                        ..
                    }) => target.define_own_property(
                        key,
                        PropertyDescriptor::Data {
                            value,
                            writable: true,
                            enumerable,
                            configurable,
                        },
                    ),
                    None => target.define_own_property(key, PropertyDescriptor::data(value)),
                }
            }
            PropertyDescriptor::Accessor { set: Some(setter), .. } => {
                setter.call(receiver, &[value])?;
                Ok(true)
            }
            PropertyDescriptor::Accessor { set: None, .. } => Ok(false),
        }
    }

    /// `[[Delete]]`
    pub fn delete(&self, key: &PropertyKey) -> Result<bool> {
        if let Some(slot) = self.proxy_slot() {
            return proxy::delete(&slot, key);
        }
        let mut state = self.0.state.borrow_mut();
        match state.position(key) {
            None => Ok(true),
            Some(i) if state.properties[i].1.is_configurable() => {
                state.properties.remove(i);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// `[[OwnPropertyKeys]]`: indices ascending, strings in insertion order,
    /// then symbols.
    pub fn own_keys(&self) -> Result<Vec<PropertyKey>> {
        if let Some(slot) = self.proxy_slot() {
            return proxy::own_keys(&slot);
        }
        let state = self.0.state.borrow();
        let mut indices: Vec<(u32, PropertyKey)> = state
            .properties
            .iter()
            .filter_map(|(k, _)| k.array_index().map(|i| (i, k.clone())))
            .collect();
        indices.sort_by_key(|(i, _)| *i);
        let strings = state
            .properties
            .iter()
            .filter(|(k, _)| matches!(k, PropertyKey::String(_)) && k.array_index().is_none());
        let symbols = state
            .properties
            .iter()
            .filter(|(k, _)| matches!(k, PropertyKey::Symbol(_)));
        Ok(indices
            .into_iter()
            .map(|(_, k)| k)
            .chain(strings.chain(symbols).map(|(k, _)| k.clone()))
            .collect())
    }

    /// `[[Call]]`
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        let kind = self.0.state.borrow().kind.clone();
        match kind {
            ObjectKind::Function(f) => (f.call)(this, args),
            ObjectKind::Proxy(slot) if slot.target.is_callable() => proxy::apply(&slot, this, args),
            _ => Err(Error::type_error(format!("{self:?} is not a function"))),
        }
    }

    /// `[[Construct]]`
    pub fn construct(&self, args: &[Value], new_target: &ObjectRef) -> Result<ObjectRef> {
        let kind = self.0.state.borrow().kind.clone();
        match kind {
            ObjectKind::Function(NativeFunction {
                construct: Some(construct),
                ..
            }) => match construct(args, new_target)? {
                Value::Object(obj) => Ok(obj),
                other => Err(Error::type_error(format!(
                    "constructor returned a primitive: {other}"
                ))),
            },
            ObjectKind::Proxy(slot) if slot.target.is_constructor() => {
                proxy::construct(&slot, args, new_target)
            }
            _ => Err(Error::type_error(format!("{self:?} is not a constructor"))),
        }
    }

    // -----------------------------------------------------------------------
    // Conveniences
    // -----------------------------------------------------------------------

    /// `obj[key]` with the object itself as receiver.
    pub fn get_value(&self, key: impl Into<PropertyKey>) -> Result<Value> {
        self.get(&key.into(), &Value::Object(self.clone()))
    }

    /// `obj[key] = value` with the object itself as receiver.
    pub fn set_value(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Result<bool> {
        self.set(&key.into(), value.into(), &Value::Object(self.clone()))
    }

    /// Define a writable, enumerable, configurable data property.
    pub fn define_value(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Result<bool> {
        self.define_own_property(&key.into(), PropertyDescriptor::data(value))
    }

    /// `new obj(...args)`.
    pub fn new_instance(&self, args: &[Value]) -> Result<ObjectRef> {
        self.construct(args, self)
    }
}

fn valid_array_length(n: f64) -> bool {
    n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&n)
}
