//! Realms: isolated object heaps with their own intrinsics.
//!
//! A [`Realm`] owns one set of intrinsic prototypes and constructors plus a
//! global object. Objects remember which realm allocated them, and the
//! membrane classifies foreign objects against the *origin* realm's
//! intrinsics (see [`Realm::classify`]).

mod object;
mod proxy;
mod value;

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

pub use object::{
    NativeCall, NativeConstruct, NativeFunction, ObjectClass, ObjectRef, PropertyDescriptor,
};
pub use proxy::ProxyHandler;
pub use value::{PropertyKey, Symbol, Value};

pub(crate) use object::{MAX_PROTOTYPE_CHAIN_DEPTH, ObjectCell, ObjectKind};

use crate::error::{Error, Result};

static NEXT_REALM_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique realm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RealmId(u32);

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin-realm kind of a crossing object. Selects the placeholder a
/// stand-in is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Callable object
    Function,
    /// String wrapper
    String,
    /// Number wrapper
    Number,
    /// Boolean wrapper
    Boolean,
    /// Array
    Array,
    /// Date
    Date,
    /// Error (or subclass)
    Error,
    /// Anything else
    Plain,
}

/// Intrinsic objects of one realm.
#[derive(Debug, Clone)]
pub struct Intrinsics {
    /// `Object.prototype`
    pub object_prototype: ObjectRef,
    /// `Function.prototype`
    pub function_prototype: ObjectRef,
    /// `Array.prototype`
    pub array_prototype: ObjectRef,
    /// `String.prototype`
    pub string_prototype: ObjectRef,
    /// `Number.prototype`
    pub number_prototype: ObjectRef,
    /// `Boolean.prototype`
    pub boolean_prototype: ObjectRef,
    /// `Date.prototype`
    pub date_prototype: ObjectRef,
    /// `Error.prototype`
    pub error_prototype: ObjectRef,
    /// `Object`
    pub object: ObjectRef,
    /// `Function`
    pub function: ObjectRef,
    /// `Array`
    pub array: ObjectRef,
    /// `String`
    pub string: ObjectRef,
    /// `Number`
    pub number: ObjectRef,
    /// `Boolean`
    pub boolean: ObjectRef,
    /// `Date`
    pub date: ObjectRef,
    /// `Error`
    pub error: ObjectRef,
}

impl Intrinsics {
    /// Every intrinsic, prototypes first, in a fixed order shared by all
    /// realms so two realms' lists pair up index by index.
    pub fn all(&self) -> [&ObjectRef; 16] {
        [
            &self.object_prototype,
            &self.function_prototype,
            &self.array_prototype,
            &self.string_prototype,
            &self.number_prototype,
            &self.boolean_prototype,
            &self.date_prototype,
            &self.error_prototype,
            &self.object,
            &self.function,
            &self.array,
            &self.string,
            &self.number,
            &self.boolean,
            &self.date,
            &self.error,
        ]
    }
}

/// An isolated execution environment.
pub struct Realm {
    id: RealmId,
    name: String,
    intrinsics: Intrinsics,
    global: ObjectRef,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

impl Realm {
    /// Create a realm with fresh intrinsics and an empty global object.
    pub fn new(name: impl Into<String>) -> Self {
        let id = RealmId(NEXT_REALM_ID.fetch_add(1, Ordering::Relaxed));
        let ordinary = |proto: Option<&ObjectRef>| ObjectRef::new(id, ObjectKind::Ordinary, proto.cloned());

        let object_prototype = ordinary(None);
        let function_prototype = ObjectRef::new(
            id,
            ObjectKind::Function(NativeFunction {
                name: String::new(),
                call: Rc::new(|_, _| Ok(Value::Undefined)),
                construct: None,
            }),
            Some(object_prototype.clone()),
        );
        let array_prototype = ordinary(Some(&object_prototype));
        let string_prototype = ordinary(Some(&object_prototype));
        let number_prototype = ordinary(Some(&object_prototype));
        let boolean_prototype = ordinary(Some(&object_prototype));
        let date_prototype = ordinary(Some(&object_prototype));
        let error_prototype = ordinary(Some(&object_prototype));

        let ctor = |name: &str, proto: &ObjectRef, call: NativeCall, construct: NativeConstruct| {
            let f = ObjectRef::new(
                id,
                ObjectKind::Function(NativeFunction {
                    name: name.to_owned(),
                    call,
                    construct: Some(construct),
                }),
                Some(function_prototype.clone()),
            );
            f.init_property("name", readonly(Value::from(name)));
            f.init_property(
                "prototype",
                PropertyDescriptor::Data {
                    value: Value::Object(proto.clone()),
                    writable: false,
                    enumerable: false,
                    configurable: false,
                },
            );
            proto.init_property("constructor", PropertyDescriptor::hidden(f.clone()));
            f
        };

        let object = {
            let proto = object_prototype.clone();
            let make = move |args: &[Value]| match arg(args, 0) {
                Value::Object(obj) => Value::Object(obj),
                _ => Value::Object(ObjectRef::new(id, ObjectKind::Ordinary, Some(proto.clone()))),
            };
            let make = Rc::new(make);
            let call_make = make.clone();
            ctor(
                "Object",
                &object_prototype,
                Rc::new(move |_, args| Ok(call_make(args))),
                Rc::new(move |args, _| Ok(make(args))),
            )
        };
        let function = ctor(
            "Function",
            &function_prototype,
            Rc::new(|_, _| Err(Error::type_error("code generation from strings disallowed"))),
            Rc::new(|_, _| Err(Error::type_error("code generation from strings disallowed"))),
        );
        let array = {
            let proto = array_prototype.clone();
            let make: NativeCall = Rc::new(move |_, args| {
                let arr = ObjectRef::new(id, ObjectKind::Array, Some(proto.clone()));
                for (i, value) in args.iter().enumerate() {
                    arr.define_own_property(&i.to_string().into(), PropertyDescriptor::data(value.clone()))?;
                }
                Ok(Value::Object(arr))
            });
            let construct_make = make.clone();
            ctor(
                "Array",
                &array_prototype,
                make,
                Rc::new(move |args, _| construct_make(&Value::Undefined, args)),
            )
        };
        let wrapper = |name: &str,
                       proto: &ObjectRef,
                       convert: fn(&Value) -> Value,
                       wrap: fn(Value) -> ObjectKind| {
            let instance_proto = proto.clone();
            ctor(
                name,
                proto,
                Rc::new(move |_, args| Ok(convert(&arg(args, 0)))),
                Rc::new(move |args, _| {
                    Ok(Value::Object(ObjectRef::new(
                        id,
                        wrap(convert(&arg(args, 0))),
                        Some(instance_proto.clone()),
                    )))
                }),
            )
        };
        let string = wrapper(
            "String",
            &string_prototype,
            |v| match v {
                Value::Undefined => Value::from(""),
                other => Value::String(other.to_string()),
            },
            |v| ObjectKind::String(v.to_string()),
        );
        let number = wrapper(
            "Number",
            &number_prototype,
            |v| Value::Number(v.to_number()),
            |v| ObjectKind::Number(v.to_number()),
        );
        let boolean = wrapper(
            "Boolean",
            &boolean_prototype,
            |v| Value::Bool(v.truthy()),
            |v| ObjectKind::Boolean(v.truthy()),
        );
        let date = wrapper(
            "Date",
            &date_prototype,
            |v| Value::Number(v.to_number()),
            |v| ObjectKind::Date(v.to_number()),
        );
        let error = {
            let proto = error_prototype.clone();
            let make: NativeCall = Rc::new(move |_, args| {
                let err = ObjectRef::new(id, ObjectKind::Error, Some(proto.clone()));
                if let Some(message) = args.first().filter(|m| !matches!(m, Value::Undefined)) {
                    err.define_own_property(&"message".into(), PropertyDescriptor::hidden(message.to_string()))?;
                }
                Ok(Value::Object(err))
            });
            let construct_make = make.clone();
            ctor(
                "Error",
                &error_prototype,
                make,
                Rc::new(move |args, _| construct_make(&Value::Undefined, args)),
            )
        };

        let intrinsics = Intrinsics {
            object_prototype,
            function_prototype,
            array_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
            date_prototype,
            error_prototype,
            object,
            function,
            array,
            string,
            number,
            boolean,
            date,
            error,
        };

        let global = ObjectRef::new(id, ObjectKind::Ordinary, Some(intrinsics.object_prototype.clone()));
        for constructor in &intrinsics.all()[8..] {
            if let Some(Value::String(name)) = constructor.own_name() {
                global.init_property(name, PropertyDescriptor::hidden((*constructor).clone()));
            }
        }

        Self {
            id,
            name: name.into(),
            intrinsics,
            global,
        }
    }

    /// This realm's id.
    pub fn id(&self) -> RealmId {
        self.id
    }

    /// Human-readable name (used in logs).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Intrinsic prototypes and constructors.
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// The global object.
    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    // -----------------------------------------------------------------------
    // Factories
    // -----------------------------------------------------------------------

    fn alloc(&self, kind: ObjectKind, prototype: &ObjectRef) -> ObjectRef {
        ObjectRef::new(self.id, kind, Some(prototype.clone()))
    }

    /// `{}`
    pub fn object(&self) -> ObjectRef {
        self.alloc(ObjectKind::Ordinary, &self.intrinsics.object_prototype)
    }

    /// Plain object with the given enumerable data properties.
    pub fn object_with<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> ObjectRef
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        let obj = self.object();
        for (key, value) in entries {
            obj.init_property(key, PropertyDescriptor::data(value));
        }
        obj
    }

    /// Array holding `values`.
    pub fn array(&self, values: Vec<Value>) -> ObjectRef {
        let arr = self.alloc(ObjectKind::Array, &self.intrinsics.array_prototype);
        for (i, value) in values.into_iter().enumerate() {
            arr.init_property(i.to_string(), PropertyDescriptor::data(value));
        }
        arr
    }

    /// A native function. Constructing it allocates an instance from
    /// `new_target.prototype` and runs `call` with it as `this`.
    pub fn function<F>(&self, name: &str, call: F) -> ObjectRef
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + 'static,
    {
        let call: NativeCall = Rc::new(call);
        let realm = self.id;
        let fallback = self.intrinsics.object_prototype.clone();
        let body = call.clone();
        let construct: NativeConstruct = Rc::new(move |args, new_target| {
            let proto = match new_target.get_value("prototype")? {
                Value::Object(proto) => proto,
                _ => fallback.clone(),
            };
            let this = ObjectRef::new(realm, ObjectKind::Ordinary, Some(proto));
            match body(&Value::Object(this.clone()), args)? {
                Value::Object(result) => Ok(Value::Object(result)),
                _ => Ok(Value::Object(this)),
            }
        });
        let f = self.alloc(
            ObjectKind::Function(NativeFunction {
                name: name.to_owned(),
                call,
                construct: Some(construct),
            }),
            &self.intrinsics.function_prototype,
        );
        f.init_property("name", readonly(Value::from(name)));
        f.init_property(
            "prototype",
            PropertyDescriptor::Data {
                value: Value::Object(self.object()),
                writable: true,
                enumerable: false,
                configurable: false,
            },
        );
        f
    }

    /// Error object with a `message`.
    pub fn error(&self, message: &str) -> ObjectRef {
        let err = self.alloc(ObjectKind::Error, &self.intrinsics.error_prototype);
        err.init_property("message", PropertyDescriptor::hidden(message));
        err
    }

    /// An exception carrying a fresh error object of this realm.
    pub fn throw(&self, message: &str) -> Error {
        Error::Thrown(Value::Object(self.error(message)))
    }

    /// Date object for a millisecond timestamp.
    pub fn date(&self, millis: f64) -> ObjectRef {
        self.alloc(ObjectKind::Date(millis), &self.intrinsics.date_prototype)
    }

    /// `new String(s)`
    pub fn string_object(&self, s: &str) -> ObjectRef {
        self.alloc(ObjectKind::String(s.to_owned()), &self.intrinsics.string_prototype)
    }

    /// `new Number(n)`
    pub fn number_object(&self, n: f64) -> ObjectRef {
        self.alloc(ObjectKind::Number(n), &self.intrinsics.number_prototype)
    }

    /// `new Boolean(b)`
    pub fn boolean_object(&self, b: bool) -> ObjectRef {
        self.alloc(ObjectKind::Boolean(b), &self.intrinsics.boolean_prototype)
    }

    /// A proxy allocated in this realm.
    pub fn proxy(&self, target: ObjectRef, handler: Rc<dyn ProxyHandler>) -> ObjectRef {
        ObjectRef::new_proxy(self.id, target, handler)
    }

    /// Empty placeholder of `kind`, anchored on this realm's intrinsics.
    /// Placeholder functions are callable and constructible but have no own
    /// properties; their behaviour comes entirely from the proxy traps.
    pub fn placeholder(&self, kind: EntityKind) -> ObjectRef {
        let i = &self.intrinsics;
        match kind {
            EntityKind::Function => {
                let realm = self.id;
                let proto = i.object_prototype.clone();
                self.alloc(
                    ObjectKind::Function(NativeFunction {
                        name: String::new(),
                        call: Rc::new(|_, _| Ok(Value::Undefined)),
                        construct: Some(Rc::new(move |_, _| {
                            Ok(Value::Object(ObjectRef::new(
                                realm,
                                ObjectKind::Ordinary,
                                Some(proto.clone()),
                            )))
                        })),
                    }),
                    &i.function_prototype,
                )
            }
            EntityKind::String => self.alloc(ObjectKind::String(String::new()), &i.string_prototype),
            EntityKind::Number => self.alloc(ObjectKind::Number(0.0), &i.number_prototype),
            EntityKind::Boolean => self.alloc(ObjectKind::Boolean(false), &i.boolean_prototype),
            EntityKind::Array => self.alloc(ObjectKind::Array, &i.array_prototype),
            EntityKind::Date => self.alloc(ObjectKind::Date(0.0), &i.date_prototype),
            EntityKind::Error => self.alloc(ObjectKind::Error, &i.error_prototype),
            EntityKind::Plain => self.object(),
        }
    }

    /// Classify an object of this realm by walking its prototype chain
    /// against this realm's intrinsics. Callables are always functions.
    pub fn classify(&self, obj: &ObjectRef) -> Result<EntityKind> {
        if obj.is_callable() {
            return Ok(EntityKind::Function);
        }
        let i = &self.intrinsics;
        let mut cursor = obj.get_prototype_of()?;
        for _ in 0..MAX_PROTOTYPE_CHAIN_DEPTH {
            let Some(proto) = cursor else {
                return Ok(EntityKind::Plain);
            };
            let kind = if proto == i.string_prototype {
                Some(EntityKind::String)
            } else if proto == i.number_prototype {
                Some(EntityKind::Number)
            } else if proto == i.boolean_prototype {
                Some(EntityKind::Boolean)
            } else if proto == i.array_prototype {
                Some(EntityKind::Array)
            } else if proto == i.date_prototype {
                Some(EntityKind::Date)
            } else if proto == i.error_prototype {
                Some(EntityKind::Error)
            } else {
                None
            };
            if let Some(kind) = kind {
                return Ok(kind);
            }
            cursor = proto.get_prototype_of()?;
        }
        Err(Error::type_error("prototype chain too deep"))
    }
}

impl Drop for Realm {
    fn drop(&mut self) {
        // Constructors and prototypes point at each other; clear them so the
        // realm's heap can be reclaimed.
        for obj in self.intrinsics.all() {
            obj.clear();
        }
        self.global.clear();
    }
}

fn readonly(value: Value) -> PropertyDescriptor {
    PropertyDescriptor::Data {
        value,
        writable: false,
        enumerable: false,
        configurable: true,
    }
}

impl ObjectRef {
    fn own_name(&self) -> Option<Value> {
        self.get_own_property(&"name".into())
            .ok()
            .flatten()
            .and_then(|d| d.value().cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_realms_have_distinct_intrinsics() {
        let a = Realm::new("a");
        let b = Realm::new("b");
        assert_ne!(a.id(), b.id());
        assert_ne!(a.intrinsics().object_prototype, b.intrinsics().object_prototype);
    }

    #[test]
    fn test_classify_uses_own_intrinsics() {
        let host = Realm::new("host");
        let guest = Realm::new("guest");
        let arr = host.array(vec![]);
        assert_eq!(host.classify(&arr).unwrap(), EntityKind::Array);
        // Against the other realm's prototypes the array is unrecognisable.
        assert_eq!(guest.classify(&arr).unwrap(), EntityKind::Plain);
        assert_eq!(host.classify(&host.error("x")).unwrap(), EntityKind::Error);
        assert_eq!(host.classify(&host.date(0.0)).unwrap(), EntityKind::Date);
        assert_eq!(
            host.classify(&host.string_object("s")).unwrap(),
            EntityKind::String
        );
        assert_eq!(
            host.classify(&host.function("f", |_, _| Ok(Value::Undefined)))
                .unwrap(),
            EntityKind::Function
        );
        assert_eq!(host.classify(&host.object()).unwrap(), EntityKind::Plain);
    }

    #[test]
    fn test_classify_follows_subclass_chains() {
        let realm = Realm::new("r");
        let sub = realm.object();
        sub.set_prototype_of(Some(realm.intrinsics().error_prototype.clone()))
            .unwrap();
        let instance = realm.object();
        instance.set_prototype_of(Some(sub)).unwrap();
        assert_eq!(realm.classify(&instance).unwrap(), EntityKind::Error);
    }

    #[test]
    fn test_placeholders_match_kind() {
        let realm = Realm::new("r");
        assert!(realm.placeholder(EntityKind::Function).is_callable());
        assert_eq!(realm.placeholder(EntityKind::Array).class(), ObjectClass::Array);
        assert_eq!(
            realm.classify(&realm.placeholder(EntityKind::Date)).unwrap(),
            EntityKind::Date
        );
        assert!(
            realm
                .placeholder(EntityKind::Function)
                .own_keys()
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_constructors_on_global() {
        let realm = Realm::new("r");
        let array = realm.global().get_value("Array").unwrap();
        let Value::Object(array) = array else {
            panic!("Array constructor missing");
        };
        let arr = array
            .new_instance(&[Value::from(1), Value::from(2)])
            .unwrap();
        assert_eq!(arr.get_value("length").unwrap(), Value::from(2));

        let Value::Object(error) = realm.global().get_value("Error").unwrap() else {
            panic!("Error constructor missing");
        };
        let err = error.new_instance(&[Value::from("boom")]).unwrap();
        assert_eq!(err.get_value("message").unwrap(), Value::from("boom"));
        assert_eq!(realm.classify(&err).unwrap(), EntityKind::Error);
    }

    #[test]
    fn test_function_constructor_is_disabled() {
        let realm = Realm::new("r");
        let err = realm
            .intrinsics()
            .function
            .call(&Value::Undefined, &[Value::from("return 1")])
            .unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }
}
