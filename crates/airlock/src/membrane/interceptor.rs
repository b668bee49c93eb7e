//! Trap set of one stand-in.
//!
//! The stand-in's target is an empty placeholder. Before any trap reports on
//! a key, the original's current descriptor for that key is mirrored onto
//! the placeholder (if the read policy grants it), so every answer the proxy
//! gives is also true of its target and the proxy invariants hold. The
//! placeholder is never made non-extensible because it is populated lazily.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Weak;

use super::{Membrane, MembraneInner};
use crate::error::{Error, Result};
use crate::policy::{AccessorMode, Direction, EntityPolicy};
use crate::realm::{ObjectRef, PropertyDescriptor, PropertyKey, ProxyHandler, Value};

const PROTO_KEY: &str = "__proto__";

pub(crate) struct Interceptor {
    membrane: Weak<MembraneInner>,
    direction: Direction,
    original: ObjectRef,
    path: String,
    policy: EntityPolicy,
    /// Keys defined locally after a denied write; never re-mirrored.
    diverged: RefCell<HashSet<PropertyKey>>,
    /// Prototype set locally after a denied write; never re-mirrored.
    proto_diverged: Cell<bool>,
}

impl Interceptor {
    pub(crate) fn new(
        membrane: Weak<MembraneInner>,
        direction: Direction,
        original: ObjectRef,
        path: String,
        policy: EntityPolicy,
    ) -> Self {
        Self {
            membrane,
            direction,
            original,
            path,
            policy,
            diverged: RefCell::new(HashSet::new()),
            proto_diverged: Cell::new(false),
        }
    }

    fn membrane(&self) -> Result<Membrane> {
        Membrane::upgrade(&self.membrane)
    }

    fn is_diverged(&self, key: &PropertyKey) -> bool {
        self.diverged.borrow().contains(key)
    }

    /// Run an operation on the original, translating a thrown exception into
    /// the stand-in's realm.
    fn forward<T>(&self, membrane: &Membrane, result: Result<T>) -> Result<T> {
        result.map_err(|err| self.translate_exception(membrane, err))
    }

    fn translate_exception(&self, membrane: &Membrane, err: Error) -> Error {
        let Error::Thrown(exception) = err else {
            return err;
        };
        let path = format!("{}.exception", self.path);
        match membrane.transform(self.direction, &exception, &path, None) {
            Ok(translated) => Error::Thrown(translated),
            Err(err) => err,
        }
    }

    /// Whether `receiver` is this stand-in (it unwraps to our original).
    fn is_self(&self, membrane: &Membrane, receiver: &Value) -> bool {
        receiver
            .as_object()
            .and_then(|r| membrane.cached(self.direction.opposite(), r))
            .is_some_and(|o| o == self.original)
    }

    // -----------------------------------------------------------------------
    // Mirroring
    // -----------------------------------------------------------------------

    /// Refresh the placeholder's copy of `key` from the original.
    fn mirror(&self, membrane: &Membrane, target: &ObjectRef, key: &PropertyKey) -> Result<()> {
        if self.is_diverged(key) {
            return Ok(());
        }
        let actual = self.forward(membrane, self.original.get_own_property(key))?;
        let Some(desc) = actual else {
            Self::drop_stale(target, key)?;
            return Ok(());
        };
        let property = self.policy.property(key);
        if !property.read()? {
            Self::drop_stale(target, key)?;
            return Ok(());
        }
        let mut mirrored = membrane.transform_descriptor(
            self.direction,
            &desc,
            property.path(),
            &property.read_policy(),
            &property.accessor_policy(AccessorMode::Mirror),
        )?;
        if let Some(existing) = target.get_own_property(key)?
            && !existing.is_configurable()
        {
            // e.g. the placeholder array's own `length`
            set_configurable(&mut mirrored, false);
        }
        if !target.define_own_property(key, mirrored)? {
            tracing::debug!(path = property.path(), "stand-in rejected mirrored descriptor");
        }
        Ok(())
    }

    fn drop_stale(target: &ObjectRef, key: &PropertyKey) -> Result<()> {
        if target
            .get_own_property(key)?
            .is_some_and(|d| d.is_configurable())
        {
            target.delete(key)?;
        }
        Ok(())
    }

    /// Refresh the placeholder's prototype. A denied read leaves it null so
    /// lookups cannot walk a chain `getPrototypeOf` would not reveal.
    fn mirror_prototype(&self, membrane: &Membrane, target: &ObjectRef) -> Result<()> {
        if self.proto_diverged.get() {
            return Ok(());
        }
        let property = self.policy.property(&PROTO_KEY.into());
        let prototype = if property.read()? {
            let real = self.forward(membrane, self.original.get_prototype_of())?;
            let real = real.map_or(Value::Null, Value::Object);
            match membrane.transform(self.direction, &real, property.path(), Some(&property.read_policy()))? {
                Value::Object(proto) => Some(proto),
                _ => None,
            }
        } else {
            None
        };
        if !target.set_prototype_of(prototype)? {
            tracing::debug!(path = %self.path, "stand-in rejected mirrored prototype");
        }
        Ok(())
    }

    /// Mirror `key`, and the prototype if `key` is not an own property.
    fn mirror_lookup(&self, membrane: &Membrane, target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        self.mirror(membrane, target, key)?;
        let own = target.get_own_property(key)?.is_some();
        if !own {
            self.mirror_prototype(membrane, target)?;
        }
        Ok(own)
    }

    /// Assignment through the prototype chain: this stand-in is a prototype
    /// of `receiver`.
    fn inherited_set(
        &self,
        membrane: &Membrane,
        target: &ObjectRef,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
    ) -> Result<bool> {
        if !self.mirror_lookup(membrane, target, key)? {
            return match target.get_prototype_of()? {
                Some(proto) => proto.set(key, value, receiver),
                None => define_on_receiver(receiver, key, value),
            };
        }
        match target.get_own_property(key)? {
            Some(PropertyDescriptor::Accessor { set: Some(setter), .. }) => {
                setter.call(receiver, &[value])?;
                Ok(true)
            }
            // Getter only: nothing to do, and nothing to report.
            Some(desc @ PropertyDescriptor::Accessor { set: None, .. }) => Ok(desc.is_configurable()),
            Some(PropertyDescriptor::Data { writable: false, .. }) => Ok(false),
            _ => define_on_receiver(receiver, key, value),
        }
    }
}

fn set_configurable(desc: &mut PropertyDescriptor, value: bool) {
    match desc {
        PropertyDescriptor::Data { configurable, .. } | PropertyDescriptor::Accessor { configurable, .. } => {
            *configurable = value;
        }
    }
}

/// Create or update a data property directly on `receiver`. Array `length`
/// and index bookkeeping is left to the receiver's own define.
fn define_on_receiver(receiver: &Value, key: &PropertyKey, value: Value) -> Result<bool> {
    let Value::Object(receiver) = receiver else {
        return Ok(false);
    };
    match receiver.get_own_property(key)? {
        Some(PropertyDescriptor::Data {
            writable: true,
            enumerable,
            configurable,
            ..
        }) => receiver.define_own_property(
            key,
            PropertyDescriptor::Data {
                value,
                writable: true,
                enumerable,
                configurable,
            },
        ),
        Some(_) => Ok(false),
        None => receiver.define_own_property(key, PropertyDescriptor::data(value)),
    }
}

impl ProxyHandler for Interceptor {
    fn get_prototype_of(&self, target: &ObjectRef) -> Result<Option<ObjectRef>> {
        let membrane = self.membrane()?;
        self.mirror_prototype(&membrane, target)?;
        target.get_prototype_of()
    }

    fn set_prototype_of(&self, target: &ObjectRef, prototype: Option<ObjectRef>) -> Result<bool> {
        let membrane = self.membrane()?;
        let property = self.policy.property(&PROTO_KEY.into());
        if !self.proto_diverged.get() && property.write()? {
            let local = prototype.clone().map_or(Value::Null, Value::Object);
            let real = membrane.transform(
                self.direction.opposite(),
                &local,
                property.path(),
                Some(&property.write_policy()),
            )?;
            let real = match real {
                Value::Object(proto) => Some(proto),
                _ => None,
            };
            if !self.forward(&membrane, self.original.set_prototype_of(real))? {
                return Ok(false);
            }
        } else {
            self.proto_diverged.set(true);
        }
        target.set_prototype_of(prototype)
    }

    fn is_extensible(&self, _target: &ObjectRef) -> Result<bool> {
        Ok(true)
    }

    fn prevent_extensions(&self, _target: &ObjectRef) -> Result<bool> {
        Ok(false)
    }

    fn get_own_property(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>> {
        let membrane = self.membrane()?;
        self.mirror(&membrane, target, key)?;
        target.get_own_property(key)
    }

    fn define_own_property(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool> {
        let membrane = self.membrane()?;
        let property = self.policy.property(key);
        if self.is_diverged(key) || !property.write()? {
            // Keep the stand-in consistent with what this trap reports.
            self.diverged.borrow_mut().insert(key.clone());
            return target.define_own_property(key, desc);
        }
        let real = membrane.transform_descriptor(
            self.direction.opposite(),
            &desc,
            property.path(),
            &property.write_policy(),
            &property.accessor_policy(AccessorMode::Define),
        )?;
        if !self.forward(&membrane, self.original.define_own_property(key, real))? {
            return Ok(false);
        }
        target.define_own_property(key, desc)
    }

    fn has(&self, target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        let membrane = self.membrane()?;
        if self.mirror_lookup(&membrane, target, key)? {
            return Ok(true);
        }
        target.has_property(key)
    }

    fn get(&self, target: &ObjectRef, key: &PropertyKey, receiver: &Value) -> Result<Value> {
        let membrane = self.membrane()?;
        self.mirror_lookup(&membrane, target, key)?;
        target.get(key, receiver)
    }

    fn set(&self, target: &ObjectRef, key: &PropertyKey, value: Value, receiver: &Value) -> Result<bool> {
        let membrane = self.membrane()?;
        if !self.is_self(&membrane, receiver) {
            return self.inherited_set(&membrane, target, key, value, receiver);
        }
        if self.is_diverged(key) {
            return target.set(key, value, receiver);
        }
        let property = self.policy.property(key);
        if !property.write()? {
            return Ok(false);
        }
        let real = membrane.transform(
            self.direction.opposite(),
            &value,
            property.path(),
            Some(&property.write_policy()),
        )?;
        let original = Value::Object(self.original.clone());
        let ok = self.forward(&membrane, self.original.set(key, real, &original))?;
        self.mirror(&membrane, target, key)?;
        Ok(ok)
    }

    fn delete(&self, target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        let membrane = self.membrane()?;
        if self.is_diverged(key) {
            let ok = target.delete(key)?;
            if ok {
                self.diverged.borrow_mut().remove(key);
            }
            return Ok(ok);
        }
        if !self.policy.property(key).write()? {
            return Ok(false);
        }
        if !self.forward(&membrane, self.original.delete(key))? {
            return Ok(false);
        }
        target.delete(key)
    }

    fn own_keys(&self, target: &ObjectRef) -> Result<Vec<PropertyKey>> {
        let membrane = self.membrane()?;
        let keys = self.forward(&membrane, self.original.own_keys())?;
        for key in &keys {
            self.mirror(&membrane, target, key)?;
        }
        for stale in target.own_keys()? {
            if !keys.contains(&stale) && !self.is_diverged(&stale) {
                Self::drop_stale(target, &stale)?;
            }
        }
        target.own_keys()
    }

    fn apply(&self, _target: &ObjectRef, this: &Value, args: &[Value]) -> Result<Value> {
        let membrane = self.membrane()?;
        let call = self.policy.call();
        if !call.allow(this, args)? {
            tracing::debug!(path = %self.path, direction = %self.direction, "call denied");
            return Ok(Value::Undefined);
        }
        let back = self.direction.opposite();
        let this = membrane.transform(back, this, &self.path, Some(&call.this_arg()))?;
        let args = membrane.transform_arguments(back, args, &call)?;
        let result = self.forward(&membrane, self.original.call(&this, &args))?;
        membrane.transform(self.direction, &result, &self.path, Some(&call.result()))
    }

    fn construct(&self, _target: &ObjectRef, args: &[Value], new_target: &ObjectRef) -> Result<ObjectRef> {
        let membrane = self.membrane()?;
        let construct = self.policy.construct();
        if !construct.allow(&Value::Undefined, args)? {
            tracing::debug!(path = %self.path, direction = %self.direction, "construct denied");
            return Ok(membrane.destination(self.direction).object());
        }
        let back = self.direction.opposite();
        let real_target = match membrane.transform(
            back,
            &Value::Object(new_target.clone()),
            &self.path,
            Some(&construct.this_arg()),
        )? {
            Value::Object(real) => real,
            other => return Err(Error::type_error(format!("new.target became a primitive: {other}"))),
        };
        let args = membrane.transform_arguments(back, args, &construct)?;
        let instance = self.forward(&membrane, self.original.construct(&args, &real_target))?;
        match membrane.transform(
            self.direction,
            &Value::Object(instance),
            &self.path,
            Some(&construct.result()),
        )? {
            Value::Object(standin) => Ok(standin),
            other => Err(Error::type_error(format!("constructed value became a primitive: {other}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::policy::{
        ActionDefaults, Allow, CallPolicyData, EntityPolicyData, ErrorMode, Policy, PolicyData,
        PolicyDefaults, PropertyPolicyData,
    };
    use crate::realm::Realm;
    use crate::store::PolicyStore;

    fn strict_root() -> PolicyData {
        PolicyData {
            options: PolicyDefaults {
                interactive: Some(false),
                learn: Some(false),
                contextify: Some(ActionDefaults::default()),
                decontextify: Some(ActionDefaults::default()),
            },
            onerror: ErrorMode::Silent,
            ..PolicyData::default()
        }
    }

    fn membrane_with(root: PolicyData) -> Membrane {
        let policy = Policy::new(PolicyStore::in_memory(root));
        Membrane::new(Realm::new("host"), Realm::new("guest"), policy)
    }

    fn object(value: Value) -> ObjectRef {
        match value {
            Value::Object(obj) => obj,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn allow_props(m: &Membrane, doc: &str, props: &[(&str, bool, bool)]) {
        m.policy().store().with_forest(|f| {
            let entry = f
                .documents
                .entry(doc.to_owned())
                .or_insert_with(|| EntityPolicyData::typed(Direction::Contextify));
            for (name, read, write) in props {
                entry.properties.insert(
                    (*name).to_owned(),
                    PropertyPolicyData {
                        read: Some(*read),
                        write: Some(*write),
                        ..Default::default()
                    },
                );
            }
        });
    }

    // ==================== Mirroring Tests ====================

    #[test]
    fn test_mirroring_follows_original() {
        let m = membrane_with(PolicyData::default());
        let host = m.host().object_with([("a", 1)]);
        let standin = object(m.contextify(&host.clone().into(), "demo", None).unwrap());
        assert_eq!(standin.get_value("a").unwrap(), Value::from(1));

        host.set_value("a", 2).unwrap();
        assert_eq!(standin.get_value("a").unwrap(), Value::from(2));

        host.delete(&"a".into()).unwrap();
        assert_eq!(standin.get_value("a").unwrap(), Value::Undefined);
        assert!(!standin.has_property(&"a".into()).unwrap());
    }

    #[test]
    fn test_denied_read_hides_property() {
        let m = membrane_with(strict_root());
        allow_props(&m, "demo", &[("open", true, false)]);
        let host = m.host().object_with([("open", 1), ("secret", 2)]);
        let standin = object(m.contextify(&host.into(), "demo", None).unwrap());

        assert_eq!(standin.get_value("open").unwrap(), Value::from(1));
        assert_eq!(standin.get_own_property(&"secret".into()).unwrap(), None);
        assert!(!standin.has_property(&"secret".into()).unwrap());
        assert_eq!(standin.own_keys().unwrap(), vec![PropertyKey::from("open")]);
    }

    #[test]
    fn test_denied_prototype_read_reports_null() {
        let m = membrane_with(strict_root());
        let host = m.host().object_with([("a", 1)]);
        let standin = object(m.contextify(&host.into(), "demo", None).unwrap());
        assert_eq!(standin.get_prototype_of().unwrap(), None);
        // Inherited members are not reachable either.
        assert!(!standin.has_property(&"toString".into()).unwrap());
    }

    #[test]
    fn test_granted_prototype_read_ends_in_guest_intrinsics() {
        let m = membrane_with(PolicyData::default());
        let host = m.host().array(vec![Value::from(1)]);
        let standin = object(m.contextify(&host.into(), "list", None).unwrap());
        assert_eq!(
            standin.get_prototype_of().unwrap(),
            Some(m.guest().intrinsics().array_prototype.clone())
        );
        assert_eq!(standin.get_value("length").unwrap(), Value::from(1));
        assert_eq!(standin.get_value("0").unwrap(), Value::from(1));
    }

    // ==================== Write Tests ====================

    #[test]
    fn test_denied_set_returns_false() {
        let m = membrane_with(strict_root());
        allow_props(&m, "demo", &[("a", true, false)]);
        let host = m.host().object_with([("a", 1)]);
        let standin = object(m.contextify(&host.clone().into(), "demo", None).unwrap());
        assert!(!standin.set_value("a", 5).unwrap());
        assert_eq!(host.get_value("a").unwrap(), Value::from(1));
    }

    #[test]
    fn test_granted_set_writes_original() {
        let m = membrane_with(PolicyData::default());
        let host = m.host().object();
        let standin = object(m.contextify(&host.clone().into(), "demo", None).unwrap());
        let guest_value = m.guest().object_with([("x", 1)]);
        assert!(standin.set_value("child", guest_value.clone()).unwrap());

        // The original now holds a host stand-in for the guest object.
        let stored = object(host.get_value("child").unwrap());
        assert_eq!(stored.realm(), m.host().id());
        assert_eq!(stored.get_value("x").unwrap(), Value::from(1));
        // And reading it back yields the guest's own object.
        assert_eq!(standin.get_value("child").unwrap(), Value::Object(guest_value));
    }

    #[test]
    fn test_denied_define_shadows_locally() {
        let m = membrane_with(strict_root());
        allow_props(&m, "demo", &[("a", true, false)]);
        let host = m.host().object_with([("a", 1)]);
        let standin = object(m.contextify(&host.clone().into(), "demo", None).unwrap());
        assert!(
            standin
                .define_own_property(&"a".into(), PropertyDescriptor::data(9))
                .unwrap()
        );
        assert_eq!(standin.get_value("a").unwrap(), Value::from(9));
        assert_eq!(host.get_value("a").unwrap(), Value::from(1));
    }

    #[test]
    fn test_denied_prototype_write_diverges_locally() {
        let m = membrane_with(strict_root());
        let host = m.host().object();
        let original_proto = host.get_prototype_of().unwrap();
        let standin = object(m.contextify(&host.clone().into(), "demo", None).unwrap());
        let local = m.guest().object();
        assert!(standin.set_prototype_of(Some(local.clone())).unwrap());
        assert_eq!(standin.get_prototype_of().unwrap(), Some(local));
        assert_eq!(host.get_prototype_of().unwrap(), original_proto);
    }

    #[test]
    fn test_delete_respects_write_policy() {
        let m = membrane_with(strict_root());
        allow_props(&m, "demo", &[("keep", true, false), ("drop", true, true)]);
        let host = m.host().object_with([("keep", 1), ("drop", 2)]);
        let standin = object(m.contextify(&host.clone().into(), "demo", None).unwrap());
        assert!(!standin.delete(&"keep".into()).unwrap());
        assert!(standin.delete(&"drop".into()).unwrap());
        assert_eq!(host.own_keys().unwrap(), vec![PropertyKey::from("keep")]);
    }

    #[test]
    fn test_inherited_set_defines_on_receiver() {
        let m = membrane_with(PolicyData::default());
        let host = m.host().object_with([("shared", 1)]);
        let standin = object(m.contextify(&host.clone().into(), "proto", None).unwrap());
        let child = m.guest().object();
        child.set_prototype_of(Some(standin)).unwrap();

        assert!(child.set_value("shared", 2).unwrap());
        assert_eq!(
            child.get_own_property(&"shared".into()).unwrap(),
            Some(PropertyDescriptor::data(2))
        );
        assert_eq!(host.get_value("shared").unwrap(), Value::from(1));
    }

    #[test]
    fn test_stand_in_stays_extensible() {
        let m = membrane_with(PolicyData::default());
        let standin = object(m.contextify(&m.host().object().into(), "p", None).unwrap());
        assert!(!standin.prevent_extensions().unwrap());
        assert!(standin.is_extensible().unwrap());
    }

    // ==================== Call Tests ====================

    #[test]
    fn test_apply_translates_arguments_and_result() {
        let m = membrane_with(PolicyData::default());
        let host_fn = m.host().function("wrap", |_, args| {
            Ok(args.first().cloned().unwrap_or_default())
        });
        let standin = object(m.contextify(&host_fn.into(), "wrap", None).unwrap());
        let guest_obj = m.guest().object();
        let result = standin
            .call(&Value::Undefined, &[Value::Object(guest_obj.clone())])
            .unwrap();
        // Out through decontextify, back through the cache.
        assert_eq!(result, Value::Object(guest_obj));
    }

    #[test]
    fn test_denied_call_returns_undefined() {
        let m = membrane_with(strict_root());
        let called = std::rc::Rc::new(Cell::new(false));
        let flag = called.clone();
        let host_fn = m.host().function("f", move |_, _| {
            flag.set(true);
            Ok(Value::from(1))
        });
        let standin = object(m.contextify(&host_fn.into(), "f", None).unwrap());
        assert_eq!(standin.call(&Value::Undefined, &[]).unwrap(), Value::Undefined);
        assert!(!called.get());
    }

    #[test]
    fn test_denied_construct_returns_empty_object() {
        let m = membrane_with(strict_root());
        let host_fn = m.host().function("F", |_, _| Ok(Value::Undefined));
        let standin = object(m.contextify(&host_fn.into(), "F", None).unwrap());
        let instance = standin.new_instance(&[]).unwrap();
        assert!(!instance.is_proxy());
        assert_eq!(instance.realm(), m.guest().id());
        assert!(instance.own_keys().unwrap().is_empty());
    }

    #[test]
    fn test_construct_uses_original_prototype() {
        let m = membrane_with(PolicyData::default());
        let host_fn = m.host().function("Point", |this, args| {
            let Value::Object(this) = this else {
                return Ok(Value::Undefined);
            };
            this.set_value("x", args.first().cloned().unwrap_or_default())?;
            Ok(Value::Undefined)
        });
        let standin = object(m.contextify(&host_fn.into(), "Point", None).unwrap());
        let instance = standin.new_instance(&[Value::from(3)]).unwrap();
        assert!(instance.is_proxy());
        assert_eq!(instance.get_value("x").unwrap(), Value::from(3));
    }

    #[test]
    fn test_exceptions_are_translated() {
        let m = membrane_with(PolicyData::default());
        let host_error = m.host().error("boom");
        let thrown = host_error.clone();
        let host_fn = m
            .host()
            .function("fail", move |_, _| Err(Error::Thrown(Value::Object(thrown.clone()))));
        let standin = object(m.contextify(&host_fn.into(), "fail", None).unwrap());
        let Err(Error::Thrown(exception)) = standin.call(&Value::Undefined, &[]) else {
            panic!("expected a thrown exception");
        };
        let exception = object(exception);
        assert_eq!(exception.realm(), m.guest().id());
        assert_ne!(exception, host_error);
        assert_eq!(exception.get_value("message").unwrap(), Value::from("boom"));
        assert!(m.policy().store().document("fail.exception").is_some());
    }

    #[test]
    fn test_guard_errors_are_fatal_even_when_silent() {
        let m = membrane_with(strict_root());
        m.policy().store().with_forest(|f| {
            let mut doc = EntityPolicyData::typed(Direction::Contextify);
            doc.call = Some(CallPolicyData {
                allow: Some(Allow::Guard("(self, x) => x.missing.deeper".into())),
                ..Default::default()
            });
            f.documents.insert("g".into(), doc);
        });
        let host_fn = m.host().function("g", |_, _| Ok(Value::Undefined));
        let standin = object(m.contextify(&host_fn.into(), "g", None).unwrap());
        let err = standin
            .call(&Value::Undefined, &[m.guest().object().into()])
            .unwrap_err();
        assert!(matches!(err, Error::Policy(_)));
    }
}
