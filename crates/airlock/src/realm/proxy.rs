//! Proxy exotic objects: the handler trait and the invariant checks applied
//! to every trap result.
//!
//! A handler may report anything it likes as long as the report stays
//! consistent with its target. The checks below reject the reports that
//! would let a proxy lie about non-configurable properties, extensibility or
//! the prototype of a non-extensible target.

use super::object::{ObjectRef, PropertyDescriptor, ProxySlot};
use super::value::{PropertyKey, Value};
use crate::error::{Error, Result};

/// Trap set of a proxy. Every trap defaults to forwarding to the target.
pub trait ProxyHandler {
    /// `getPrototypeOf` trap
    fn get_prototype_of(&self, target: &ObjectRef) -> Result<Option<ObjectRef>> {
        target.get_prototype_of()
    }

    /// `setPrototypeOf` trap
    fn set_prototype_of(&self, target: &ObjectRef, prototype: Option<ObjectRef>) -> Result<bool> {
        target.set_prototype_of(prototype)
    }

    /// `isExtensible` trap
    fn is_extensible(&self, target: &ObjectRef) -> Result<bool> {
        target.is_extensible()
    }

    /// `preventExtensions` trap
    fn prevent_extensions(&self, target: &ObjectRef) -> Result<bool> {
        target.prevent_extensions()
    }

    /// `getOwnPropertyDescriptor` trap
    fn get_own_property(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>> {
        target.get_own_property(key)
    }

    /// `defineProperty` trap
    fn define_own_property(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool> {
        target.define_own_property(key, desc)
    }

    /// `has` trap
    fn has(&self, target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        target.has_property(key)
    }

    /// `get` trap
    fn get(&self, target: &ObjectRef, key: &PropertyKey, receiver: &Value) -> Result<Value> {
        target.get(key, receiver)
    }

    /// `set` trap
    fn set(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
    ) -> Result<bool> {
        target.set(key, value, receiver)
    }

    /// `deleteProperty` trap
    fn delete(&self, target: &ObjectRef, key: &PropertyKey) -> Result<bool> {
        target.delete(key)
    }

    /// `ownKeys` trap
    fn own_keys(&self, target: &ObjectRef) -> Result<Vec<PropertyKey>> {
        target.own_keys()
    }

    /// `apply` trap
    fn apply(&self, target: &ObjectRef, this: &Value, args: &[Value]) -> Result<Value> {
        target.call(this, args)
    }

    /// `construct` trap
    fn construct(
        &self,
        target: &ObjectRef,
        args: &[Value],
        new_target: &ObjectRef,
    ) -> Result<ObjectRef> {
        target.construct(args, new_target)
    }
}

fn violated(trap: &str, detail: impl std::fmt::Display) -> Error {
    Error::type_error(format!("proxy invariant violated in '{trap}': {detail}"))
}

pub(super) fn get_prototype_of(slot: &ProxySlot) -> Result<Option<ObjectRef>> {
    let reported = slot.handler.get_prototype_of(&slot.target)?;
    if !slot.target.is_extensible()? && reported != slot.target.get_prototype_of()? {
        return Err(violated(
            "getPrototypeOf",
            "non-extensible target reports a different prototype",
        ));
    }
    Ok(reported)
}

pub(super) fn set_prototype_of(slot: &ProxySlot, prototype: Option<ObjectRef>) -> Result<bool> {
    let ok = slot
        .handler
        .set_prototype_of(&slot.target, prototype.clone())?;
    if ok && !slot.target.is_extensible()? && prototype != slot.target.get_prototype_of()? {
        return Err(violated(
            "setPrototypeOf",
            "reported success on a non-extensible target",
        ));
    }
    Ok(ok)
}

pub(super) fn is_extensible(slot: &ProxySlot) -> Result<bool> {
    let reported = slot.handler.is_extensible(&slot.target)?;
    if reported != slot.target.is_extensible()? {
        return Err(violated("isExtensible", "result differs from target"));
    }
    Ok(reported)
}

pub(super) fn prevent_extensions(slot: &ProxySlot) -> Result<bool> {
    let ok = slot.handler.prevent_extensions(&slot.target)?;
    if ok && slot.target.is_extensible()? {
        return Err(violated(
            "preventExtensions",
            "reported success but target is still extensible",
        ));
    }
    Ok(ok)
}

pub(super) fn get_own_property(
    slot: &ProxySlot,
    key: &PropertyKey,
) -> Result<Option<PropertyDescriptor>> {
    let reported = slot.handler.get_own_property(&slot.target, key)?;
    let actual = slot.target.get_own_property(key)?;
    match (&reported, &actual) {
        (None, Some(actual)) if !actual.is_configurable() => {
            return Err(violated(
                "getOwnPropertyDescriptor",
                format!("non-configurable property '{key}' reported absent"),
            ));
        }
        (None, Some(_)) if !slot.target.is_extensible()? => {
            return Err(violated(
                "getOwnPropertyDescriptor",
                format!("property '{key}' of a non-extensible target reported absent"),
            ));
        }
        (Some(_), None) if !slot.target.is_extensible()? => {
            return Err(violated(
                "getOwnPropertyDescriptor",
                format!("new property '{key}' reported on a non-extensible target"),
            ));
        }
        (Some(reported), actual) if !reported.is_configurable() => {
            if actual.as_ref().is_none_or(PropertyDescriptor::is_configurable) {
                return Err(violated(
                    "getOwnPropertyDescriptor",
                    format!("'{key}' reported non-configurable but is configurable on target"),
                ));
            }
        }
        _ => {}
    }
    Ok(reported)
}

pub(super) fn define_own_property(
    slot: &ProxySlot,
    key: &PropertyKey,
    desc: PropertyDescriptor,
) -> Result<bool> {
    let non_configurable = !desc.is_configurable();
    let ok = slot.handler.define_own_property(&slot.target, key, desc)?;
    if !ok {
        return Ok(false);
    }
    match slot.target.get_own_property(key)? {
        None if !slot.target.is_extensible()? => Err(violated(
            "defineProperty",
            format!("added '{key}' to a non-extensible target"),
        )),
        None if non_configurable => Err(violated(
            "defineProperty",
            format!("non-configurable '{key}' missing on target"),
        )),
        Some(actual) if non_configurable && actual.is_configurable() => Err(violated(
            "defineProperty",
            format!("'{key}' is configurable on target"),
        )),
        _ => Ok(true),
    }
}

pub(super) fn has(slot: &ProxySlot, key: &PropertyKey) -> Result<bool> {
    let reported = slot.handler.has(&slot.target, key)?;
    if !reported && let Some(actual) = slot.target.get_own_property(key)? {
        if !actual.is_configurable() {
            return Err(violated(
                "has",
                format!("non-configurable property '{key}' reported absent"),
            ));
        }
        if !slot.target.is_extensible()? {
            return Err(violated(
                "has",
                format!("property '{key}' of a non-extensible target reported absent"),
            ));
        }
    }
    Ok(reported)
}

pub(super) fn get(slot: &ProxySlot, key: &PropertyKey, receiver: &Value) -> Result<Value> {
    let reported = slot.handler.get(&slot.target, key, receiver)?;
    match slot.target.get_own_property(key)? {
        Some(actual @ PropertyDescriptor::Data { .. }) if actual.is_frozen_data() => {
            if let Some(value) = actual.value()
                && !value.same_value(&reported)
            {
                return Err(violated(
                    "get",
                    format!("frozen property '{key}' reported with a different value"),
                ));
            }
        }
        Some(PropertyDescriptor::Accessor {
            get: None,
            configurable: false,
            ..
        }) if !matches!(reported, Value::Undefined) => {
            return Err(violated(
                "get",
                format!("getter-less accessor '{key}' reported a value"),
            ));
        }
        _ => {}
    }
    Ok(reported)
}

pub(super) fn set(slot: &ProxySlot, key: &PropertyKey, value: Value, receiver: &Value) -> Result<bool> {
    let ok = slot
        .handler
        .set(&slot.target, key, value.clone(), receiver)?;
    if ok {
        match slot.target.get_own_property(key)? {
            Some(actual) if actual.is_frozen_data() => {
                if actual.value().is_some_and(|v| !v.same_value(&value)) {
                    return Err(violated(
                        "set",
                        format!("reported success on frozen property '{key}'"),
                    ));
                }
            }
            Some(PropertyDescriptor::Accessor {
                set: None,
                configurable: false,
                ..
            }) => {
                return Err(violated(
                    "set",
                    format!("reported success on setter-less accessor '{key}'"),
                ));
            }
            _ => {}
        }
    }
    Ok(ok)
}

pub(super) fn delete(slot: &ProxySlot, key: &PropertyKey) -> Result<bool> {
    let ok = slot.handler.delete(&slot.target, key)?;
    if ok && let Some(actual) = slot.target.get_own_property(key)? {
        if !actual.is_configurable() {
            return Err(violated(
                "deleteProperty",
                format!("reported deleting non-configurable '{key}'"),
            ));
        }
        if !slot.target.is_extensible()? {
            return Err(violated(
                "deleteProperty",
                format!("reported deleting '{key}' from a non-extensible target"),
            ));
        }
    }
    Ok(ok)
}

pub(super) fn own_keys(slot: &ProxySlot) -> Result<Vec<PropertyKey>> {
    let reported = slot.handler.own_keys(&slot.target)?;
    for (i, key) in reported.iter().enumerate() {
        if reported[..i].contains(key) {
            return Err(violated("ownKeys", format!("duplicate key '{key}'")));
        }
    }
    let extensible = slot.target.is_extensible()?;
    let target_keys = slot.target.own_keys()?;
    for key in &target_keys {
        let required = !extensible
            || slot
                .target
                .get_own_property(key)?
                .is_some_and(|d| !d.is_configurable());
        if required && !reported.contains(key) {
            return Err(violated("ownKeys", format!("key '{key}' must be reported")));
        }
    }
    if !extensible && reported.len() != target_keys.len() {
        return Err(violated(
            "ownKeys",
            "non-extensible target reported with extra keys",
        ));
    }
    Ok(reported)
}

pub(super) fn apply(slot: &ProxySlot, this: &Value, args: &[Value]) -> Result<Value> {
    slot.handler.apply(&slot.target, this, args)
}

pub(super) fn construct(slot: &ProxySlot, args: &[Value], new_target: &ObjectRef) -> Result<ObjectRef> {
    slot.handler.construct(&slot.target, args, new_target)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::realm::Realm;

    #[derive(Debug)]
    struct Forwarding;

    impl ProxyHandler for Forwarding {}

    #[derive(Debug)]
    struct Liar;

    impl ProxyHandler for Liar {
        fn is_extensible(&self, _target: &ObjectRef) -> Result<bool> {
            Ok(false)
        }

        fn get_own_property(
            &self,
            _target: &ObjectRef,
            _key: &PropertyKey,
        ) -> Result<Option<PropertyDescriptor>> {
            Ok(None)
        }

        fn own_keys(&self, _target: &ObjectRef) -> Result<Vec<PropertyKey>> {
            Ok(Vec::new())
        }
    }

    fn frozen_target(realm: &Realm) -> ObjectRef {
        let target = realm.object();
        target
            .define_own_property(
                &"fixed".into(),
                PropertyDescriptor::Data {
                    value: Value::from(1),
                    writable: false,
                    enumerable: true,
                    configurable: false,
                },
            )
            .unwrap();
        target
    }

    #[test]
    fn test_forwarding_proxy_behaves_like_target() {
        let realm = Realm::new("test");
        let target = frozen_target(&realm);
        target.define_value("open", 2).unwrap();
        let proxy = realm.proxy(target.clone(), Rc::new(Forwarding));
        assert_eq!(proxy.get_value("fixed").unwrap(), Value::from(1));
        assert!(proxy.set_value("open", 3).unwrap());
        assert_eq!(target.get_value("open").unwrap(), Value::from(3));
        assert_eq!(proxy.own_keys().unwrap().len(), 2);
        assert!(proxy.is_extensible().unwrap());
    }

    #[test]
    fn test_lying_about_extensibility_is_rejected() {
        let realm = Realm::new("test");
        let proxy = realm.proxy(realm.object(), Rc::new(Liar));
        assert!(matches!(proxy.is_extensible(), Err(Error::Type(_))));
    }

    #[test]
    fn test_hiding_non_configurable_property_is_rejected() {
        let realm = Realm::new("test");
        let proxy = realm.proxy(frozen_target(&realm), Rc::new(Liar));
        assert!(matches!(
            proxy.get_own_property(&"fixed".into()),
            Err(Error::Type(_))
        ));
        assert!(matches!(proxy.own_keys(), Err(Error::Type(_))));
    }

    #[test]
    fn test_proxy_of_function_is_callable() {
        let realm = Realm::new("test");
        let f = realm.function("double", |_, args| {
            Ok(Value::Number(args.first().map_or(0.0, Value::to_number) * 2.0))
        });
        let proxy = realm.proxy(f, Rc::new(Forwarding));
        assert!(proxy.is_callable());
        assert_eq!(
            proxy.call(&Value::Undefined, &[Value::from(21)]).unwrap(),
            Value::from(42)
        );
    }
}
