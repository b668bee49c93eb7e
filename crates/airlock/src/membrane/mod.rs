//! The membrane between a trusted host realm and an untrusted guest realm.
//!
//! Every object crossing the boundary is replaced by a *stand-in*: a proxy in
//! the destination realm whose target is an empty placeholder of the same
//! kind and whose traps ([`interceptor`]) consult the policy tree before
//! touching the original. Primitives cross unchanged.
//!
//! Two identity maps keep crossings stable. Contextifying a host object `E`
//! registers `E -> P` in the contextify map and `P -> E` in the decontextify
//! map, so repeated crossings return the same stand-in and a stand-in
//! crossing back unwraps to its original. Both maps hold their entries
//! weakly.

mod cache;
mod interceptor;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use self::cache::IdentityMap;
use self::interceptor::Interceptor;
use crate::error::{Error, Result};
use crate::policy::{AccessorMode, AccessorPolicy, CallPolicy, Direction, EntityPolicy, Override, Policy};
use crate::realm::{ObjectRef, PropertyDescriptor, PropertyKey, Realm, Value};

pub(crate) struct MembraneInner {
    host: Realm,
    guest: Realm,
    policy: Policy,
    /// Host-side object -> guest-side counterpart
    contextified: RefCell<IdentityMap>,
    /// Guest-side object -> host-side counterpart
    decontextified: RefCell<IdentityMap>,
}

/// A host realm, a guest realm and the policy mediating between them.
///
/// ## Example
///
/// ```rust,ignore
/// use airlock::{Membrane, Policy, Realm, StoreConfig};
///
/// let policy = Policy::open(&StoreConfig::new("./policies"))?;
/// let membrane = Membrane::new(Realm::new("host"), Realm::new("guest"), policy);
/// let config = membrane.host().object_with([("debug", false)]);
/// membrane.expose("config", config.into())?;
/// ```
#[derive(Clone)]
pub struct Membrane(Rc<MembraneInner>);

impl fmt::Debug for Membrane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Membrane")
            .field("host", &self.0.host)
            .field("guest", &self.0.guest)
            .field("policy", &self.0.policy)
            .field("contextified", &self.0.contextified.borrow().len())
            .field("decontextified", &self.0.decontextified.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Membrane {
    /// Connect `host` and `guest` under `policy`. Each host intrinsic is
    /// paired with its guest counterpart so mirrored prototype chains end in
    /// the destination realm's own intrinsics.
    pub fn new(host: Realm, guest: Realm, policy: Policy) -> Self {
        let mut contextified = IdentityMap::new();
        let mut decontextified = IdentityMap::new();
        for (h, g) in host.intrinsics().all().into_iter().zip(guest.intrinsics().all()) {
            contextified.insert(h, g);
            decontextified.insert(g, h);
        }
        tracing::debug!(host = host.name(), guest = guest.name(), "membrane created");
        Self(Rc::new(MembraneInner {
            host,
            guest,
            policy,
            contextified: RefCell::new(contextified),
            decontextified: RefCell::new(decontextified),
        }))
    }

    pub(crate) fn upgrade(inner: &Weak<MembraneInner>) -> Result<Self> {
        inner
            .upgrade()
            .map(Self)
            .ok_or_else(|| Error::type_error("membrane has been torn down"))
    }

    /// The trusted realm.
    pub fn host(&self) -> &Realm {
        &self.0.host
    }

    /// The untrusted realm.
    pub fn guest(&self) -> &Realm {
        &self.0.guest
    }

    /// The policy consulted by every trap.
    pub fn policy(&self) -> &Policy {
        &self.0.policy
    }

    /// Realm values crossing in `direction` come from.
    pub fn source(&self, direction: Direction) -> &Realm {
        match direction {
            Direction::Contextify => &self.0.host,
            Direction::Decontextify => &self.0.guest,
        }
    }

    /// Realm values crossing in `direction` arrive in.
    pub fn destination(&self, direction: Direction) -> &Realm {
        self.source(direction.opposite())
    }

    fn cache(&self, direction: Direction) -> &RefCell<IdentityMap> {
        match direction {
            Direction::Contextify => &self.0.contextified,
            Direction::Decontextify => &self.0.decontextified,
        }
    }

    /// Counterpart of `entity` on the other side, if one is alive.
    pub fn cached(&self, direction: Direction, entity: &ObjectRef) -> Option<ObjectRef> {
        self.cache(direction).borrow().get(entity)
    }

    // -----------------------------------------------------------------------
    // Transforms
    // -----------------------------------------------------------------------

    /// Host value into the guest realm.
    pub fn contextify(&self, value: &Value, path: &str, policy: Option<&EntityPolicy>) -> Result<Value> {
        self.transform(Direction::Contextify, value, path, policy)
    }

    /// Guest value into the host realm.
    pub fn decontextify(&self, value: &Value, path: &str, policy: Option<&EntityPolicy>) -> Result<Value> {
        self.transform(Direction::Decontextify, value, path, policy)
    }

    /// Move `value` across in `direction`. Without an explicit policy the
    /// identity cache is consulted first and the root policy for `path` is
    /// resolved only on a miss.
    pub fn transform(
        &self,
        direction: Direction,
        value: &Value,
        path: &str,
        policy: Option<&EntityPolicy>,
    ) -> Result<Value> {
        let Value::Object(entity) = value else {
            return Ok(value.clone());
        };
        if let Some(policy) = policy
            && policy.direction() != direction
        {
            return Err(Error::type_error(format!(
                "{} policy for {} cannot govern a {direction} crossing",
                policy.direction(),
                policy.path()
            )));
        }

        let explicit = policy.and_then(EntityPolicy::override_);
        if explicit == Some(Override::Expose) {
            tracing::debug!(path, %direction, "exposing original object");
            return Ok(value.clone());
        }
        if explicit != Some(Override::Protect)
            && let Some(standin) = self.cached(direction, entity)
        {
            tracing::trace!(path, %direction, "stand-in cache hit");
            return Ok(Value::Object(standin));
        }

        let policy = match policy {
            Some(policy) => policy.clone(),
            None => self.0.policy.entity_policy(direction, path),
        };
        let override_ = policy.override_();
        if override_ == Some(Override::Expose) {
            tracing::debug!(path, %direction, "exposing original object");
            return Ok(value.clone());
        }

        let standin = self.build(direction, entity, path, policy)?;
        // A protected original never gets a forward entry, so every crossing
        // builds a fresh stand-in. The reverse entry still unwraps it.
        if override_ != Some(Override::Protect) {
            self.cache(direction).borrow_mut().insert(entity, &standin);
        }
        self.cache(direction.opposite())
            .borrow_mut()
            .insert(&standin, entity);
        Ok(Value::Object(standin))
    }

    fn build(
        &self,
        direction: Direction,
        entity: &ObjectRef,
        path: &str,
        policy: EntityPolicy,
    ) -> Result<ObjectRef> {
        let source = self.source(direction);
        if entity.realm() != source.id() {
            return Err(Error::type_error(format!(
                "{entity:?} does not belong to realm {} and cannot {direction}",
                source.name()
            )));
        }
        // Classification must use the origin realm's prototypes.
        let kind = source.classify(entity)?;
        let destination = self.destination(direction);
        let placeholder = destination.placeholder(kind);
        let handler = Interceptor::new(
            Rc::downgrade(&self.0),
            direction,
            entity.clone(),
            path.to_owned(),
            policy,
        );
        tracing::trace!(path, %direction, ?kind, "created stand-in");
        Ok(destination.proxy(placeholder, Rc::new(handler)))
    }

    /// Transform a property descriptor: `value` with `value_policy`, each
    /// accessor independently with its own policy.
    pub fn transform_descriptor(
        &self,
        direction: Direction,
        desc: &PropertyDescriptor,
        path: &str,
        value_policy: &EntityPolicy,
        accessors: &AccessorPolicy,
    ) -> Result<PropertyDescriptor> {
        Ok(match desc {
            PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => PropertyDescriptor::Data {
                value: self.transform(direction, value, path, Some(value_policy))?,
                writable: *writable,
                enumerable: *enumerable,
                configurable: *configurable,
            },
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => PropertyDescriptor::Accessor {
                get: self.transform_function(direction, get.as_ref(), &accessors.get)?,
                set: self.transform_function(direction, set.as_ref(), &accessors.set)?,
                enumerable: *enumerable,
                configurable: *configurable,
            },
        })
    }

    fn transform_function(
        &self,
        direction: Direction,
        function: Option<&ObjectRef>,
        policy: &EntityPolicy,
    ) -> Result<Option<ObjectRef>> {
        let Some(function) = function else {
            return Ok(None);
        };
        match self.transform(direction, &Value::Object(function.clone()), policy.path(), Some(policy))? {
            Value::Object(standin) => Ok(Some(standin)),
            other => Err(Error::type_error(format!("accessor became a primitive: {other}"))),
        }
    }

    /// Transform positional arguments, each with the (possibly
    /// value-dependent) policy `call` selects for its index.
    pub fn transform_arguments(
        &self,
        direction: Direction,
        args: &[Value],
        call: &CallPolicy,
    ) -> Result<Vec<Value>> {
        args.iter()
            .enumerate()
            .map(|(index, arg)| {
                let policy = call.argument(index, args);
                self.transform(direction, arg, policy.path(), Some(&policy))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Exposure
    // -----------------------------------------------------------------------

    /// Contextify `value` at path `name` and define it on the guest global.
    pub fn expose(&self, name: &str, value: Value) -> Result<bool> {
        let standin = self.contextify(&value, name, None)?;
        self.0
            .guest
            .global()
            .define_own_property(&name.into(), PropertyDescriptor::hidden(standin))
    }

    /// Copy the host global's own property `name` onto the guest global
    /// through the global policy. Returns false if the property is missing
    /// or its read is denied.
    pub fn expose_global_property(&self, name: &str) -> Result<bool> {
        let key = PropertyKey::from(name);
        let Some(desc) = self.0.host.global().get_own_property(&key)? else {
            return Ok(false);
        };
        let property = self.0.policy.global().property(&key);
        if !property.read()? {
            return Ok(false);
        }
        let mirrored = self.transform_descriptor(
            Direction::Contextify,
            &desc,
            property.path(),
            &property.read_policy(),
            &property.accessor_policy(AccessorMode::Mirror),
        )?;
        self.0.guest.global().define_own_property(&key, mirrored)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::policy::{EntityPolicyData, PolicyData};
    use crate::store::PolicyStore;

    fn membrane() -> Membrane {
        let policy = Policy::new(PolicyStore::in_memory(PolicyData::default()));
        Membrane::new(Realm::new("host"), Realm::new("guest"), policy)
    }

    // ==================== Transform Tests ====================

    #[test]
    fn test_primitives_pass_through() {
        let m = membrane();
        for value in [
            Value::Undefined,
            Value::Null,
            Value::from(true),
            Value::from(1.5),
            Value::BigInt(7),
            Value::from("s"),
        ] {
            assert_eq!(m.contextify(&value, "p", None).unwrap(), value);
        }
    }

    #[test]
    fn test_intrinsics_are_paired() {
        let m = membrane();
        let host_proto = m.host().intrinsics().array_prototype.clone();
        let crossed = m.contextify(&Value::Object(host_proto), "p", None).unwrap();
        assert_eq!(
            crossed.as_object(),
            Some(&m.guest().intrinsics().array_prototype)
        );
    }

    #[test]
    fn test_stand_in_lives_in_destination_realm() {
        let m = membrane();
        let obj = m.host().object();
        let Value::Object(standin) = m.contextify(&obj.clone().into(), "p", None).unwrap() else {
            panic!("expected an object");
        };
        assert!(standin.is_proxy());
        assert_eq!(standin.realm(), m.guest().id());
        assert_eq!(m.cached(Direction::Decontextify, &standin), Some(obj));
    }

    #[test]
    fn test_foreign_realm_object_is_rejected() {
        let m = membrane();
        let guest_obj = m.guest().object();
        let err = m.contextify(&guest_obj.into(), "p", None).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn test_wrong_direction_policy_is_rejected() {
        let m = membrane();
        let policy = m.policy().decontextify_entity_policy("p");
        let err = m
            .contextify(&m.host().object().into(), "p", Some(&policy))
            .unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn test_protect_bypasses_cache() {
        let m = membrane();
        m.policy().store().with_forest(|f| {
            let mut doc = EntityPolicyData::typed(Direction::Contextify);
            doc.override_ = Some(Override::Protect);
            f.documents.insert("secret".into(), doc);
        });
        let obj: Value = m.host().object().into();
        let a = m.contextify(&obj, "secret", None).unwrap();
        let b = m.contextify(&obj, "secret", None).unwrap();
        assert_ne!(a, b);
        // Both still unwrap to the original.
        assert_eq!(m.decontextify(&a, "back", None).unwrap(), obj);
        assert_eq!(m.decontextify(&b, "back", None).unwrap(), obj);
    }

    #[test]
    fn test_expose_override_returns_original() {
        let m = membrane();
        m.policy().store().with_forest(|f| {
            let mut doc = EntityPolicyData::typed(Direction::Contextify);
            doc.override_ = Some(Override::Expose);
            f.documents.insert("raw".into(), doc);
        });
        let obj: Value = m.host().object().into();
        assert_eq!(m.contextify(&obj, "raw", None).unwrap(), obj);
    }

    #[test]
    fn test_membrane_teardown_disarms_stand_ins() {
        let m = membrane();
        let obj = m.host().object_with([("a", 1)]);
        let Value::Object(standin) = m.contextify(&obj.into(), "p", None).unwrap() else {
            panic!("expected an object");
        };
        drop(m);
        assert!(matches!(standin.get_value("a"), Err(Error::Type(_))));
    }
}
