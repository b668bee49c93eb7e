//! Airlock: policy-driven membrane between two realms
//!
//! Airlock connects a trusted host realm and an untrusted guest realm. Every
//! object crossing between them is replaced by a same-realm stand-in whose
//! traps consult a hierarchical, path-addressed policy before touching the
//! original. Unconfigured decisions can be learned on first use and written
//! back to a directory of JSON policy documents.

mod config;
mod error;
mod membrane;
mod policy;
mod realm;
mod store;

pub use config::StoreConfig;
pub use error::{Error, Result, StoreError};
pub use membrane::Membrane;
pub use policy::{
    AccessorMode, AccessorPolicy, Action, ActionDefaults, Allow, ArgumentPolicy, CallPolicy,
    CallPolicyData, ConditionalRule, Direction, EntityPolicy, EntityPolicyData, ErrorMode,
    Expected, Guard, Override, Policy, PolicyData, PolicyDefaults, PolicyParameters, PolicyRef,
    PropertyPolicy, PropertyPolicyData, Prompter, StdinPrompter,
};
pub use realm::{
    EntityKind, Intrinsics, NativeCall, NativeConstruct, NativeFunction, ObjectClass, ObjectRef,
    PropertyDescriptor, PropertyKey, ProxyHandler, Realm, RealmId, Symbol, Value,
};
pub use store::PolicyStore;
