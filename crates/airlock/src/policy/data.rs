//! Serialized shape of policy documents.
//!
//! These types map one-to-one onto the JSON files in a policy root. All maps
//! are ordered so the written output is deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::realm::Value;

/// Which way a governed value crosses the membrane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host value entering the guest realm
    Contextify,
    /// Guest value entering the host realm
    Decontextify,
}

impl Direction {
    /// The other direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Contextify => Self::Decontextify,
            Self::Decontextify => Self::Contextify,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Contextify => "Contextify",
            Self::Decontextify => "Decontextify",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Action a default decision is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reading a property or the prototype
    Read,
    /// Writing, defining or deleting a property
    Write,
    /// Calling a function
    Call,
    /// Constructing with a function
    Construct,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Call => "call",
            Self::Construct => "construct",
        })
    }
}

/// Per-direction default decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefaults {
    /// Default for property reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    /// Default for property writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
    /// Default for calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<bool>,
    /// Default for construction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub construct: Option<bool>,
}

impl ActionDefaults {
    fn all(value: bool) -> Self {
        Self {
            read: Some(value),
            write: Some(value),
            call: Some(value),
            construct: Some(value),
        }
    }

    /// Configured default for `action`.
    pub fn get(&self, action: Action) -> Option<bool> {
        match action {
            Action::Read => self.read,
            Action::Write => self.write,
            Action::Call => self.call,
            Action::Construct => self.construct,
        }
    }
}

/// Defaults consulted when a decision is first needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Ask on the terminal instead of granting while learning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
    /// Grant unresolved decisions and record them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learn: Option<bool>,
    /// Defaults for host values entering the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contextify: Option<ActionDefaults>,
    /// Defaults for guest values entering the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decontextify: Option<ActionDefaults>,
}

impl PolicyDefaults {
    /// Process-wide defaults: learning, not interactive, everything denied
    /// unless learned.
    pub fn process_defaults() -> Self {
        Self {
            interactive: Some(false),
            learn: Some(true),
            contextify: Some(ActionDefaults::all(false)),
            decontextify: Some(ActionDefaults::all(false)),
        }
    }

    /// Defaults table for `direction`.
    pub fn for_direction(&self, direction: Direction) -> Option<&ActionDefaults> {
        match direction {
            Direction::Contextify => self.contextify.as_ref(),
            Direction::Decontextify => self.decontextify.as_ref(),
        }
    }
}

/// How denials are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Ignore
    Silent,
    /// Log a warning
    #[default]
    Warn,
    /// Fail the operation with [`crate::Error::Violation`]
    Throw,
}

/// Per-entity bypass of the membrane's normal behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    /// Hand the original object across unwrapped
    Expose,
    /// Always build a fresh stand-in, bypassing the identity cache
    Protect,
}

/// Root policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyData {
    /// Defaults for the whole forest
    #[serde(default = "PolicyDefaults::process_defaults")]
    pub options: PolicyDefaults,
    /// Violation reporting mode
    #[serde(default)]
    pub onerror: ErrorMode,
    /// Id of the document governing the host global
    #[serde(default = "default_global")]
    pub global: String,
    /// Document id to relative file path
    #[serde(default)]
    pub manifest: BTreeMap<String, String>,
}

fn default_global() -> String {
    "global".to_owned()
}

impl Default for PolicyData {
    fn default() -> Self {
        Self {
            options: PolicyDefaults::process_defaults(),
            onerror: ErrorMode::default(),
            global: default_global(),
            manifest: BTreeMap::new(),
        }
    }
}

/// Inline policy data or the id of a separate document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyRef {
    /// Indirection to a named sub-document
    Named(String),
    /// Policy stored in place
    Inline(Box<EntityPolicyData>),
}

impl PolicyRef {
    pub(crate) fn empty() -> Self {
        Self::Inline(Box::default())
    }

    pub(crate) fn as_inline_mut(&mut self) -> Option<&mut EntityPolicyData> {
        match self {
            Self::Inline(data) => Some(data.as_mut()),
            Self::Named(_) => None,
        }
    }
}

/// Policy for one object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPolicyData {
    /// Direction this document was created for
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Direction>,
    /// Membrane override
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_: Option<Override>,
    /// Defaults for this subtree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<PolicyDefaults>,
    /// Per-property policies
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyPolicyData>,
    /// Call policy (functions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<CallPolicyData>,
    /// Construct policy (functions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub construct: Option<CallPolicyData>,
}

impl EntityPolicyData {
    /// Fresh document for `direction`.
    pub fn typed(direction: Direction) -> Self {
        Self {
            kind: Some(direction),
            ..Self::default()
        }
    }
}

/// Policy for one property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPolicyData {
    /// Frozen read decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    /// Frozen write decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
    /// Policy for values read through this property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_policy: Option<PolicyRef>,
    /// Policy for values written through this property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_policy: Option<PolicyRef>,
}

/// Static decision or guard source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Allow {
    /// Fixed decision
    Flag(bool),
    /// Guard predicate source
    Guard(String),
}

/// Policy for calling or constructing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPolicyData {
    /// Whether the invocation is allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Allow>,
    /// Policy for `this` (and `new.target` when constructing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub this_arg: Option<PolicyRef>,
    /// Positional argument policies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Option<ArgumentPolicy>>,
    /// Policy for the returned value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PolicyRef>,
}

/// Policy for one argument position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentPolicy {
    /// Rules selected by sibling argument values
    Rules(Vec<ConditionalRule>),
    /// One policy regardless of the other arguments
    Entity(PolicyRef),
}

/// One learned branch of an argument policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRule {
    /// Argument index the rule inspects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<usize>,
    /// Value that argument must strictly equal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Expected>,
    /// Policy applied when the rule matches
    pub policy: PolicyRef,
}

impl ConditionalRule {
    /// Unconditional rule holding an empty policy.
    pub(crate) fn catch_all() -> Self {
        Self {
            dependency: None,
            expected: None,
            policy: PolicyRef::empty(),
        }
    }

    /// Whether this rule selects for `args`. Rules without a dependency or
    /// expectation always match.
    pub fn matches(&self, args: &[Value]) -> bool {
        match (self.dependency, &self.expected) {
            (Some(index), Some(expected)) => args.get(index).is_some_and(|v| expected.matches(v)),
            _ => true,
        }
    }
}

/// Primitive a conditional rule compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expected {
    /// `null`
    Null(()),
    /// Boolean
    Bool(bool),
    /// Number
    Number(f64),
    /// String
    String(String),
}

impl Expected {
    /// Strict equality against a realm value.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Null(()), Value::Null) => true,
            (Self::Bool(a), Value::Bool(b)) => a == b,
            (Self::Number(a), Value::Number(b)) => a == b,
            (Self::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_root_defaults() {
        let root: PolicyData = serde_json::from_str("{}").unwrap();
        assert_eq!(root.onerror, ErrorMode::Warn);
        assert_eq!(root.global, "global");
        assert!(root.manifest.is_empty());
        assert_eq!(PolicyData::default().options.learn, Some(true));
    }

    #[test]
    fn test_entity_document_parses() {
        let json = r#"{
            "type": "contextify",
            "override": "expose",
            "properties": {
                "a": { "read": true, "readPolicy": "demo/a" },
                "b": { "write": false, "writePolicy": { "properties": {} } }
            },
            "call": {
                "allow": "(self, x) => x === 1",
                "arguments": [
                    [ { "dependency": 0, "expected": "x", "policy": {} } ],
                    null,
                    {}
                ]
            }
        }"#;
        let data: EntityPolicyData = serde_json::from_str(json).unwrap();
        assert_eq!(data.kind, Some(Direction::Contextify));
        assert_eq!(data.override_, Some(Override::Expose));
        assert_eq!(
            data.properties["a"].read_policy,
            Some(PolicyRef::Named("demo/a".into()))
        );
        assert!(matches!(
            data.properties["b"].write_policy,
            Some(PolicyRef::Inline(_))
        ));
        let call = data.call.unwrap();
        assert_eq!(call.allow, Some(Allow::Guard("(self, x) => x === 1".into())));
        assert!(matches!(call.arguments[0], Some(ArgumentPolicy::Rules(_))));
        assert!(call.arguments[1].is_none());
        assert!(matches!(
            call.arguments[2],
            Some(ArgumentPolicy::Entity(PolicyRef::Inline(_)))
        ));
    }

    #[test]
    fn test_empty_fields_are_not_written() {
        let data = EntityPolicyData::typed(Direction::Decontextify);
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"type":"decontextify"}"#);
    }

    #[test]
    fn test_rule_matching() {
        let rule = ConditionalRule {
            dependency: Some(1),
            expected: Some(Expected::String("x".into())),
            policy: PolicyRef::empty(),
        };
        assert!(rule.matches(&[Value::Null, Value::from("x")]));
        assert!(!rule.matches(&[Value::from("x")]));
        assert!(!rule.matches(&[Value::Null, Value::from("y")]));
        assert!(ConditionalRule::catch_all().matches(&[]));
    }
}
