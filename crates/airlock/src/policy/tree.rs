//! Live policy nodes over the shared forest.
//!
//! Policy handles never own document data. Each one carries a [`Location`]
//! (document id plus a walk of steps) and re-resolves it against the forest
//! on every decision, so handles stay valid while the forest is mutated and
//! persisted underneath them. A handle's *role* is the [`Direction`] of the
//! values it governs:
//!
//! | derived policy  | role                 |
//! |-----------------|----------------------|
//! | `read_policy`   | same as owner        |
//! | `write_policy`  | opposite             |
//! | `this_arg`      | opposite             |
//! | `argument(i)`   | opposite             |
//! | `result`        | same as owner        |
//!
//! Handles form a tree of `Rc`s pointing strictly upward (child to parent),
//! so no reference cycles arise however deep the membrane walks.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::iter;
use std::rc::Rc;

use super::Policy;
use super::data::{
    Action, Allow, ArgumentPolicy, CallPolicyData, ConditionalRule, Direction, EntityPolicyData,
    Override, PolicyDefaults, PolicyRef, PropertyPolicyData,
};
use crate::error::Result;
use crate::realm::{PropertyKey, Value};
use crate::store::Forest;

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Persisted sub-document
    Document,
    /// Transient node, never written
    Scratch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Property(String),
    ReadPolicy,
    WritePolicy,
    Call,
    Construct,
    ThisArg,
    Result,
    Argument(usize),
    Rule(usize, usize),
}

/// Address of a node inside the forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Location {
    scope: Scope,
    id: String,
    steps: Vec<Step>,
}

impl Location {
    pub(crate) fn document(id: impl Into<String>) -> Self {
        Self {
            scope: Scope::Document,
            id: id.into(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn scratch(id: impl Into<String>) -> Self {
        Self {
            scope: Scope::Scratch,
            id: id.into(),
            steps: Vec::new(),
        }
    }

    fn child(&self, step: Step) -> Self {
        let mut child = self.clone();
        child.steps.push(step);
        child
    }

    fn resolve<'a>(&self, forest: &'a mut Forest) -> Option<Node<'a>> {
        let documents = match self.scope {
            Scope::Document => &mut forest.documents,
            Scope::Scratch => &mut forest.scratch,
        };
        let mut node = Node::Entity(documents.get_mut(&self.id)?);
        for step in &self.steps {
            node = node.descend(step)?;
        }
        Some(node)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope == Scope::Scratch {
            f.write_str("~")?;
        }
        f.write_str(&self.id)?;
        for step in &self.steps {
            match step {
                Step::Property(key) => write!(f, ".properties[{key:?}]")?,
                Step::ReadPolicy => f.write_str(".readPolicy")?,
                Step::WritePolicy => f.write_str(".writePolicy")?,
                Step::Call => f.write_str(".call")?,
                Step::Construct => f.write_str(".construct")?,
                Step::ThisArg => f.write_str(".thisArg")?,
                Step::Result => f.write_str(".result")?,
                Step::Argument(i) => write!(f, ".arguments[{i}]")?,
                Step::Rule(i, j) => write!(f, ".arguments[{i}][{j}].policy")?,
            }
        }
        Ok(())
    }
}

/// Mutable view of one node during a walk.
pub(crate) enum Node<'a> {
    Entity(&'a mut EntityPolicyData),
    Property(&'a mut PropertyPolicyData),
    Call(&'a mut CallPolicyData),
}

impl<'a> Node<'a> {
    fn descend(self, step: &Step) -> Option<Node<'a>> {
        match (self, step) {
            (Node::Entity(e), Step::Property(key)) => {
                Some(Node::Property(e.properties.entry(key.clone()).or_default()))
            }
            (Node::Entity(e), Step::Call) => {
                Some(Node::Call(e.call.get_or_insert_with(CallPolicyData::default)))
            }
            (Node::Entity(e), Step::Construct) => Some(Node::Call(
                e.construct.get_or_insert_with(CallPolicyData::default),
            )),
            (Node::Call(c), Step::Argument(i)) => match c.arguments.get_mut(*i)? {
                Some(ArgumentPolicy::Entity(policy)) => policy.as_inline_mut().map(Node::Entity),
                _ => None,
            },
            (Node::Call(c), Step::Rule(i, j)) => match c.arguments.get_mut(*i)? {
                Some(ArgumentPolicy::Rules(rules)) => {
                    rules.get_mut(*j)?.policy.as_inline_mut().map(Node::Entity)
                }
                _ => None,
            },
            (node, step) => node
                .policy_slot(step)?
                .as_mut()?
                .as_inline_mut()
                .map(Node::Entity),
        }
    }

    /// Slot holding a derived policy reference.
    fn policy_slot(self, step: &Step) -> Option<&'a mut Option<PolicyRef>> {
        match (self, step) {
            (Node::Property(p), Step::ReadPolicy) => Some(&mut p.read_policy),
            (Node::Property(p), Step::WritePolicy) => Some(&mut p.write_policy),
            (Node::Call(c), Step::ThisArg) => Some(&mut c.this_arg),
            (Node::Call(c), Step::Result) => Some(&mut c.result),
            _ => None,
        }
    }
}

/// Where a derived policy's data lives once its slot is filled.
enum Target {
    Named(String),
    Inline,
}

impl Target {
    fn of(policy: &PolicyRef) -> Self {
        match policy {
            PolicyRef::Named(id) => Self::Named(id.clone()),
            PolicyRef::Inline(_) => Self::Inline,
        }
    }
}

impl Policy {
    /// Run `f` on the node at `location`, or return `None` if the walk does
    /// not reach a node. `f` runs under the forest lock and must not call
    /// back into the policy.
    fn with_node<R>(&self, location: &Location, f: impl FnOnce(Node<'_>) -> R) -> Option<R> {
        let result = self
            .store()
            .with_forest(|forest| location.resolve(forest).map(f));
        if result.is_none() {
            tracing::warn!(%location, "policy node unreachable; using a transient default");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// EntityPolicy
// ---------------------------------------------------------------------------

struct EntityCore {
    policy: Policy,
    direction: Direction,
    path: String,
    parent: Option<Rc<EntityCore>>,
    location: Location,
    accessor: Option<AccessorSource>,
}

impl EntityCore {
    fn own_options(&self) -> Option<PolicyDefaults> {
        if self.location.scope == Scope::Scratch {
            return None;
        }
        self.policy
            .with_node(&self.location, |node| match node {
                Node::Entity(e) => e.options.clone(),
                _ => None,
            })
            .flatten()
    }

    /// Options of the nearest entity up the parent chain that carries any,
    /// else the root document's.
    fn nearest_options(&self) -> PolicyDefaults {
        let mut cursor = Some(self);
        while let Some(core) = cursor {
            if let Some(options) = core.own_options() {
                return options;
            }
            cursor = core.parent.as_deref();
        }
        self.policy.root_options()
    }

    fn default_decision(&self, action: Action, path: &str) -> Result<bool> {
        let options = self.nearest_options();
        let fallback = options
            .for_direction(self.direction)
            .and_then(|table| table.get(action))
            .unwrap_or(false);
        if options.learn != Some(true) {
            return Ok(fallback);
        }
        if options.interactive == Some(true) {
            let question = format!(
                "Allow {} {action} action on path {path}?",
                self.direction.to_string().to_lowercase()
            );
            return self.policy.prompt(&question, fallback);
        }
        Ok(true)
    }

    fn invalidate(&self) {
        if self.location.scope == Scope::Scratch {
            return;
        }
        if self.nearest_options().learn == Some(false) {
            return;
        }
        self.policy.invalidate();
    }

    /// Fill the derived-policy slot at `location.<step>` if empty and return
    /// the location of its data.
    fn derive(
        &self,
        location: &Location,
        step: Step,
        direction: Direction,
        default: impl FnOnce() -> PolicyRef,
    ) -> Location {
        let resolved = self.policy.with_node(location, |node| {
            let slot = node.policy_slot(&step)?;
            let created = slot.is_none();
            let target = Target::of(slot.get_or_insert_with(default));
            Some((target, created))
        });
        match resolved.flatten() {
            Some((target, created)) => {
                if created {
                    self.invalidate();
                }
                match target {
                    Target::Named(id) => self.policy.ensure_document(&id, direction),
                    Target::Inline => location.child(step),
                }
            }
            None => self.policy.scratch_document(direction),
        }
    }
}

/// Policy for one entity (object or function) crossing in one direction.
#[derive(Clone)]
pub struct EntityPolicy(Rc<EntityNode>);

struct EntityNode {
    core: Rc<EntityCore>,
    properties: RefCell<HashMap<String, PropertyPolicy>>,
    call: OnceCell<CallPolicy>,
    construct: OnceCell<CallPolicy>,
}

impl fmt::Debug for EntityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityPolicy")
            .field("direction", &self.0.core.direction)
            .field("path", &self.0.core.path)
            .field("location", &self.0.core.location.to_string())
            .finish_non_exhaustive()
    }
}

impl EntityPolicy {
    fn from_core(core: EntityCore) -> Self {
        Self(Rc::new(EntityNode {
            core: Rc::new(core),
            properties: RefCell::new(HashMap::new()),
            call: OnceCell::new(),
            construct: OnceCell::new(),
        }))
    }

    pub(crate) fn root(policy: &Policy, direction: Direction, path: &str, location: Location) -> Self {
        Self::from_core(EntityCore {
            policy: policy.clone(),
            direction,
            path: path.to_owned(),
            parent: None,
            location,
            accessor: None,
        })
    }

    fn child(parent: &Rc<EntityCore>, direction: Direction, path: &str, location: Location) -> Self {
        Self::from_core(EntityCore {
            policy: parent.policy.clone(),
            direction,
            path: path.to_owned(),
            parent: Some(Rc::clone(parent)),
            location,
            accessor: None,
        })
    }

    /// Role of this node.
    pub fn direction(&self) -> Direction {
        self.0.core.direction
    }

    /// Object-graph path this node governs.
    pub fn path(&self) -> &str {
        &self.0.core.path
    }

    /// Policy engine this node belongs to.
    pub fn policy(&self) -> &Policy {
        &self.0.core.policy
    }

    /// Membrane override configured on this entity.
    pub fn override_(&self) -> Option<Override> {
        let core = &self.0.core;
        if core.accessor.is_some() {
            return None;
        }
        core.policy
            .with_node(&core.location, |node| match node {
                Node::Entity(e) => e.override_,
                _ => None,
            })
            .flatten()
    }

    /// Schedule persistence of the owning document (unless learning is off).
    pub fn invalidate(&self) {
        self.0.core.invalidate();
    }

    /// Policy for property `key`, created on first access.
    pub fn property(&self, key: &PropertyKey) -> PropertyPolicy {
        let name = key.to_string();
        if let Some(existing) = self.0.properties.borrow().get(&name) {
            return existing.clone();
        }
        let core = &self.0.core;
        let created = core
            .policy
            .with_node(&core.location, |node| match node {
                Node::Entity(e) if !e.properties.contains_key(&name) => {
                    e.properties.insert(name.clone(), PropertyPolicyData::default());
                    true
                }
                _ => false,
            })
            .unwrap_or(false);
        if created {
            core.invalidate();
        }
        let property = PropertyPolicy(Rc::new(PropertyNode {
            core: Rc::new(PropertyCore {
                owner: Rc::clone(core),
                path: format!("{}/{name}", core.path),
                location: core.location.child(Step::Property(name.clone())),
            }),
            read_policy: OnceCell::new(),
            write_policy: OnceCell::new(),
            mirror: OnceCell::new(),
            define: OnceCell::new(),
        }));
        self.0
            .properties
            .borrow_mut()
            .insert(name, property.clone());
        property
    }

    /// Call policy (functions).
    pub fn call(&self) -> CallPolicy {
        self.0
            .call
            .get_or_init(|| CallPolicy::new(&self.0.core, CallKind::Call))
            .clone()
    }

    /// Construct policy (functions).
    pub fn construct(&self) -> CallPolicy {
        self.0
            .construct
            .get_or_init(|| CallPolicy::new(&self.0.core, CallKind::Construct))
            .clone()
    }
}

// ---------------------------------------------------------------------------
// PropertyPolicy
// ---------------------------------------------------------------------------

struct PropertyCore {
    owner: Rc<EntityCore>,
    path: String,
    location: Location,
}

impl PropertyCore {
    fn decision(&self, action: Action) -> Result<bool> {
        let policy = &self.owner.policy;
        let read_slot = |p: &mut PropertyPolicyData| match action {
            Action::Write => p.write,
            _ => p.read,
        };
        let stored = policy
            .with_node(&self.location, |node| match node {
                Node::Property(p) => read_slot(p),
                _ => None,
            })
            .flatten();
        let allowed = match stored {
            Some(allowed) => allowed,
            None => {
                let decided = self.owner.default_decision(action, &self.path)?;
                // A prompt may have re-entered and decided first; keep that.
                let frozen = policy
                    .with_node(&self.location, |node| match node {
                        Node::Property(p) => Some(match action {
                            Action::Write => *p.write.get_or_insert(decided),
                            _ => *p.read.get_or_insert(decided),
                        }),
                        _ => None,
                    })
                    .flatten()
                    .unwrap_or(decided);
                self.owner.invalidate();
                frozen
            }
        };
        if !allowed {
            policy.report_violation(&format!(
                "{} {action} action on path {} denied.",
                self.owner.direction, self.path
            ))?;
        }
        Ok(allowed)
    }

    fn derived(&self, step: Step) -> EntityPolicy {
        let direction = match step {
            Step::WritePolicy => self.owner.direction.opposite(),
            _ => self.owner.direction,
        };
        let id = self.path.clone();
        let location = self
            .owner
            .derive(&self.location, step, direction, move || PolicyRef::Named(id));
        EntityPolicy::child(&self.owner, direction, &self.path, location)
    }
}

/// Which side an accessor pair is being transformed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorMode {
    /// Mirroring the original's accessors onto a stand-in
    Mirror,
    /// Defining accessors through a stand-in onto the original
    Define,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessorRole {
    MirrorGet,
    MirrorSet,
    DefineGet,
    DefineSet,
}

struct AccessorSource {
    property: Rc<PropertyCore>,
    role: AccessorRole,
}

/// Policies for the getter and setter of one property.
#[derive(Debug, Clone)]
pub struct AccessorPolicy {
    /// Policy for the getter function
    pub get: EntityPolicy,
    /// Policy for the setter function
    pub set: EntityPolicy,
}

/// Policy for one property of an entity.
#[derive(Clone)]
pub struct PropertyPolicy(Rc<PropertyNode>);

struct PropertyNode {
    core: Rc<PropertyCore>,
    read_policy: OnceCell<EntityPolicy>,
    write_policy: OnceCell<EntityPolicy>,
    mirror: OnceCell<AccessorPolicy>,
    define: OnceCell<AccessorPolicy>,
}

impl fmt::Debug for PropertyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyPolicy")
            .field("path", &self.0.core.path)
            .finish_non_exhaustive()
    }
}

impl PropertyPolicy {
    /// Path of this property (`<owner>/<key>`).
    pub fn path(&self) -> &str {
        &self.0.core.path
    }

    /// Whether the property may be read (mirrored). Resolved once, then
    /// frozen; every denial is reported.
    pub fn read(&self) -> Result<bool> {
        self.0.core.decision(Action::Read)
    }

    /// Whether the property may be written, defined or deleted.
    pub fn write(&self) -> Result<bool> {
        self.0.core.decision(Action::Write)
    }

    /// Policy for values read through this property (same role).
    pub fn read_policy(&self) -> EntityPolicy {
        self.0
            .read_policy
            .get_or_init(|| self.0.core.derived(Step::ReadPolicy))
            .clone()
    }

    /// Policy for values written through this property (opposite role).
    pub fn write_policy(&self) -> EntityPolicy {
        self.0
            .write_policy
            .get_or_init(|| self.0.core.derived(Step::WritePolicy))
            .clone()
    }

    /// Synthesized policies for a getter/setter pair.
    pub fn accessor_policy(&self, mode: AccessorMode) -> AccessorPolicy {
        let cell = match mode {
            AccessorMode::Mirror => &self.0.mirror,
            AccessorMode::Define => &self.0.define,
        };
        cell.get_or_init(|| {
            let (get, set) = match mode {
                AccessorMode::Mirror => (AccessorRole::MirrorGet, AccessorRole::MirrorSet),
                AccessorMode::Define => (AccessorRole::DefineGet, AccessorRole::DefineSet),
            };
            AccessorPolicy {
                get: self.accessor_entity(get, mode, "get"),
                set: self.accessor_entity(set, mode, "set"),
            }
        })
        .clone()
    }

    fn accessor_entity(&self, role: AccessorRole, mode: AccessorMode, suffix: &str) -> EntityPolicy {
        let property = &self.0.core;
        let owner = &property.owner;
        let direction = match mode {
            AccessorMode::Mirror => owner.direction,
            AccessorMode::Define => owner.direction.opposite(),
        };
        EntityPolicy::from_core(EntityCore {
            policy: owner.policy.clone(),
            direction,
            path: format!("{}.{suffix}", property.path),
            parent: Some(Rc::clone(owner)),
            location: owner.policy.scratch_document(direction),
            accessor: Some(AccessorSource {
                property: Rc::clone(property),
                role,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// CallPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Call,
    Construct,
}

/// Policy for calling or constructing a function.
#[derive(Clone)]
pub struct CallPolicy(Rc<CallNode>);

struct CallNode {
    owner: Rc<EntityCore>,
    kind: CallKind,
    location: Location,
}

impl fmt::Debug for CallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPolicy")
            .field("kind", &self.0.kind)
            .field("path", &self.0.owner.path)
            .finish_non_exhaustive()
    }
}

/// Where a learned argument policy lives.
enum ArgumentTarget {
    Entity(Target),
    Rule(usize, Target),
}

impl CallPolicy {
    fn new(owner: &Rc<EntityCore>, kind: CallKind) -> Self {
        let step = match kind {
            CallKind::Call => Step::Call,
            CallKind::Construct => Step::Construct,
        };
        Self(Rc::new(CallNode {
            owner: Rc::clone(owner),
            kind,
            location: owner.location.child(step),
        }))
    }

    fn action(&self) -> Action {
        match self.0.kind {
            CallKind::Call => Action::Call,
            CallKind::Construct => Action::Construct,
        }
    }

    /// Path of the governed function.
    pub fn path(&self) -> &str {
        &self.0.owner.path
    }

    /// Evaluate the allow decision once for this invocation. Guards bind
    /// `(this, ...args)` for calls and `(...args)` for construction.
    pub fn allow(&self, this: &Value, args: &[Value]) -> Result<bool> {
        let owner = &self.0.owner;
        if let Some(source) = &owner.accessor {
            // Accessor invocations are governed by the property decision,
            // which reports its own denials.
            return match source.role {
                AccessorRole::MirrorGet | AccessorRole::DefineSet => {
                    source.property.decision(Action::Read)
                }
                AccessorRole::MirrorSet | AccessorRole::DefineGet => {
                    source.property.decision(Action::Write)
                }
            };
        }

        let policy = &owner.policy;
        let action = self.action();
        let stored = policy
            .with_node(&self.0.location, |node| match node {
                Node::Call(c) => c.allow.clone(),
                _ => None,
            })
            .flatten();
        let allow = match stored {
            Some(allow) => allow,
            None => {
                let decided = Allow::Flag(owner.default_decision(action, &owner.path)?);
                let frozen = policy
                    .with_node(&self.0.location, |node| match node {
                        Node::Call(c) => Some(c.allow.get_or_insert(decided.clone()).clone()),
                        _ => None,
                    })
                    .flatten()
                    .unwrap_or(decided);
                owner.invalidate();
                frozen
            }
        };

        let allowed = match allow {
            Allow::Flag(allowed) => allowed,
            Allow::Guard(source) => {
                let guard = policy.guard(&source)?;
                let bindings: Vec<Value> = match self.0.kind {
                    CallKind::Call => iter::once(this.clone()).chain(args.iter().cloned()).collect(),
                    CallKind::Construct => args.to_vec(),
                };
                guard.evaluate(&bindings, policy.parameters())?
            }
        };
        if !allowed {
            policy.report_violation(&format!(
                "{} {action} action on path {} denied.",
                owner.direction, owner.path
            ))?;
        }
        Ok(allowed)
    }

    /// Policy for `this` (and `new.target`), opposite role.
    pub fn this_arg(&self) -> EntityPolicy {
        let owner = &self.0.owner;
        let direction = owner.direction.opposite();
        let location = owner.derive(&self.0.location, Step::ThisArg, direction, PolicyRef::empty);
        EntityPolicy::child(owner, direction, &owner.path, location)
    }

    /// Policy for the returned value, same role.
    pub fn result(&self) -> EntityPolicy {
        let owner = &self.0.owner;
        if let Some(source) = &owner.accessor {
            match source.role {
                AccessorRole::MirrorGet => {
                    return PropertyCore::derived(&source.property, Step::ReadPolicy);
                }
                AccessorRole::DefineGet => {
                    return PropertyCore::derived(&source.property, Step::WritePolicy);
                }
                AccessorRole::MirrorSet | AccessorRole::DefineSet => {}
            }
        }
        let direction = owner.direction;
        let location = owner.derive(&self.0.location, Step::Result, direction, PolicyRef::empty);
        EntityPolicy::child(owner, direction, &owner.path, location)
    }

    /// Policy for argument `index`, opposite role. A rule list selects the
    /// first rule matching `args`; if none matches, a catch-all rule is
    /// learned and appended.
    pub fn argument(&self, index: usize, args: &[Value]) -> EntityPolicy {
        let owner = &self.0.owner;
        if index == 0
            && let Some(source) = &owner.accessor
        {
            match source.role {
                AccessorRole::MirrorSet => {
                    return PropertyCore::derived(&source.property, Step::WritePolicy);
                }
                AccessorRole::DefineSet => {
                    return PropertyCore::derived(&source.property, Step::ReadPolicy);
                }
                AccessorRole::MirrorGet | AccessorRole::DefineGet => {}
            }
        }

        let direction = owner.direction.opposite();
        let path = format!("{}[{index}]", owner.path);
        let resolved = owner.policy.with_node(&self.0.location, |node| {
            let Node::Call(call) = node else {
                return None;
            };
            if call.arguments.len() <= index {
                call.arguments.resize(index + 1, None);
            }
            let slot = &mut call.arguments[index];
            Some(match slot {
                None => {
                    *slot = Some(ArgumentPolicy::Entity(PolicyRef::empty()));
                    (ArgumentTarget::Entity(Target::Inline), true)
                }
                Some(ArgumentPolicy::Entity(policy)) => {
                    (ArgumentTarget::Entity(Target::of(policy)), false)
                }
                Some(ArgumentPolicy::Rules(rules)) => match rules.iter().position(|r| r.matches(args)) {
                    Some(j) => (ArgumentTarget::Rule(j, Target::of(&rules[j].policy)), false),
                    None => {
                        rules.push(ConditionalRule::catch_all());
                        (ArgumentTarget::Rule(rules.len() - 1, Target::Inline), true)
                    }
                },
            })
        });

        let location = match resolved.flatten() {
            Some((target, created)) => {
                if created {
                    owner.invalidate();
                }
                match target {
                    ArgumentTarget::Entity(Target::Named(id)) | ArgumentTarget::Rule(_, Target::Named(id)) => {
                        owner.policy.ensure_document(&id, direction)
                    }
                    ArgumentTarget::Entity(Target::Inline) => self.0.location.child(Step::Argument(index)),
                    ArgumentTarget::Rule(j, Target::Inline) => {
                        self.0.location.child(Step::Rule(index, j))
                    }
                }
            }
            None => owner.policy.scratch_document(direction),
        };
        EntityPolicy::child(owner, direction, &path, location)
    }
}
