//! Policy engine: path-addressed, lazily learned access decisions.
//!
//! A [`Policy`] owns one [`PolicyStore`] for the lifetime of a sandbox and
//! hands out [`EntityPolicy`] handles rooted at named documents. Decisions
//! that are not configured are derived from the nearest defaults, frozen
//! into the forest, and (while learning) scheduled for write-back.
//!
//! ## Example
//!
//! ```rust,ignore
//! use airlock::{Policy, StoreConfig};
//!
//! let policy = Policy::open(&StoreConfig::new("./policies"))?;
//! let fs = policy.require("fs").expect("unknown module refused");
//! if fs.property(&"readFileSync".into()).read()? {
//!     // expose it
//! }
//! policy.flush()?;
//! ```

mod data;
mod guard;
mod tree;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use data::{
    Action, ActionDefaults, Allow, ArgumentPolicy, CallPolicyData, ConditionalRule, Direction,
    EntityPolicyData, ErrorMode, Expected, Override, PolicyData, PolicyDefaults, PolicyRef,
    PropertyPolicyData,
};
pub use guard::Guard;
pub use tree::{AccessorMode, AccessorPolicy, CallPolicy, EntityPolicy, PropertyPolicy};

use tree::Location;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::PolicyStore;

static NEXT_SCRATCH_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Named string values available to guards through `param("id")`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyParameters(BTreeMap<String, String>);

impl PolicyParameters {
    /// Wrap an existing map.
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }

    /// Define or replace a parameter.
    pub fn insert(&mut self, id: impl Into<String>, value: impl Into<String>) {
        self.0.insert(id.into(), value.into());
    }

    /// Value of parameter `id`.
    pub fn get(&self, id: &str) -> Result<&str> {
        self.0
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingParameter(id.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Prompting
// ---------------------------------------------------------------------------

/// Source of answers for interactive learning.
pub trait Prompter {
    /// Ask a yes/no `question`; an empty answer means `default`.
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;
}

/// Asks on stderr and reads answers from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let stdin = io::stdin();
        let mut stderr = io::stderr();
        loop {
            write!(stderr, "{question} {hint} ")?;
            stderr.flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Ok(default);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Handle to one policy forest and its reporting state. Cheap to clone.
#[derive(Clone)]
pub struct Policy(Rc<PolicyInner>);

struct PolicyInner {
    store: PolicyStore,
    parameters: PolicyParameters,
    guards: RefCell<HashMap<String, Rc<Guard>>>,
    prompter: Box<dyn Prompter>,
    violations: Cell<u64>,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("store", &self.0.store)
            .field("parameters", &self.0.parameters)
            .field("violations", &self.0.violations.get())
            .finish_non_exhaustive()
    }
}

impl Policy {
    /// Open the forest described by `config`, prompting on stdin when
    /// interactive learning is enabled.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store = PolicyStore::open(config)?;
        Ok(Self::with_options(
            store,
            PolicyParameters::new(config.parameters.clone()),
            Box::new(StdinPrompter),
        ))
    }

    /// Policy over `store` with no parameters.
    pub fn new(store: PolicyStore) -> Self {
        Self::with_options(store, PolicyParameters::default(), Box::new(StdinPrompter))
    }

    /// Fully specified constructor.
    pub fn with_options(
        store: PolicyStore,
        parameters: PolicyParameters,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        Self(Rc::new(PolicyInner {
            store,
            parameters,
            guards: RefCell::new(HashMap::new()),
            prompter,
            violations: Cell::new(0),
        }))
    }

    /// Backing store.
    pub fn store(&self) -> &PolicyStore {
        &self.0.store
    }

    /// Guard parameters.
    pub fn parameters(&self) -> &PolicyParameters {
        &self.0.parameters
    }

    /// Current violation reporting mode.
    pub fn error_mode(&self) -> ErrorMode {
        self.store().with_forest(|f| f.root.onerror)
    }

    /// Number of denials reported so far.
    pub fn violations(&self) -> u64 {
        self.0.violations.get()
    }

    /// Quiescence delay of the write-back.
    pub fn write_delay(&self) -> Duration {
        self.store().write_delay()
    }

    /// Schedule a write-back of the whole forest.
    pub fn invalidate(&self) {
        self.store().invalidate();
    }

    /// Write the whole forest now.
    pub fn flush(&self) -> Result<()> {
        Ok(self.store().flush()?)
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Contextify policy for the host global object.
    pub fn global(&self) -> EntityPolicy {
        let id = self.store().with_forest(|f| f.root.global.clone());
        let location = self.ensure_document(&id, Direction::Contextify);
        EntityPolicy::root(self, Direction::Contextify, "global", location)
    }

    /// Contextify policy for module `id`. `None` means the module is refused:
    /// learning is off and no document exists for it.
    pub fn require(&self, id: &str) -> Option<EntityPolicy> {
        let (known, learning) = self.store().with_forest(|f| {
            (f.documents.contains_key(id), f.root.options.learn == Some(true))
        });
        if !known && !learning {
            tracing::debug!(module = id, "module refused by policy");
            return None;
        }
        let location = self.ensure_document(id, Direction::Contextify);
        Some(EntityPolicy::root(self, Direction::Contextify, id, location))
    }

    /// Root policy for host values entering the guest at `path`.
    pub fn contextify_entity_policy(&self, path: &str) -> EntityPolicy {
        self.entity_policy(Direction::Contextify, path)
    }

    /// Root policy for guest values entering the host at `path`.
    pub fn decontextify_entity_policy(&self, path: &str) -> EntityPolicy {
        self.entity_policy(Direction::Decontextify, path)
    }

    /// Root policy for `direction` at `path`.
    pub fn entity_policy(&self, direction: Direction, path: &str) -> EntityPolicy {
        let location = self.ensure_document(path, direction);
        EntityPolicy::root(self, direction, path, location)
    }

    /// Report a denied action according to the violation mode.
    pub fn report_violation(&self, message: &str) -> Result<()> {
        self.0.violations.set(self.0.violations.get() + 1);
        match self.error_mode() {
            ErrorMode::Silent => Ok(()),
            ErrorMode::Warn => {
                tracing::warn!("{message}");
                Ok(())
            }
            ErrorMode::Throw => Err(Error::Violation(message.to_owned())),
        }
    }

    /// Compile every guard in the forest. Returns how many were checked.
    pub fn check_guards(&self) -> Result<usize> {
        let sources = self.store().with_forest(|f| {
            let mut sources = Vec::new();
            for document in f.documents.values() {
                collect_guards(document, &mut sources);
            }
            sources
        });
        for source in &sources {
            self.guard(source)?;
        }
        Ok(sources.len())
    }

    // -----------------------------------------------------------------------
    // Crate internals
    // -----------------------------------------------------------------------

    pub(crate) fn root_options(&self) -> PolicyDefaults {
        self.store().with_forest(|f| f.root.options.clone())
    }

    pub(crate) fn prompt(&self, question: &str, default: bool) -> Result<bool> {
        self.0.prompter.confirm(question, default)
    }

    /// Compiled guard for `source`, compiled at most once.
    pub(crate) fn guard(&self, source: &str) -> Result<Rc<Guard>> {
        if let Some(guard) = self.0.guards.borrow().get(source) {
            return Ok(Rc::clone(guard));
        }
        let guard = Rc::new(Guard::compile(source)?);
        self.0
            .guards
            .borrow_mut()
            .insert(source.to_owned(), Rc::clone(&guard));
        Ok(guard)
    }

    /// Location of document `id`, creating it (and registering it in the
    /// manifest while learning) if absent.
    pub(crate) fn ensure_document(&self, id: &str, direction: Direction) -> Location {
        let registered = self.store().with_forest(|f| {
            if f.documents.contains_key(id) {
                return false;
            }
            f.documents
                .insert(id.to_owned(), EntityPolicyData::typed(direction));
            f.root.options.learn == Some(true) && f.register(id)
        });
        if registered {
            tracing::debug!(id, %direction, "created policy document");
            self.invalidate();
        }
        Location::document(id)
    }

    /// Fresh transient document that is never persisted.
    pub(crate) fn scratch_document(&self, direction: Direction) -> Location {
        let id = format!("scratch-{}", NEXT_SCRATCH_ID.fetch_add(1, Ordering::Relaxed));
        self.store().with_forest(|f| {
            f.scratch
                .insert(id.clone(), EntityPolicyData::typed(direction));
        });
        Location::scratch(id)
    }
}

fn collect_guards(data: &EntityPolicyData, out: &mut Vec<String>) {
    for property in data.properties.values() {
        collect_inline(property.read_policy.as_ref(), out);
        collect_inline(property.write_policy.as_ref(), out);
    }
    for call in [&data.call, &data.construct].into_iter().flatten() {
        if let Some(Allow::Guard(source)) = &call.allow {
            out.push(source.clone());
        }
        collect_inline(call.this_arg.as_ref(), out);
        collect_inline(call.result.as_ref(), out);
        for argument in call.arguments.iter().flatten() {
            match argument {
                ArgumentPolicy::Entity(policy) => collect_inline(Some(policy), out),
                ArgumentPolicy::Rules(rules) => {
                    for rule in rules {
                        collect_inline(Some(&rule.policy), out);
                    }
                }
            }
        }
    }
}

fn collect_inline(policy: Option<&PolicyRef>, out: &mut Vec<String>) {
    if let Some(PolicyRef::Inline(inner)) = policy {
        collect_guards(inner, out);
    }
}
