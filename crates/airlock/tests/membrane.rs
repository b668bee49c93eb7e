//! Integration tests for crossings between a host and a guest realm.
//!
//! Each test builds a fresh policy root in a temporary directory, optionally
//! seeded with policy documents, and drives the membrane the way a module
//! loader or orchestrator would.

#![allow(clippy::unwrap_used, clippy::expect_used)] // acceptable in tests

use std::cell::Cell;
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use airlock::{
    ArgumentPolicy, Direction, Error, Membrane, ObjectRef, Policy, PolicyParameters, PolicyStore,
    PropertyDescriptor, PropertyKey, Prompter, Realm, Result, StoreConfig, Value,
};

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("airlock=debug")
            .with_test_writer()
            .init();
    });
}

fn config(dir: &Path) -> StoreConfig {
    // Long enough that the background write never races a test's own flush.
    let mut config = StoreConfig::new(dir);
    config.write_delay = Duration::from_secs(60);
    config
}

/// Write `policy.json` plus one file per `(id, document)` and list them in
/// the manifest.
fn seed(dir: &Path, mut root: serde_json::Value, documents: &[(&str, serde_json::Value)]) {
    let manifest: serde_json::Map<String, serde_json::Value> = documents
        .iter()
        .map(|(id, _)| ((*id).to_owned(), json!(format!("{id}.json"))))
        .collect();
    root["manifest"] = serde_json::Value::Object(manifest);
    fs::write(dir.join("policy.json"), root.to_string()).unwrap();
    for (id, document) in documents {
        fs::write(dir.join(format!("{id}.json")), document.to_string()).unwrap();
    }
}

fn sandbox(dir: &Path) -> Membrane {
    init_tracing();
    let policy = Policy::open(&config(dir)).unwrap();
    Membrane::new(Realm::new("host"), Realm::new("guest"), policy)
}

fn object(value: Value) -> ObjectRef {
    match value {
        Value::Object(obj) => obj,
        other => panic!("expected an object, got {other}"),
    }
}

fn strict() -> serde_json::Value {
    json!({
        "options": { "learn": false, "contextify": {}, "decontextify": {} },
        "onerror": "warn"
    })
}

/// Log sink shared between a scoped subscriber and the test body.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).lines().map(str::to_owned).collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn manifest_ids(m: &Membrane) -> Vec<String> {
    m.policy().store().root().manifest.keys().cloned().collect()
}

// ==================== Identity Tests ====================

#[test]
fn test_repeated_crossings_share_a_stand_in() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let host: Value = m.host().object_with([("a", 1)]).into();

    let first = m.contextify(&host, "demo", None).unwrap();
    let second = m.contextify(&host, "demo", None).unwrap();
    assert_eq!(first, second);

    let guest: Value = m.guest().object().into();
    let out = m.decontextify(&guest, "result", None).unwrap();
    assert_eq!(out, m.decontextify(&guest, "result", None).unwrap());
}

#[test]
fn test_round_trip_returns_the_original() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let host: Value = m.host().object_with([("a", 1)]).into();
    let standin = m.contextify(&host, "demo", None).unwrap();
    assert_eq!(m.decontextify(&standin, "back", None).unwrap(), host);

    let guest: Value = m.guest().array(vec![Value::from(1)]).into();
    let standin = m.decontextify(&guest, "list", None).unwrap();
    assert_eq!(m.contextify(&standin, "list", None).unwrap(), guest);
}

#[test]
fn test_round_trip_leaves_the_manifest_alone() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let host: Value = m.host().object_with([("a", 1)]).into();
    let standin = m.contextify(&host, "demo", None).unwrap();
    let before = manifest_ids(&m);
    assert_eq!(before, vec!["demo".to_owned()]);

    assert_eq!(m.decontextify(&standin, "back", None).unwrap(), host);
    assert_eq!(m.contextify(&host, "elsewhere", None).unwrap(), standin);
    assert_eq!(manifest_ids(&m), before);
    assert!(m.policy().store().document("back").is_none());
    assert!(m.policy().store().document("elsewhere").is_none());
}

#[test]
fn test_protected_entity_gets_a_fresh_stand_in_per_crossing() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        json!({}),
        &[(
            "secret",
            json!({ "type": "contextify", "override": "protect", "properties": { "a": { "read": true } } }),
        )],
    );
    let m = sandbox(dir.path());
    let host: Value = m.host().object_with([("a", 1)]).into();

    let first = m.contextify(&host, "secret", None).unwrap();
    let second = m.contextify(&host, "secret", None).unwrap();
    assert_ne!(first, second);
    assert_eq!(object(first.clone()).get_value("a").unwrap(), Value::from(1));
    assert_eq!(object(second.clone()).get_value("a").unwrap(), Value::from(1));

    assert_eq!(m.decontextify(&first, "back", None).unwrap(), host);
    assert_eq!(m.decontextify(&second, "back", None).unwrap(), host);
}

#[test]
fn test_cyclic_graphs_terminate() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let host = m.host().object();
    host.set_value("me", host.clone()).unwrap();
    let standin = object(m.contextify(&host.into(), "cycle", None).unwrap());
    let inner = object(standin.get_value("me").unwrap());
    assert_eq!(inner, standin);
}

// ==================== Learning Tests ====================

struct CountingPrompter {
    asked: Rc<Cell<u32>>,
}

impl Prompter for CountingPrompter {
    fn confirm(&self, _question: &str, _default: bool) -> Result<bool> {
        self.asked.set(self.asked.get() + 1);
        Ok(true)
    }
}

#[test]
fn test_learned_decision_is_resolved_once() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        json!({ "options": { "learn": true, "interactive": true } }),
        &[],
    );
    let asked = Rc::new(Cell::new(0));
    let store = PolicyStore::open(&config(dir.path())).unwrap();
    let policy = Policy::with_options(
        store,
        PolicyParameters::default(),
        Box::new(CountingPrompter {
            asked: Rc::clone(&asked),
        }),
    );
    let m = Membrane::new(Realm::new("host"), Realm::new("guest"), policy);
    let host = m.host().object_with([("a", 1)]);
    let standin = object(m.contextify(&host.into(), "demo", None).unwrap());

    assert_eq!(standin.get_value("a").unwrap(), Value::from(1));
    let after_first = asked.get();
    assert!(after_first >= 1);
    for _ in 0..3 {
        assert_eq!(standin.get_value("a").unwrap(), Value::from(1));
    }
    assert_eq!(asked.get(), after_first);
    assert_eq!(
        m.policy().store().document("demo").unwrap().properties["a"].read,
        Some(true)
    );
}

#[test]
fn test_learned_read_is_persisted() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let host = m.host().object_with([("a", 1)]);
    let standin = object(m.contextify(&host.into(), "demo", None).unwrap());
    assert_eq!(standin.get_value("a").unwrap(), Value::from(1));
    m.policy().flush().unwrap();

    let root: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("policy.json")).unwrap()).unwrap();
    let file = root["manifest"]["demo"].as_str().unwrap();
    let demo: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join(file)).unwrap()).unwrap();
    assert_eq!(demo["type"], json!("contextify"));
    assert_eq!(demo["properties"]["a"]["read"], json!(true));
}

// ==================== Read Policy Tests ====================

#[test]
fn test_denied_read_makes_property_absent() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        strict(),
        &[(
            "demo",
            json!({
                "type": "contextify",
                "properties": { "visible": { "read": true }, "hidden": { "read": false } }
            }),
        )],
    );
    let m = sandbox(dir.path());
    let host = m.host().object_with([("visible", 1), ("hidden", 2)]);
    let standin = object(m.contextify(&host.clone().into(), "demo", None).unwrap());

    let hidden = PropertyKey::from("hidden");
    assert!(host.has_property(&hidden).unwrap());
    assert_eq!(standin.get_own_property(&hidden).unwrap(), None);
    assert!(!standin.has_property(&hidden).unwrap());
    assert_eq!(standin.get_value("hidden").unwrap(), Value::Undefined);
    assert_eq!(standin.get_value("visible").unwrap(), Value::from(1));
    assert!(m.policy().violations() >= 1);
}

#[test]
fn test_accessors_are_mirrored_as_stand_ins() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let host = m.host().object();
    let getter = m.host().function("get", |this, _| {
        let Value::Object(this) = this else {
            return Ok(Value::Undefined);
        };
        this.get_value("_hidden")
    });
    host.define_value("_hidden", 42).unwrap();
    host.define_own_property(
        &"value".into(),
        PropertyDescriptor::accessor(Some(getter.clone()), None),
    )
    .unwrap();

    let standin = object(m.contextify(&host.into(), "acc", None).unwrap());
    let Some(PropertyDescriptor::Accessor { get: Some(mirrored), .. }) =
        standin.get_own_property(&"value".into()).unwrap()
    else {
        panic!("expected a mirrored accessor");
    };
    assert_ne!(mirrored, getter);
    assert_eq!(mirrored.realm(), m.guest().id());
    assert_eq!(standin.get_value("value").unwrap(), Value::from(42));
}

// ==================== Call Policy Tests ====================

#[test]
fn test_denied_call_is_silent_under_warn() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        strict(),
        &[(
            "f",
            json!({ "type": "contextify", "call": { "allow": "() => false" } }),
        )],
    );
    let m = sandbox(dir.path());
    let invoked = Rc::new(Cell::new(false));
    let flag = Rc::clone(&invoked);
    let host_fn = m.host().function("f", move |_, _| {
        flag.set(true);
        Ok(Value::from("secret"))
    });
    let standin = object(m.contextify(&host_fn.into(), "f", None).unwrap());

    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, || {
        standin.call(&Value::Undefined, &[Value::from(1)]).unwrap()
    });
    assert_eq!(result, Value::Undefined);
    assert!(!invoked.get());
    assert_eq!(m.policy().violations(), 1);

    let warnings: Vec<String> = logs
        .lines()
        .into_iter()
        .filter(|line| line.contains("WARN"))
        .collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("Contextify call action on path f denied."));
}

#[test]
fn test_denied_call_throws_under_throw_mode() {
    let dir = TempDir::new().unwrap();
    let mut root = strict();
    root["onerror"] = json!("throw");
    seed(
        dir.path(),
        root,
        &[("f", json!({ "type": "contextify", "call": { "allow": false } }))],
    );
    let m = sandbox(dir.path());
    let host_fn = m.host().function("f", |_, _| Ok(Value::Undefined));
    let standin = object(m.contextify(&host_fn.into(), "f", None).unwrap());
    let err = standin.call(&Value::Undefined, &[]).unwrap_err();
    assert!(matches!(
        err,
        Error::Violation(ref msg) if msg == "Contextify call action on path f denied."
    ));
}

#[test]
fn test_allow_is_evaluated_once_per_call() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        strict(),
        &[(
            "f",
            json!({
                "type": "contextify",
                "call": { "allow": "(self, a, b, c) => a.probe === true" }
            }),
        )],
    );
    let m = sandbox(dir.path());
    let probes = Rc::new(Cell::new(0));
    let counter = Rc::clone(&probes);
    let getter = m.guest().function("probe", move |_, _| {
        counter.set(counter.get() + 1);
        Ok(Value::from(true))
    });
    let arg = m.guest().object();
    arg.define_own_property(&"probe".into(), PropertyDescriptor::accessor(Some(getter), None))
        .unwrap();

    let host_fn = m.host().function("f", |_, args| Ok(Value::from(args.len() as f64)));
    let standin = object(m.contextify(&host_fn.into(), "f", None).unwrap());
    let args = [Value::Object(arg.clone()), Value::Object(arg.clone()), Value::Object(arg)];
    let result = standin.call(&Value::Undefined, &args).unwrap();
    assert_eq!(result, Value::from(3));
    assert_eq!(probes.get(), 1);
}

#[test]
fn test_argument_rules_select_by_sibling_value() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        json!({ "options": { "learn": true } }),
        &[(
            "open",
            json!({
                "type": "contextify",
                "call": {
                    "allow": true,
                    "arguments": [
                        null,
                        [ { "dependency": 0, "expected": "x", "policy": { "override": "expose" } } ]
                    ]
                }
            }),
        )],
    );
    let m = sandbox(dir.path());
    let host_fn = m.host().function("open", |_, args| {
        let raw = args.get(1).and_then(Value::as_object).is_some_and(|o| !o.is_proxy());
        Ok(Value::from(raw))
    });
    let standin = object(m.contextify(&host_fn.into(), "open", None).unwrap());
    let options: Value = m.guest().object().into();

    let exposed = standin
        .call(&Value::Undefined, &[Value::from("x"), options.clone()])
        .unwrap();
    assert_eq!(exposed, Value::from(true));

    let wrapped = standin
        .call(&Value::Undefined, &[Value::from("y"), options])
        .unwrap();
    assert_eq!(wrapped, Value::from(false));

    let doc = m.policy().store().document("open").unwrap();
    let call = doc.call.unwrap();
    let Some(ArgumentPolicy::Rules(rules)) = &call.arguments[1] else {
        panic!("expected argument rules");
    };
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1].dependency, None);
}

#[test]
fn test_guest_exceptions_reach_host_translated() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let guest_error = m.guest().error("guest failure");
    let thrown = guest_error.clone();
    let guest_fn = m
        .guest()
        .function("boom", move |_, _| Err(Error::Thrown(Value::Object(thrown.clone()))));
    let host_view = object(m.decontextify(&guest_fn.into(), "callback", None).unwrap());

    let Err(Error::Thrown(exception)) = host_view.call(&Value::Undefined, &[]) else {
        panic!("expected the guest exception");
    };
    let exception = object(exception);
    assert_eq!(exception.realm(), m.host().id());
    let after_first = manifest_ids(&m);

    // The same exception crosses again through the cache.
    let Err(Error::Thrown(again)) = host_view.call(&Value::Undefined, &[]) else {
        panic!("expected the guest exception");
    };
    assert_eq!(again, Value::Object(exception.clone()));
    assert_eq!(
        m.contextify(&Value::Object(exception), "again", None).unwrap(),
        Value::Object(guest_error)
    );
    assert_eq!(manifest_ids(&m), after_first);
}

// ==================== Exposure Tests ====================

#[test]
fn test_expose_defines_guest_global() {
    let dir = TempDir::new().unwrap();
    let m = sandbox(dir.path());
    let config = m.host().object_with([("debug", false)]);
    assert!(m.expose("config", config.into()).unwrap());

    let exposed = object(m.guest().global().get_value("config").unwrap());
    assert!(exposed.is_proxy());
    assert_eq!(exposed.get_value("debug").unwrap(), Value::from(false));
}

#[test]
fn test_expose_global_property_uses_global_policy() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        strict(),
        &[(
            "global",
            json!({
                "type": "contextify",
                "properties": { "version": { "read": true }, "token": { "read": false } }
            }),
        )],
    );
    let m = sandbox(dir.path());
    let global = m.host().global();
    global.define_value("version", "1.2.3").unwrap();
    global.define_value("token", "hunter2").unwrap();

    assert!(m.expose_global_property("version").unwrap());
    assert!(!m.expose_global_property("token").unwrap());
    assert!(!m.expose_global_property("missing").unwrap());
    assert_eq!(
        m.guest().global().get_value("version").unwrap(),
        Value::from("1.2.3")
    );
    assert_eq!(m.guest().global().get_value("token").unwrap(), Value::Undefined);
}

#[test]
fn test_unknown_module_refused_without_learning() {
    let dir = TempDir::new().unwrap();
    seed(
        dir.path(),
        strict(),
        &[("path", json!({ "type": "contextify" }))],
    );
    let m = sandbox(dir.path());
    assert!(m.policy().require("path").is_some());
    assert!(m.policy().require("child_process").is_none());
    assert_eq!(m.policy().global().direction(), Direction::Contextify);
}
