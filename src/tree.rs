//! The form as a whole.
//!
//! [`FormTree`] owns the raw and resolved schema, the bound value and the root
//! [`FormNode`]. Every mutation ends in [`FormTree::sync`], which repeats sync
//! passes until the value stops changing. Listeners get [`FormEvent`]s through
//! [`FormTree::subscribe`].
use std::collections::HashMap;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::kind;
use crate::node::{nullable, Env, FormNode, Pass, WidgetParams};
use crate::options::{EvalMethod, Options};
use crate::refs::{self, Substitutions};
use crate::schema::{is_const_list, NodeInfo, ROOT_KEY};
use crate::services::Services;
use crate::settle::{AsyncRegistry, Mailbox};

/// Passes after which a sync gives up on reaching a stable value.
pub const MAX_PASSES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum FormEvent {
    /// root value replaced
    Input { value: Option<Value> },
    #[serde(rename_all = "camelCase")]
    InputChild { full_key: String, value: Option<Value>, old_value: Option<Value> },
    /// root value settled after user interaction
    Change { value: Option<Value> },
    #[serde(rename_all = "camelCase")]
    ChangeChild { full_key: String, value: Option<Value> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub passes: usize,
    pub converged: bool,
}

pub struct FormTree {
    raw_schema: Value,
    resolved: Value,
    /// options as given, before message and icon tables are merged in
    user_options: Options,
    options: Options,
    services: Services,
    value: Option<Value>,
    root: FormNode,
    registry: AsyncRegistry,
    mailbox: Mailbox,
    subscribers: Vec<UnboundedSender<FormEvent>>,
    dirty: bool,
}

impl std::fmt::Debug for FormTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormTree")
            .field("value", &self.value)
            .field("options", &self.options)
            .field("root", &self.root)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl FormTree {
    pub fn new(schema: Value, value: Option<Value>, options: Options, services: Services) -> Self {
        let finalized = options.clone().finalize();
        let resolved = resolve(&schema, &finalized);
        let mut tree = Self {
            raw_schema: schema,
            resolved,
            user_options: options,
            options: finalized,
            services,
            value,
            root: FormNode::new(NodeInfo::root()),
            registry: AsyncRegistry::new(),
            mailbox: Mailbox::new(),
            subscribers: Vec::new(),
            dirty: false,
        };
        let report = tree.sync();
        if !report.converged {
            tracing::error!(target: "schemaform::tree", passes = report.passes, "initial sync did not converge");
        }
        // repairs made while initializing are not user changes
        tree.root.clear_changed();
        tree.dirty = false;
        tree
    }

    // ——— ACCESSORS ———

    pub fn value(&self) -> Option<&Value> { self.value.as_ref() }
    pub fn options(&self) -> &Options { &self.options }
    pub fn raw_schema(&self) -> &Value { &self.raw_schema }
    pub fn resolved_schema(&self) -> &Value { &self.resolved }
    pub fn root(&self) -> &FormNode { &self.root }
    pub fn registry(&self) -> &AsyncRegistry { &self.registry }
    /// Handle for queueing inputs from outside the tree; applied on [`FormTree::change`].
    pub fn mailbox(&self) -> Mailbox { self.mailbox.clone() }
    pub fn is_dirty(&self) -> bool { self.dirty }

    pub fn node(&self, full_key: &str) -> Option<&FormNode> { self.root.find(full_key) }

    pub fn subscribe(&mut self) -> UnboundedReceiver<FormEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.push(tx);
        rx
    }

    // ——— MUTATIONS ———

    pub fn set_schema(&mut self, schema: Value) -> SyncReport {
        self.raw_schema = schema;
        self.resolved = resolve(&self.raw_schema, &self.options);
        self.root.reset();
        self.sync()
    }

    pub fn set_options(&mut self, options: Options) -> SyncReport {
        self.options = options.clone().finalize();
        self.user_options = options;
        self.resolved = resolve(&self.raw_schema, &self.options);
        self.root.reset();
        self.sync()
    }

    pub fn set_locale(&mut self, locale: &str) -> SyncReport {
        let options = Options { locale: locale.to_string(), ..self.user_options.clone() };
        self.set_options(options)
    }

    /// Replace the bound value from outside; repairs are emitted as usual.
    pub fn set_value(&mut self, value: Option<Value>) -> SyncReport {
        self.value = value;
        self.root.reset();
        self.sync()
    }

    /// A widget reports a new value for the node at `full_key`.
    ///
    /// Returns `false` when the node does not exist or the value is equal to
    /// the current one.
    pub fn input(&mut self, full_key: &str, value: Option<Value>) -> bool {
        let Some(node) = self.root.find(full_key) else {
            tracing::warn!(target: "schemaform::tree", full_key, "input for unknown node");
            return false;
        };
        let Some(full) = node.full_schema() else { return false };
        let value = nullable(full.nullable, kind::coerce_input(full, value));
        let old = node.value().cloned();
        if value == old { return false; }

        set_path(&mut self.value, full_key, value.clone());
        if let Some(node) = self.root.find_mut(full_key) {
            node.mark_changed();
        }
        self.dirty = true;
        self.broadcast(vec![
            FormEvent::InputChild { full_key: full_key.to_string(), value, old_value: old },
            FormEvent::Input { value: self.value.clone() },
        ]);
        self.sync();
        true
    }

    /// Switch the object at `full_key` to its `index`-th `oneOf`/`anyOf`
    /// alternative by seeding the alternative's `const` values.
    pub fn select_branch(&mut self, full_key: &str, index: usize) -> bool {
        let Some(node) = self.root.find(full_key) else { return false };
        let Some(full) = node.full_schema() else { return false };
        let alt = ["oneOf", "anyOf"]
            .iter()
            .filter(|k| !is_const_list(full.get(k)))
            .find_map(|k| full.get(k).and_then(Value::as_array))
            .and_then(|alts| alts.get(index));
        let Some(alt) = alt else { return false };

        let mut obj = match node.value() {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        };
        obj.extend(kind::branch_consts(alt));
        self.input(full_key, Some(Value::Object(obj)))
    }

    /// Settle pending work and report the change.
    ///
    /// Queued inputs are applied, every registered async operation is awaited
    /// (including ones registered meanwhile), select items are refreshed, then
    /// one `ChangeChild` per edited node and exactly one `Change` are emitted.
    /// Returns `false` and emits nothing when nothing changed.
    pub async fn change(&mut self) -> bool {
        if !self.dirty && !self.root.any_changed() && self.mailbox.is_empty() && self.registry.is_empty() {
            return false;
        }
        tokio::task::yield_now().await;

        for (full_key, value) in self.mailbox.take_inputs() {
            self.input(&full_key, value);
        }
        self.registry.drain().await;
        self.sync();

        let mut changed = Vec::new();
        self.root.take_changed(&mut changed);
        if changed.is_empty() && !self.dirty {
            return false;
        }
        let mut events: Vec<FormEvent> = changed
            .into_iter()
            .map(|(full_key, value)| FormEvent::ChangeChild { full_key, value })
            .collect();
        events.push(FormEvent::Change { value: self.value.clone() });
        self.dirty = false;
        self.broadcast(events);
        true
    }

    /// Run sync passes until the value is stable.
    pub fn sync(&mut self) -> SyncReport {
        let mut events = Vec::new();
        let mut passes = 0;
        let converged = loop {
            if passes == MAX_PASSES {
                tracing::error!(
                    target: "schemaform::tree",
                    passes,
                    value = ?self.value,
                    "value keeps changing between sync passes, giving up",
                );
                break false;
            }
            passes += 1;

            let mut pass = Pass {
                env: Env {
                    services: &self.services,
                    root_value: self.value.clone(),
                    unrestricted: self.options.eval_method == EvalMethod::Unrestricted,
                },
                registry: &self.registry,
                mailbox: &self.mailbox,
                fetched: self.mailbox.take_fetched().into_iter().fold(
                    HashMap::<String, Vec<(String, Value)>>::new(),
                    |mut acc, (full_key, url, body)| {
                        acc.entry(full_key).or_default().push((url, body));
                        acc
                    },
                ),
                events: Vec::new(),
            };
            let out = self.root.sync(&self.resolved, self.value.clone(), &self.options, None, &mut pass);
            events.append(&mut pass.events);

            let stable = out == self.value;
            self.value = out;
            if stable { break true; }
        };
        if !events.is_empty() { self.dirty = true; }
        self.broadcast(events);
        SyncReport { passes, converged }
    }

    /// Widget parameters of every visible node, parents before children.
    pub fn render(&mut self) -> Vec<WidgetParams> {
        let env = Env {
            services: &self.services,
            root_value: self.value.clone(),
            unrestricted: self.options.eval_method == EvalMethod::Unrestricted,
        };
        let mut out = Vec::new();
        self.root.render(None, 0, &env, &mut out);
        out
    }

    fn broadcast(&mut self, events: Vec<FormEvent>) {
        if events.is_empty() { return; }
        self.subscribers
            .retain(|tx| events.iter().all(|e| tx.unbounded_send(e.clone()).is_ok()));
    }
}

fn resolve(schema: &Value, options: &Options) -> Value {
    let fallbacks: Vec<&str> = if options.locale == options.default_locale {
        Vec::new()
    } else {
        vec![options.default_locale.as_str()]
    };
    refs::resolve(schema, &Substitutions::locale(&options.locale, &fallbacks))
}

// ——— VALUE PATHS ———

/// Value at a dotted full key (`root` is the whole value).
pub fn get_path<'a>(value: Option<&'a Value>, full_key: &str) -> Option<&'a Value> {
    if full_key == ROOT_KEY { return value; }
    full_key.split('.').try_fold(value?, |cur, seg| match cur {
        Value::Object(m) => m.get(seg),
        Value::Array(xs) => seg.parse::<usize>().ok().and_then(|i| xs.get(i)),
        _ => None,
    })
}

/// Replace the value at a dotted full key, creating objects on the way.
/// `None` removes object keys and nulls array entries.
pub fn set_path(slot: &mut Option<Value>, full_key: &str, new: Option<Value>) {
    if full_key == ROOT_KEY {
        *slot = new;
        return;
    }
    let segs: Vec<&str> = full_key.split('.').collect();
    let target = slot.get_or_insert_with(|| Value::Object(Map::new()));
    set_in(target, &segs, new);
}

fn set_in(target: &mut Value, segs: &[&str], new: Option<Value>) {
    let Some((head, rest)) = segs.split_first() else { return };
    if rest.is_empty() {
        match target {
            Value::Object(m) => match new {
                Some(v) => { m.insert(head.to_string(), v); }
                None => { m.remove(*head); }
            },
            Value::Array(xs) => {
                let Ok(i) = head.parse::<usize>() else { return };
                if i < xs.len() {
                    xs[i] = new.unwrap_or(Value::Null);
                } else if let Some(v) = new {
                    xs.resize(i, Value::Null);
                    xs.push(v);
                }
            }
            _ => {}
        }
        return;
    }
    let next = match target {
        Value::Object(m) => m.entry(head.to_string()).or_insert_with(|| Value::Object(Map::new())),
        Value::Array(xs) => match head.parse::<usize>().ok().and_then(|i| xs.get_mut(i)) {
            Some(v) => v,
            None => return,
        },
        _ => return,
    };
    if next.is_null() { *next = Value::Object(Map::new()); }
    set_in(next, rest, new);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(schema: Value, value: Value) -> FormTree {
        FormTree::new(schema, Some(value), Options::default(), Services::default())
    }

    #[test]
    fn paths() {
        let mut v = Some(json!({ "a": { "list": [1, 2] } }));
        assert_eq!(get_path(v.as_ref(), "a.list.1"), Some(&json!(2)));
        assert_eq!(get_path(v.as_ref(), "root"), v.as_ref());
        set_path(&mut v, "a.list.0", Some(json!(9)));
        set_path(&mut v, "b.c", Some(json!(true)));
        set_path(&mut v, "a.list", None);
        assert_eq!(v, Some(json!({ "a": {}, "b": { "c": true } })));
    }

    #[test]
    fn initialization_seeds_objects_arrays_and_consts() {
        let t = tree(
            json!({
                "type": "object",
                "properties": {
                    "obj": { "type": "object", "properties": { "n": { "type": "number", "default": 3 } } },
                    "list": { "type": "array", "items": { "type": "string" } },
                    "version": { "type": "integer", "const": 2 },
                    "name": { "type": "string" }
                }
            }),
            json!({ "name": 42, "list": [null, "a"] }),
        );
        assert_eq!(t.value(), Some(&json!({ "obj": { "n": 3 }, "list": ["a"], "version": 2 })));
    }

    #[test]
    fn mistyped_array_items_are_dropped() {
        let list = json!({ "type": "object", "properties": { "list": { "type": "array", "items": { "type": "string" } } } });
        let t = tree(list.clone(), json!({ "list": ["a", 3] }));
        assert_eq!(t.value(), Some(&json!({ "list": ["a"] })));

        // later items shift into the hole and are repaired in turn
        let t = tree(list, json!({ "list": ["a", 3, "b", 5] }));
        assert_eq!(t.value(), Some(&json!({ "list": ["a", "b"] })));
        assert_eq!(t.node("list").unwrap().children().len(), 2);
    }

    #[test]
    fn replaced_values_are_repaired_again() {
        let mut t = tree(
            json!({
                "type": "object",
                "properties": {
                    "v": { "type": "string", "const": "fixed" },
                    "n": { "type": "number" }
                }
            }),
            json!({}),
        );
        assert_eq!(t.value(), Some(&json!({ "v": "fixed" })));

        assert!(t.set_value(Some(json!({ "v": "user", "n": "oops" }))).converged);
        assert_eq!(t.value(), Some(&json!({ "v": "fixed" })));

        assert!(t.set_value(Some(json!({ "n": 4 }))).converged);
        assert_eq!(t.value(), Some(&json!({ "v": "fixed", "n": 4 })));
    }

    #[test]
    fn plain_schemas_are_not_prepared_again_on_value_changes() {
        let mut t = tree(
            json!({ "type": "object", "properties": { "a": { "type": "string" }, "b": { "type": "string" } } }),
            json!({}),
        );
        let root_before = t.root().prepare_count();
        let a_before = t.node("a").unwrap().prepare_count();
        assert!(t.input("a", Some(json!("x"))));
        assert!(t.input("b", Some(json!("y"))));
        assert_eq!(t.root().prepare_count(), root_before);
        assert_eq!(t.node("a").unwrap().prepare_count(), a_before);
    }

    #[test]
    fn conditional_schemas_follow_the_value() {
        let mut t = tree(
            json!({
                "type": "object",
                "properties": { "a": { "type": "string" } },
                "dependencies": { "a": { "properties": { "b": { "type": "number" } } } }
            }),
            json!({}),
        );
        assert!(t.node("b").is_none());
        t.input("a", Some(json!("x")));
        assert!(t.node("b").is_some());
        t.input("b", Some(json!(3)));
        t.input("a", None);
        assert!(t.node("b").is_none());
        // the value is kept; it is only stripped from closed schemas
        assert_eq!(t.value(), Some(&json!({ "b": 3 })));
    }

    #[test]
    fn closed_schemas_strip_undeclared_keys() {
        let t = tree(
            json!({ "type": "object", "additionalProperties": false, "properties": { "a": { "type": "string" } } }),
            json!({ "a": "x", "zombie": 1 }),
        );
        assert_eq!(t.value(), Some(&json!({ "a": "x" })));
    }

    #[test]
    fn input_nullability() {
        let mut t = tree(
            json!({
                "type": "object",
                "properties": {
                    "opt": { "type": ["string", "null"] },
                    "req": { "type": "string" }
                }
            }),
            json!({ "opt": "x", "req": "y" }),
        );
        t.input("opt", None);
        t.input("req", Some(Value::Null));
        assert_eq!(t.value(), Some(&json!({ "opt": null })));
        assert!(!t.input("opt", Some(Value::Null)));
    }

    #[test]
    fn separator_strings_accept_arrays() {
        let mut t = tree(
            json!({ "type": "object", "properties": { "tags": { "type": "string", "x-separator": "," } } }),
            json!({}),
        );
        t.input("tags", Some(json!(["a", "b"])));
        assert_eq!(t.value(), Some(&json!({ "tags": "a,b" })));
    }

    #[test]
    fn runaway_sync_is_reported() {
        let mut t = tree(
            json!({
                "type": "object",
                "properties": { "a": { "type": "integer" } },
                "if": { "properties": { "a": { "const": 1 } }, "required": ["a"] },
                "then": { "properties": { "a": { "const": 2 } } },
                "else": { "properties": { "a": { "const": 1 } } }
            }),
            json!({}),
        );
        let report = t.sync();
        assert!(!report.converged);
        assert_eq!(report.passes, MAX_PASSES);
    }

    #[test]
    fn events_reach_subscribers() {
        let mut t = tree(json!({ "type": "object", "properties": { "a": { "type": "string" } } }), json!({}));
        let mut rx = t.subscribe();
        t.input("a", Some(json!("x")));
        let first = rx.try_next().unwrap().unwrap();
        assert_eq!(first, FormEvent::InputChild { full_key: "a".into(), value: Some(json!("x")), old_value: None });
        let second = rx.try_next().unwrap().unwrap();
        assert_eq!(second, FormEvent::Input { value: Some(json!({ "a": "x" })) });
    }

    #[test]
    fn unknown_nodes_are_ignored() {
        let mut t = tree(json!({ "type": "object", "properties": {} }), json!({}));
        assert!(!t.input("nope", Some(json!(1))));
    }
}
