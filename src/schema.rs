//! Effective schema preparation.
//!
//! [`prepare`] turns a resolved schema node plus the value currently bound to
//! it into a [`FullSchema`]: conditionals applied, dependencies and `allOf`
//! merged, the matching `oneOf`/`anyOf` branch recorded, and every attribute
//! the widget layer needs precomputed.
//!
//! `FullSchema` is compared with `==` against the previous one; an equal
//! result means nothing downstream has to run again. This is what keeps
//! "schema changed the value" and "value changed the schema" from looping.
pub mod matcher;
pub mod merge;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::options::Options;
use crate::refs::REF_ERROR_KEY;
use crate::services::Services;

pub const ROOT_KEY: &str = "root";

/// Position of a node in its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Key {
    Root,
    Prop(String),
    Index(usize),
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Root => f.write_str(ROOT_KEY),
            Key::Prop(k) => f.write_str(k),
            Key::Index(i) => write!(f, "{i}"),
        }
    }
}

/// What a parent tells a child about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub key: Key,
    /// dotted path from the root; the root itself is `root`
    pub full_key: String,
    pub required: bool,
}

impl NodeInfo {
    pub fn root() -> Self {
        Self { key: Key::Root, full_key: ROOT_KEY.into(), required: false }
    }

    pub fn child(&self, key: Key, required: bool) -> Self {
        let full_key = match self.key {
            Key::Root => key.to_string(),
            _ => format!("{}.{}", self.full_key, key),
        };
        Self { key, full_key, required }
    }

    pub fn is_root(&self) -> bool { self.key == Key::Root }

    /// `a.b.2` → `a-b-2`, used in element ids and classes.
    pub fn dash_key(&self) -> String { self.full_key.replace('.', "-") }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub key: String,
    pub schema: Value,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition { Then, Else }

/// The `oneOf`/`anyOf` alternative the current value matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub keyword: String,
    pub index: usize,
    pub schema: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Layout {
    pub cols: Map<String, Value>,
    pub class: Option<String>,
    pub style: Option<Value>,
    pub props: Map<String, Value>,
    pub slots: Map<String, Value>,
    pub directives: Option<Value>,
    pub tag: Option<String>,
    pub separator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSchema {
    /// merged keywords, conditionals removed
    pub keywords: Map<String, Value>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub nullable: bool,
    pub read_only: bool,
    #[serde(rename = "const")]
    pub const_: Option<Value>,
    pub properties: Vec<Property>,
    pub condition: Option<Condition>,
    /// dependency triggers present in the value
    pub dependencies: Vec<String>,
    pub branches: Vec<Branch>,
    pub label: String,
    pub disabled: bool,
    pub display: Option<String>,
    pub visible_if: Option<String>,
    pub required: bool,
    pub default_value: Option<Value>,
    pub slot_name: String,
    pub layout: Layout,
    pub options: Options,
    pub broken_ref: Option<String>,
}

impl FullSchema {
    pub fn get(&self, keyword: &str) -> Option<&Value> { self.keywords.get(keyword) }

    fn str_kw(&self, keyword: &str) -> Option<&str> { self.get(keyword).and_then(Value::as_str) }

    pub fn title(&self) -> Option<&str> { self.str_kw("title") }
    pub fn description(&self) -> Option<&str> { self.str_kw("description") }
    pub fn format(&self) -> Option<&str> { self.str_kw("format") }

    pub fn is_type(&self, t: &str) -> bool { self.type_.as_deref() == Some(t) }

    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.key == key)
    }

    pub fn items(&self) -> Option<&Value> { self.get("items") }

    pub fn closed(&self) -> bool {
        self.get("additionalProperties") == Some(&Value::Bool(false))
    }

    pub fn x_str(&self, keyword: &str) -> Option<&str> { self.str_kw(keyword) }
}

// ------------------------------- Prepare --------------------------------- //

pub fn prepare(schema: &Value, value: Option<&Value>, options: &Options, node: &NodeInfo) -> FullSchema {
    let mut work = match schema {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };

    if let Some(Value::Array(all)) = work.remove("allOf") {
        for sub in all.iter().filter_map(Value::as_object) {
            merge::deep_merge(&mut work, sub);
        }
    }

    let condition = apply_if(&mut work, value);
    let dependencies = apply_dependencies(&mut work, value);

    let (type_, nullable) = normalize_type(&work);
    if let Some(t) = &type_ {
        work.insert("type".into(), Value::String(t.clone()));
    }

    let options = match work.get("x-options") {
        Some(Value::Object(over)) => options.fold(over),
        _ => options.clone(),
    };

    let branches = if type_.as_deref() == Some("object") { select_branches(&work, value) } else { Vec::new() };

    let required_keys: Vec<&str> = match work.get("required") {
        Some(Value::Array(r)) => r.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    let properties = match work.get("properties") {
        Some(Value::Object(props)) => props
            .iter()
            .map(|(k, s)| Property { key: k.clone(), schema: s.clone(), required: required_keys.contains(&k.as_str()) })
            .collect(),
        _ => Vec::new(),
    };

    let read_only = work.get("readOnly").and_then(Value::as_bool).unwrap_or(false);
    let const_ = work.get("const").cloned();
    let x_display = work.get("x-display").and_then(Value::as_str).map(str::to_string);

    let label = if (read_only || options.read_only_array_item) && options.hide_read_only_labels {
        String::new()
    } else {
        match (work.get("title").and_then(Value::as_str), &node.key) {
            (Some(t), _) => t.to_string(),
            (None, Key::Prop(k)) => k.clone(),
            _ => String::new(),
        }
    };

    let display = match (&options.root_display, node.is_root()) {
        (Some(d), true) => Some(d.clone()),
        _ => x_display.clone(),
    };

    let slot_name = match &x_display {
        Some(d) if d.starts_with("custom-") => d.clone(),
        _ => node.full_key.clone(),
    };

    let default_value = default_value(&work, type_.as_deref(), read_only, &options);
    let layout = layout(&work, &options);

    FullSchema {
        type_,
        nullable,
        read_only,
        const_,
        properties,
        condition,
        dependencies,
        branches,
        label,
        disabled: options.disable_all || read_only,
        display,
        visible_if: work.get("x-if").and_then(Value::as_str).map(str::to_string),
        required: node.required,
        default_value,
        slot_name,
        layout,
        broken_ref: work.get(REF_ERROR_KEY).and_then(Value::as_str).map(str::to_string),
        options,
        keywords: work,
    }
}

fn apply_if(work: &mut Map<String, Value>, value: Option<&Value>) -> Option<Condition> {
    let cond = work.remove("if");
    let then = work.remove("then");
    let else_ = work.remove("else");
    let cond = cond?;
    if !matches!(cond, Value::Object(_) | Value::Bool(_)) {
        tracing::debug!(target: "schemaform::schema", "ignoring malformed `if`");
        return None;
    }
    let (which, branch) = if matcher::matches(&cond, value) {
        (Condition::Then, then)
    } else {
        (Condition::Else, else_)
    };
    match branch {
        Some(Value::Object(b)) => {
            merge::deep_merge(work, &b);
            Some(which)
        }
        _ => None,
    }
}

fn apply_dependencies(work: &mut Map<String, Value>, value: Option<&Value>) -> Vec<String> {
    let Some(Value::Object(deps)) = work.remove("dependencies") else { return Vec::new() };
    let Some(Value::Object(obj)) = value else { return Vec::new() };
    let mut applied = Vec::new();
    for (trigger, dep) in &deps {
        if matches!(obj.get(trigger), None | Some(Value::Null)) { continue; }
        match dep {
            Value::Array(keys) => merge::add_required(work, keys),
            Value::Object(sub) => merge::deep_merge(work, sub),
            _ => continue,
        }
        applied.push(trigger.clone());
    }
    applied
}

fn normalize_type(work: &Map<String, Value>) -> (Option<String>, bool) {
    let mut nullable = work.get("nullable").and_then(Value::as_bool).unwrap_or(false);
    let type_ = match work.get("type") {
        Some(Value::String(t)) => Some(t.clone()),
        Some(Value::Array(ts)) => {
            let names: Vec<&str> = ts.iter().filter_map(Value::as_str).collect();
            if names.contains(&"null") { nullable = true; }
            names.into_iter().find(|t| *t != "null").map(str::to_string)
        }
        _ if work.contains_key("properties") => Some("object".into()),
        _ => None,
    };
    (type_, nullable)
}

/// `oneOf`/`anyOf` whose alternatives are all `const` describe a select.
pub fn is_const_list(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Array(xs)) => !xs.is_empty() && xs.iter().all(|x| x.get("const").is_some()),
        _ => false,
    }
}

fn select_branches(work: &Map<String, Value>, value: Option<&Value>) -> Vec<Branch> {
    let mut out = Vec::new();
    for keyword in ["oneOf", "anyOf"] {
        let Some(Value::Array(alts)) = work.get(keyword) else { continue };
        if is_const_list(work.get(keyword)) { continue; }
        if let Some(index) = alts.iter().position(|b| matcher::matches(b, value)) {
            out.push(Branch { keyword: keyword.into(), index, schema: alts[index].clone() });
        }
    }
    out
}

fn default_value(work: &Map<String, Value>, type_: Option<&str>, read_only: bool, options: &Options) -> Option<Value> {
    if read_only && options.delete_read_only { return None; }
    match type_ {
        Some("object") if !["x-fromUrl", "x-fromData", "enum"].iter().any(|k| work.contains_key(*k)) => {
            Some(Value::Object(Map::new()))
        }
        Some("array") => Some(Value::Array(Vec::new())),
        _ => Some(Value::Null),
    }
}

fn layout(work: &Map<String, Value>, options: &Options) -> Layout {
    let mut cols = options.field_col_props.clone();
    match work.get("x-cols") {
        Some(Value::Object(c)) => cols.extend(c.clone()),
        Some(c @ (Value::Number(_) | Value::String(_))) => { cols.insert("cols".into(), c.clone()); }
        _ => {}
    }
    let map_of = |k: &str| work.get(k).and_then(Value::as_object).cloned().unwrap_or_default();
    let str_of = |k: &str| work.get(k).and_then(Value::as_str).map(str::to_string);
    Layout {
        cols,
        class: str_of("x-class"),
        style: work.get("x-style").cloned(),
        props: map_of("x-props"),
        slots: map_of("x-slots"),
        directives: work.get("x-directives").cloned(),
        tag: str_of("x-tag"),
        separator: str_of("x-separator").or_else(|| str_of("separator")),
    }
}

/// Whether the effective schema can depend on the value, so that it must be
/// prepared again on value changes and not only on schema changes.
pub fn declares_conditionals(schema: &Value) -> bool {
    let Value::Object(s) = schema else { return false };
    if s.contains_key("if") || s.contains_key("dependencies") { return true; }
    let object_like = s.get("type") == Some(&Value::String("object".into())) || s.contains_key("properties");
    if object_like && ["oneOf", "anyOf"].iter().any(|k| s.get(*k).is_some_and(Value::is_array) && !is_const_list(s.get(*k))) {
        return true;
    }
    match s.get("allOf") {
        Some(Value::Array(all)) => all.iter().any(declares_conditionals),
        _ => false,
    }
}

/// Display text for formatted values (dates, times, ...), if a formatter is
/// registered for the schema's `format`.
pub fn formatted_value(full: &FullSchema, value: Option<&Value>, services: &Services) -> Option<String> {
    let v = value.filter(|v| crate::expr::truthy(&Some((*v).clone())))?;
    let f = services.formats.get(full.format()?)?;
    Some(f(v, &full.options.locale))
}

// ------------------------------- Tests ----------------------------------- //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts() -> Options { Options::default().finalize() }

    fn prep(schema: Value, value: Value) -> FullSchema {
        prepare(&schema, Some(&value), &opts(), &NodeInfo::root())
    }

    #[test]
    fn full_keys() {
        let root = NodeInfo::root();
        let a = root.child(Key::Prop("a".into()), false);
        let item = a.child(Key::Index(2), true);
        assert_eq!(a.full_key, "a");
        assert_eq!(item.full_key, "a.2");
        assert_eq!(item.dash_key(), "a-2");
    }

    #[test]
    fn if_then_else() {
        let schema = json!({
            "type": "object",
            "properties": { "kind": { "type": "string" } },
            "if": { "properties": { "kind": { "const": "pro" } }, "required": ["kind"] },
            "then": { "properties": { "vat": { "type": "string" } }, "required": ["vat"] },
            "else": { "properties": { "age": { "type": "integer" } } }
        });
        let full = prep(schema.clone(), json!({ "kind": "pro" }));
        assert_eq!(full.condition, Some(Condition::Then));
        assert!(full.property("vat").unwrap().required);
        assert!(full.get("if").is_none());

        let full = prep(schema, json!({ "kind": "basic" }));
        assert_eq!(full.condition, Some(Condition::Else));
        assert!(full.property("vat").is_none());
        assert!(full.property("age").is_some());
    }

    #[test]
    fn malformed_if_applies_nothing() {
        let full = prep(json!({ "type": "object", "if": "nope", "then": { "title": "T" } }), json!({}));
        assert_eq!(full.condition, None);
        assert_eq!(full.title(), None);
    }

    #[test]
    fn dependencies_merge_while_trigger_is_present() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "dependencies": {
                "a": { "properties": { "b": { "type": "number" } } },
                "c": ["a"]
            }
        });
        let full = prep(schema.clone(), json!({ "a": "x" }));
        assert_eq!(full.dependencies, vec!["a".to_string()]);
        assert_eq!(full.properties.iter().map(|p| p.key.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        let full = prep(schema.clone(), json!({ "c": 1 }));
        assert_eq!(full.dependencies, vec!["c".to_string()]);
        assert!(full.property("a").unwrap().required);

        let full = prep(schema, json!({ "a": null, "b": 3 }));
        assert!(full.dependencies.is_empty());
        assert!(full.property("b").is_none());
    }

    #[test]
    fn one_of_selects_first_matching_branch() {
        let schema = json!({
            "type": "object",
            "oneOf": [
                { "properties": { "kind": { "const": "a" }, "x": { "type": "string" } }, "required": ["kind"] },
                { "properties": { "kind": { "const": "b" }, "y": { "type": "string" } }, "required": ["kind"] }
            ]
        });
        let full = prep(schema.clone(), json!({ "kind": "b" }));
        assert_eq!(full.branches.len(), 1);
        assert_eq!(full.branches[0].index, 1);
        assert_eq!(full.branches[0].keyword, "oneOf");

        assert!(prep(schema, json!({})).branches.is_empty());
    }

    #[test]
    fn const_alternatives_are_a_select() {
        let schema = json!({ "type": "object", "oneOf": [{ "const": "a" }, { "const": "b" }] });
        assert!(prep(schema.clone(), json!("a")).branches.is_empty());
        assert!(!declares_conditionals(&schema));
    }

    #[test]
    fn type_normalization() {
        let full = prep(json!({ "type": ["string", "null"] }), json!(null));
        assert_eq!(full.type_.as_deref(), Some("string"));
        assert!(full.nullable);
        let full = prep(json!({ "properties": {} }), json!({}));
        assert!(full.is_type("object"));
    }

    #[test]
    fn all_of_is_merged() {
        let full = prep(json!({ "allOf": [{ "type": "string" }, { "title": "T", "minLength": 2 }] }), json!("x"));
        assert!(full.is_type("string"));
        assert_eq!(full.title(), Some("T"));
        assert_eq!(full.get("minLength"), Some(&json!(2)));
    }

    #[test]
    fn derived_attributes() {
        let node = NodeInfo::root().child(Key::Prop("name".into()), true);
        let schema = json!({ "type": "string", "readOnly": true, "x-display": "custom-name", "x-cols": 6, "x-class": "big" });
        let full = prepare(&schema, None, &opts(), &node);
        assert_eq!(full.label, "name");
        assert!(full.disabled);
        assert!(full.required);
        assert_eq!(full.slot_name, "custom-name");
        assert_eq!(full.layout.cols.get("cols"), Some(&json!(6)));
        assert_eq!(full.layout.class.as_deref(), Some("big"));
        assert_eq!(full.default_value, Some(Value::Null));

        let hide = Options { hide_read_only_labels: true, delete_read_only: true, ..Options::default() }.finalize();
        let full = prepare(&schema, None, &hide, &node);
        assert_eq!(full.label, "");
        assert_eq!(full.default_value, None);
    }

    #[test]
    fn default_values_by_type() {
        assert_eq!(prep(json!({ "type": "object" }), json!(null)).default_value, Some(json!({})));
        assert_eq!(prep(json!({ "type": "object", "x-fromData": "list" }), json!(null)).default_value, Some(json!(null)));
        assert_eq!(prep(json!({ "type": "array" }), json!(null)).default_value, Some(json!([])));
    }

    #[test]
    fn root_display_only_applies_to_root() {
        let o = Options { root_display: Some("tabs".into()), ..Options::default() }.finalize();
        let schema = json!({ "type": "object", "x-display": "expansion-panels" });
        assert_eq!(prepare(&schema, None, &o, &NodeInfo::root()).display.as_deref(), Some("tabs"));
        let child = NodeInfo::root().child(Key::Prop("x".into()), false);
        assert_eq!(prepare(&schema, None, &o, &child).display.as_deref(), Some("expansion-panels"));
    }

    #[test]
    fn x_options_are_folded() {
        let full = prep(json!({ "type": "string", "x-options": { "disableAll": true } }), json!("a"));
        assert!(full.options.disable_all);
        assert!(full.disabled);
    }

    #[test]
    fn broken_reference_is_exposed() {
        let resolved = crate::refs::resolve(
            &json!({ "properties": { "a": { "$ref": "#/nope" } } }),
            &crate::refs::Substitutions::new(),
        );
        let child = NodeInfo::root().child(Key::Prop("a".into()), false);
        let full = prepare(&resolved["properties"]["a"], None, &opts(), &child);
        assert!(full.broken_ref.is_some());
    }

    #[test]
    fn preparation_is_idempotent() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "dependencies": { "a": { "properties": { "b": { "const": 1 } } } }
        });
        let resolved = crate::refs::resolve(&schema, &crate::refs::Substitutions::new());
        let value = json!({ "a": "x" });
        let first = prepare(&resolved, Some(&value), &opts(), &NodeInfo::root());
        let second = prepare(&resolved, Some(&value), &opts(), &NodeInfo::root());
        assert_eq!(first, second);
    }

    #[test]
    fn conditional_detection() {
        assert!(!declares_conditionals(&json!({ "type": "object", "properties": {} })));
        assert!(declares_conditionals(&json!({ "dependencies": {} })));
        assert!(declares_conditionals(&json!({ "if": true })));
        assert!(declares_conditionals(&json!({ "type": "object", "oneOf": [{ "properties": {} }] })));
        assert!(declares_conditionals(&json!({ "allOf": [{ "if": true }] })));
    }

    #[test]
    fn formatted_values() {
        let full = prep(json!({ "type": "string", "format": "date" }), json!("2024-03-01"));
        let services = Services::default();
        assert_eq!(formatted_value(&full, Some(&json!("2024-03-01")), &services).as_deref(), Some("01 Mar 2024"));
        assert_eq!(formatted_value(&full, Some(&json!("")), &services), None);
    }
}
