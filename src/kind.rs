//! Per-category node behavior.
//!
//! Every node falls in exactly one [`Kind`]; the first [`Capability`] in
//! [`TABLE`] that accepts the effective schema decides the widget and how
//! values entered in it are stored.
use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::{is_const_list, FullSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Date,
    Color,
    Select,
    File,
    Markdown,
    Simple,
    Object,
    Array,
    /// broken reference or a schema nothing accepts
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectItem {
    pub value: Value,
    pub title: String,
}

pub trait Capability: Sync {
    fn kind(&self) -> Kind;

    fn accepts(&self, full: &FullSchema) -> bool;

    fn widget(&self, full: &FullSchema) -> &'static str;

    /// Widget value → stored value.
    fn coerce_input(&self, full: &FullSchema, value: Option<Value>) -> Option<Value> {
        match (value, &full.layout.separator) {
            (Some(Value::Array(parts)), Some(sep)) if full.is_type("string") => {
                let parts: Vec<String> = parts
                    .iter()
                    .map(|p| p.as_str().map(str::to_string).unwrap_or_else(|| p.to_string()))
                    .collect();
                Some(Value::String(parts.join(sep)))
            }
            (v, _) => v,
        }
    }

    /// Stored value → widget value.
    fn widget_value(&self, full: &FullSchema, value: Option<&Value>) -> Option<Value> {
        match (value, &full.layout.separator) {
            (Some(Value::String(s)), Some(sep)) if !sep.is_empty() => {
                Some(Value::Array(s.split(sep.as_str()).map(|p| Value::String(p.into())).collect()))
            }
            (v, _) => v.cloned(),
        }
    }
}

fn display_is(full: &FullSchema, d: &str) -> bool {
    full.keywords.get("x-display").and_then(Value::as_str) == Some(d)
}

// ——— DATE ———

pub struct DateCap;

impl Capability for DateCap {
    fn kind(&self) -> Kind { Kind::Date }
    fn accepts(&self, full: &FullSchema) -> bool {
        full.is_type("string") && matches!(full.format(), Some("date" | "date-time" | "time"))
    }
    fn widget(&self, full: &FullSchema) -> &'static str {
        match full.format() {
            Some("date-time") => "date-time-picker",
            Some("time") => "time-picker",
            _ => "date-picker",
        }
    }
}

// ——— COLOR ———

pub struct ColorCap;

impl Capability for ColorCap {
    fn kind(&self) -> Kind { Kind::Color }
    fn accepts(&self, full: &FullSchema) -> bool {
        full.is_type("string") && (full.format() == Some("hexcolor") || display_is(full, "color-picker"))
    }
    fn widget(&self, _full: &FullSchema) -> &'static str { "color-picker" }
}

// ——— SELECT ———

pub struct SelectCap;

/// Whether the node picks its value among items.
pub fn is_select(full: &FullSchema) -> bool {
    let kw = |k: &str| full.keywords.get(k);
    if kw("x-fromUrl").is_some() || kw("x-fromData").is_some() || kw("enum").is_some() {
        return true;
    }
    if is_const_list(kw("oneOf")) || is_const_list(kw("anyOf")) {
        return true;
    }
    match kw("items") {
        Some(items) if full.is_type("array") => {
            items.get("enum").is_some() || is_const_list(items.get("oneOf")) || is_const_list(items.get("anyOf"))
        }
        _ => false,
    }
}

impl Capability for SelectCap {
    fn kind(&self) -> Kind { Kind::Select }
    fn accepts(&self, full: &FullSchema) -> bool { is_select(full) }
    fn widget(&self, full: &FullSchema) -> &'static str {
        if display_is(full, "radio") {
            "radio-group"
        } else if display_is(full, "checkbox") {
            "checkbox-group"
        } else if display_is(full, "autocomplete") || full.keywords.contains_key("x-fromUrl") {
            "autocomplete"
        } else {
            "select"
        }
    }
}

/// Items known from the schema alone (`enum`, const alternatives).
pub fn static_items(full: &FullSchema) -> Option<Vec<SelectItem>> {
    let source = match full.items() {
        Some(items) if full.is_type("array") => items.as_object().cloned().unwrap_or_default(),
        _ => full.keywords.clone(),
    };
    if let Some(Value::Array(values)) = source.get("enum") {
        return Some(values.iter().map(|v| SelectItem { value: v.clone(), title: title_of(v) }).collect());
    }
    for keyword in ["oneOf", "anyOf"] {
        if let Some(Value::Array(alts)) = source.get(keyword) {
            if !is_const_list(source.get(keyword)) { continue; }
            return Some(
                alts.iter()
                    .filter_map(|alt| {
                        let value = alt.get("const")?.clone();
                        let title = alt.get("title").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| title_of(&value));
                        Some(SelectItem { value, title })
                    })
                    .collect(),
            );
        }
    }
    None
}

/// Items from fetched or computed data. `x-itemsProp` picks the list inside an
/// object response; `x-itemKey` and `x-itemTitle` pick fields of object items.
pub fn items_from_data(full: &FullSchema, data: &Value) -> Vec<SelectItem> {
    let list = match (data, full.x_str("x-itemsProp")) {
        (Value::Object(m), Some(prop)) => m.get(prop).and_then(Value::as_array).cloned().unwrap_or_default(),
        (Value::Array(xs), _) => xs.clone(),
        _ => Vec::new(),
    };
    let key = full.x_str("x-itemKey");
    let title = full.x_str("x-itemTitle");
    list.into_iter()
        .map(|item| match &item {
            Value::Object(m) => {
                let value = key.and_then(|k| m.get(k)).cloned().unwrap_or_else(|| item.clone());
                let t = title.and_then(|t| m.get(t)).or_else(|| key.and_then(|k| m.get(k)));
                SelectItem { title: t.map(title_of).unwrap_or_else(|| title_of(&value)), value }
            }
            _ => SelectItem { title: title_of(&item), value: item.clone() },
        })
        .collect()
}

fn title_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ——— FILE ———

pub struct FileCap;

impl Capability for FileCap {
    fn kind(&self) -> Kind { Kind::File }
    fn accepts(&self, full: &FullSchema) -> bool {
        display_is(full, "file") || (full.is_type("string") && full.keywords.contains_key("contentMediaType"))
    }
    fn widget(&self, _full: &FullSchema) -> &'static str { "file-input" }
}

// ——— MARKDOWN ———

pub struct MarkdownCap;

impl Capability for MarkdownCap {
    fn kind(&self) -> Kind { Kind::Markdown }
    fn accepts(&self, full: &FullSchema) -> bool { full.is_type("string") && display_is(full, "markdown") }
    fn widget(&self, _full: &FullSchema) -> &'static str { "markdown-editor" }
}

// ——— SIMPLE ———

pub struct SimpleCap;

impl Capability for SimpleCap {
    fn kind(&self) -> Kind { Kind::Simple }
    fn accepts(&self, full: &FullSchema) -> bool {
        matches!(full.type_.as_deref(), Some("string" | "number" | "integer" | "boolean"))
    }
    fn widget(&self, full: &FullSchema) -> &'static str {
        match full.type_.as_deref() {
            Some("boolean") if display_is(full, "checkbox") => "checkbox",
            Some("boolean") => "switch",
            Some("number" | "integer") if display_is(full, "slider") => "slider",
            Some("number" | "integer") => "number-field",
            _ if display_is(full, "textarea") => "textarea",
            _ if display_is(full, "password") => "password-field",
            _ => "text-field",
        }
    }
}

// ——— OBJECT ———

pub struct ObjectCap;

impl Capability for ObjectCap {
    fn kind(&self) -> Kind { Kind::Object }
    fn accepts(&self, full: &FullSchema) -> bool { full.is_type("object") }
    fn widget(&self, full: &FullSchema) -> &'static str {
        match full.display.as_deref() {
            Some("tabs") => "tabs",
            Some("expansion-panels") => "expansion-panels",
            _ => "section",
        }
    }
}

// ——— ARRAY ———

pub struct ArrayCap;

impl Capability for ArrayCap {
    fn kind(&self) -> Kind { Kind::Array }
    fn accepts(&self, full: &FullSchema) -> bool { full.is_type("array") }
    fn widget(&self, full: &FullSchema) -> &'static str {
        if full.items().is_some_and(Value::is_array) { "tuple" } else { "editable-array" }
    }
}

// ——— DISPATCH ———

pub static TABLE: [&dyn Capability; 8] = [
    &DateCap, &ColorCap, &SelectCap, &FileCap, &MarkdownCap, &SimpleCap, &ObjectCap, &ArrayCap,
];

pub fn capability(full: &FullSchema) -> Option<&'static dyn Capability> {
    if full.broken_ref.is_some() { return None; }
    TABLE.iter().copied().find(|c| c.accepts(full))
}

pub fn kind_of(full: &FullSchema) -> Kind {
    capability(full).map(|c| c.kind()).unwrap_or(Kind::Unknown)
}

pub fn widget_of(full: &FullSchema) -> &'static str {
    match capability(full) {
        Some(c) => c.widget(full),
        None if full.broken_ref.is_some() => "broken-ref",
        None => "none",
    }
}

pub fn coerce_input(full: &FullSchema, value: Option<Value>) -> Option<Value> {
    match capability(full) {
        Some(c) => c.coerce_input(full, value),
        None => value,
    }
}

pub fn widget_value(full: &FullSchema, value: Option<&Value>) -> Option<Value> {
    match capability(full) {
        Some(c) => c.widget_value(full, value),
        None => value.cloned(),
    }
}

/// Constant values contributed by a branch's properties.
pub fn branch_consts(branch: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(Value::Object(props)) = branch.get("properties") {
        for (k, p) in props {
            if let Some(c) = p.get("const") { out.insert(k.clone(), c.clone()); }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::schema::{prepare, NodeInfo};
    use serde_json::json;

    fn full(schema: Value) -> FullSchema {
        prepare(&schema, None, &Options::default().finalize(), &NodeInfo::root())
    }

    #[test]
    fn dispatch_order() {
        assert_eq!(kind_of(&full(json!({ "type": "string", "format": "date" }))), Kind::Date);
        assert_eq!(kind_of(&full(json!({ "type": "string", "format": "hexcolor" }))), Kind::Color);
        assert_eq!(kind_of(&full(json!({ "type": "string", "enum": ["a"] }))), Kind::Select);
        assert_eq!(kind_of(&full(json!({ "type": "string", "x-display": "markdown" }))), Kind::Markdown);
        assert_eq!(kind_of(&full(json!({ "type": "integer" }))), Kind::Simple);
        assert_eq!(kind_of(&full(json!({ "type": "object" }))), Kind::Object);
        assert_eq!(kind_of(&full(json!({ "type": "array", "items": { "type": "string" } }))), Kind::Array);
        assert_eq!(kind_of(&full(json!({ "type": "array", "items": { "enum": ["a", "b"] } }))), Kind::Select);
        assert_eq!(kind_of(&full(json!({ "x-ref-error": "nope" }))), Kind::Unknown);
    }

    #[test]
    fn widgets() {
        assert_eq!(widget_of(&full(json!({ "type": "boolean" }))), "switch");
        assert_eq!(widget_of(&full(json!({ "type": "string", "x-display": "textarea" }))), "textarea");
        assert_eq!(widget_of(&full(json!({ "type": "string", "format": "time" }))), "time-picker");
        assert_eq!(widget_of(&full(json!({ "x-ref-error": "nope" }))), "broken-ref");
    }

    #[test]
    fn separator_round_trip() {
        let f = full(json!({ "type": "string", "x-separator": "," }));
        assert_eq!(coerce_input(&f, Some(json!(["a", "b"]))), Some(json!("a,b")));
        assert_eq!(widget_value(&f, Some(&json!("a,b"))), Some(json!(["a", "b"])));
    }

    #[test]
    fn items_from_schema_and_data() {
        let f = full(json!({ "type": "string", "oneOf": [{ "const": "a", "title": "A" }, { "const": "b" }] }));
        let items = static_items(&f).unwrap();
        assert_eq!(items[0], SelectItem { value: json!("a"), title: "A".into() });
        assert_eq!(items[1].title, "b");

        let f = full(json!({ "type": "string", "x-fromData": "list", "x-itemKey": "id", "x-itemTitle": "name" }));
        let items = items_from_data(&f, &json!([{ "id": 1, "name": "One" }, { "id": 2 }]));
        assert_eq!(items[0], SelectItem { value: json!(1), title: "One".into() });
        assert_eq!(items[1].title, "2");

        let f = full(json!({ "type": "string", "x-fromUrl": "http://x", "x-itemsProp": "results" }));
        assert_eq!(items_from_data(&f, &json!({ "results": ["a"] })).len(), 1);
    }

    #[test]
    fn branch_consts_are_collected() {
        let b = json!({ "properties": { "kind": { "const": "a" }, "x": { "type": "string" } } });
        assert_eq!(Value::Object(branch_consts(&b)), json!({ "kind": "a" }));
    }
}
