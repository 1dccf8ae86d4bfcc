//! Reference resolution.
//!
//! Inlines every local `$ref` (`#/...` JSON pointer) into a copy of the schema.
//! A reference may contain substitution tokens (`~$locale~`) that are replaced
//! by the first candidate whose pointer exists, so that translated sub-schemas
//! can be picked by locale with a deterministic fallback chain.
//!
//! Nothing here fails: a reference that cannot be followed is replaced by a
//! sentinel object carrying `x-ref-error`, which the rest of the engine renders
//! as a broken field.
use indexmap::IndexMap;
use serde_json::{Map, Value};

pub const LOCALE_TOKEN: &str = "~$locale~";
pub const FALLBACK_LOCALE: &str = "en";

pub const REF_ERROR_KEY: &str = "x-ref-error";
pub const REF_KEY: &str = "x-ref";

// ————————————————————————————————————————————————————————————————————————————
// SUBSTITUTIONS
// ————————————————————————————————————————————————————————————————————————————

/// token → ordered candidates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitutions(IndexMap<String, Vec<String>>);

impl Substitutions {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, token: impl Into<String>, candidates: Vec<String>) -> Self {
        let mut seen = Vec::<String>::new();
        for c in candidates {
            if !seen.contains(&c) { seen.push(c); }
        }
        self.0.insert(token.into(), seen);
        self
    }

    /// Locale chain: primary, fallbacks in order, then the fixed default.
    pub fn locale(primary: &str, fallbacks: &[&str]) -> Self {
        let mut chain = vec![primary.to_string()];
        chain.extend(fallbacks.iter().map(|s| s.to_string()));
        chain.push(FALLBACK_LOCALE.to_string());
        Self::new().with(LOCALE_TOKEN, chain)
    }

    /// Every concrete reference string a raw reference expands to, in order.
    fn expand(&self, reference: &str) -> Vec<String> {
        let mut out = vec![reference.to_string()];
        for (token, candidates) in &self.0 {
            if !reference.contains(token.as_str()) { continue; }
            out = out
                .iter()
                .flat_map(|r| candidates.iter().map(move |c| r.replace(token.as_str(), c)))
                .collect();
        }
        out
    }
}

// ————————————————————————————————————————————————————————————————————————————
// RESOLUTION
// ————————————————————————————————————————————————————————————————————————————

pub fn resolve(schema: &Value, substitutions: &Substitutions) -> Value {
    let mut stack = Vec::new();
    resolve_node(schema, schema, substitutions, &mut stack)
}

fn resolve_node(node: &Value, root: &Value, subs: &Substitutions, stack: &mut Vec<String>) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                return resolve_ref(reference, map, root, subs, stack);
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_node(v, root, subs, stack));
            }
            Value::Object(out)
        }
        Value::Array(xs) => Value::Array(xs.iter().map(|x| resolve_node(x, root, subs, stack)).collect()),
        other => other.clone(),
    }
}

fn resolve_ref(
    reference: &str,
    siblings: &Map<String, Value>,
    root: &Value,
    subs: &Substitutions,
    stack: &mut Vec<String>,
) -> Value {
    if !reference.starts_with('#') {
        return sentinel(reference, "only local references (#/...) are supported");
    }

    let mut found = None;
    for candidate in subs.expand(reference) {
        if let Some(target) = pointer(root, &candidate) {
            found = Some((candidate, target));
            break;
        }
    }
    let Some((concrete, target)) = found else {
        tracing::warn!(target: "schemaform::refs", reference, "unresolvable reference");
        return sentinel(reference, "reference target not found");
    };

    if stack.contains(&concrete) {
        tracing::warn!(target: "schemaform::refs", reference, "reference cycle");
        return sentinel(reference, "reference cycle");
    }
    stack.push(concrete);
    let mut resolved = resolve_node(target, root, subs, stack);
    stack.pop();

    // siblings of `$ref` win over the target's own keywords
    let extra: Vec<(&String, &Value)> = siblings.iter().filter(|(k, _)| k.as_str() != "$ref").collect();
    if !extra.is_empty() {
        if let Value::Object(target_map) = &mut resolved {
            for (k, v) in extra {
                target_map.insert(k.clone(), resolve_node(v, root, subs, stack));
            }
        }
    }
    resolved
}

fn pointer<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let fragment = reference.strip_prefix('#')?;
    if fragment.is_empty() { return Some(root); }
    root.pointer(fragment)
}

fn sentinel(reference: &str, message: &str) -> Value {
    let mut map = Map::new();
    map.insert(REF_ERROR_KEY.into(), Value::from(format!("{message}: {reference}")));
    map.insert(REF_KEY.into(), Value::from(reference));
    Value::Object(map)
}

/// Every `(json pointer, message)` pair left as a sentinel by [`resolve`].
pub fn broken_refs(resolved: &Value) -> Vec<(String, String)> {
    fn walk(v: &Value, at: &mut String, out: &mut Vec<(String, String)>) {
        match v {
            Value::Object(map) => {
                if let Some(Value::String(msg)) = map.get(REF_ERROR_KEY) {
                    out.push((at.clone(), msg.clone()));
                }
                for (k, child) in map {
                    let len = at.len();
                    at.push('/');
                    at.push_str(&k.replace('~', "~0").replace('/', "~1"));
                    walk(child, at, out);
                    at.truncate(len);
                }
            }
            Value::Array(xs) => {
                for (i, child) in xs.iter().enumerate() {
                    let len = at.len();
                    at.push_str(&format!("/{i}"));
                    walk(child, at, out);
                    at.truncate(len);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(resolved, &mut String::new(), &mut out);
    out
}

// ------------------------------- Tests ------------------------------------ //
