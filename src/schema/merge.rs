use serde_json::{Map, Value};

/// Deep-merge `overlay` into `base`. Objects merge key by key, `required`
/// arrays are unioned, anything else is replaced by the overlay.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (k, v) in overlay {
        match (base.get_mut(k), v) {
            (Some(Value::Object(b)), Value::Object(o)) => deep_merge(b, o),
            (Some(Value::Array(b)), Value::Array(o)) if k == "required" => {
                for x in o {
                    if !b.contains(x) { b.push(x.clone()); }
                }
            }
            _ => { base.insert(k.clone(), v.clone()); }
        }
    }
}

/// Add keys to the `required` array, creating it when missing.
pub fn add_required<'a>(schema: &mut Map<String, Value>, keys: impl IntoIterator<Item = &'a Value>) {
    let entry = schema.entry("required").or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() { *entry = Value::Array(Vec::new()); }
    if let Value::Array(required) = entry {
        for k in keys {
            if k.is_string() && !required.contains(k) { required.push(k.clone()); }
        }
    }
}
