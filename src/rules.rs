//! Validation rules handed to the widget layer.
//!
//! A rule looks at a candidate value and returns a message when it is not
//! acceptable. The engine only asks a [`RuleProvider`] for rules whenever the
//! effective schema changes; it never runs them itself.
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::options::Options;
use crate::schema::FullSchema;

pub type Rule = Arc<dyn Fn(&Option<Value>) -> Option<String> + Send + Sync>;

pub trait RuleProvider: Send + Sync {
    fn rules(
        &self,
        raw: &Value,
        full: &FullSchema,
        options: &Options,
        required: bool,
        is_branch_select: bool,
    ) -> Vec<Rule>;
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("static regex"));

/// `{keyword}` placeholders in a message are replaced by schema keyword values.
fn interpolate(message: &str, full: &FullSchema) -> String {
    PLACEHOLDER
        .replace_all(message, |caps: &regex::Captures| {
            match full.keywords.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn is_empty(v: &Option<Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(xs)) => xs.is_empty(),
        _ => false,
    }
}

/// Required, length, bounds and pattern rules with localized messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRules;

impl RuleProvider for DefaultRules {
    fn rules(&self, _raw: &Value, full: &FullSchema, options: &Options, required: bool, is_branch_select: bool) -> Vec<Rule> {
        let mut rules: Vec<Rule> = Vec::new();
        let msg = |key: &str| interpolate(&options.message(key), full);

        if required || is_branch_select {
            let m = msg("required");
            rules.push(Arc::new(move |v: &Option<Value>| if is_empty(v) { Some(m.clone()) } else { None }));
        }

        let kw_u64 = |k: &str| full.keywords.get(k).and_then(Value::as_u64);
        let kw_f64 = |k: &str| full.keywords.get(k).and_then(Value::as_f64);

        match full.type_.as_deref() {
            Some("string") => {
                if let Some(n) = kw_u64("minLength") {
                    let m = msg("minLength");
                    rules.push(Arc::new(move |v: &Option<Value>| match v {
                        Some(Value::String(s)) if !s.is_empty() && (s.chars().count() as u64) < n => Some(m.clone()),
                        _ => None,
                    }));
                }
                if let Some(n) = kw_u64("maxLength") {
                    let m = msg("maxLength");
                    rules.push(Arc::new(move |v: &Option<Value>| match v {
                        Some(Value::String(s)) if (s.chars().count() as u64) > n => Some(m.clone()),
                        _ => None,
                    }));
                }
                if let Some(Value::String(p)) = full.keywords.get("pattern") {
                    match Regex::new(p) {
                        Ok(rx) => {
                            let m = msg("pattern");
                            rules.push(Arc::new(move |v: &Option<Value>| match v {
                                Some(Value::String(s)) if !s.is_empty() && !rx.is_match(s) => Some(m.clone()),
                                _ => None,
                            }));
                        }
                        Err(error) => tracing::warn!(target: "schemaform::rules", %error, pattern = %p, "invalid pattern"),
                    }
                }
            }
            Some("number") | Some("integer") => {
                if let Some(n) = kw_f64("minimum") {
                    let m = msg("minimum");
                    rules.push(Arc::new(move |v: &Option<Value>| match v.as_ref().and_then(Value::as_f64) {
                        Some(x) if x < n => Some(m.clone()),
                        _ => None,
                    }));
                }
                if let Some(n) = kw_f64("maximum") {
                    let m = msg("maximum");
                    rules.push(Arc::new(move |v: &Option<Value>| match v.as_ref().and_then(Value::as_f64) {
                        Some(x) if x > n => Some(m.clone()),
                        _ => None,
                    }));
                }
            }
            Some("array") => {
                if let Some(n) = kw_u64("minItems") {
                    let m = msg("minItems");
                    rules.push(Arc::new(move |v: &Option<Value>| match v {
                        Some(Value::Array(xs)) if (xs.len() as u64) < n => Some(m.clone()),
                        _ => None,
                    }));
                }
                if let Some(n) = kw_u64("maxItems") {
                    let m = msg("maxItems");
                    rules.push(Arc::new(move |v: &Option<Value>| match v {
                        Some(Value::Array(xs)) if (xs.len() as u64) > n => Some(m.clone()),
                        _ => None,
                    }));
                }
            }
            _ => {}
        }
        rules
    }
}

/// First failing rule's message.
pub fn check(rules: &[Rule], value: &Option<Value>) -> Option<String> {
    rules.iter().find_map(|r| r(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{prepare, NodeInfo};
    use serde_json::json;

    fn rules_for(schema: Value, required: bool) -> Vec<Rule> {
        let options = Options::default().finalize();
        let full = prepare(&schema, None, &options, &NodeInfo::root());
        DefaultRules.rules(&schema, &full, &full.options, required, false)
    }

    #[test]
    fn required_rule() {
        let rules = rules_for(json!({ "type": "string" }), true);
        assert_eq!(check(&rules, &None).as_deref(), Some("This information is required"));
        assert_eq!(check(&rules, &Some(json!(""))).as_deref(), Some("This information is required"));
        assert_eq!(check(&rules, &Some(json!("x"))), None);
    }

    #[test]
    fn length_messages_are_interpolated() {
        let rules = rules_for(json!({ "type": "string", "minLength": 3, "maxLength": 5 }), false);
        assert_eq!(check(&rules, &Some(json!("ab"))).as_deref(), Some("3 characters minimum"));
        assert_eq!(check(&rules, &Some(json!("abcdef"))).as_deref(), Some("5 characters maximum"));
        assert_eq!(check(&rules, &Some(json!("abcd"))), None);
        // empty strings are left to the required rule
        assert_eq!(check(&rules, &Some(json!(""))), None);
    }

    #[test]
    fn numeric_bounds_and_pattern() {
        let rules = rules_for(json!({ "type": "integer", "minimum": 1, "maximum": 3 }), false);
        assert!(check(&rules, &Some(json!(0))).is_some());
        assert!(check(&rules, &Some(json!(4))).is_some());
        assert!(check(&rules, &Some(json!(2))).is_none());

        let rules = rules_for(json!({ "type": "string", "pattern": "^[a-z]+$" }), false);
        assert!(check(&rules, &Some(json!("ABC"))).is_some());
        assert!(check(&rules, &Some(json!("abc"))).is_none());
    }
}
