//! Configuration surface.
//!
//! `Options` only carries data; function-valued collaborators live in
//! [`crate::services::Services`]. Options are folded per node: a schema's
//! `x-options` object is laid over the inherited options key by key.
pub mod icons;
pub mod messages;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How expressions found in schemas (`x-if`, `x-fromData`, ...) are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvalMethod {
    /// deep property getter, the safe default
    #[default]
    #[serde(alias = "propertyExpr")]
    Path,
    /// jq-style query language, no ambient capabilities
    #[serde(alias = "evalExpr")]
    Sandboxed,
    /// general script expressions; trusted schemas only, top-level options only
    #[serde(alias = "newFunction")]
    Unrestricted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    pub locale: String,
    pub default_locale: String,
    pub root_display: Option<String>,

    pub disable_all: bool,
    pub hide_read_only: bool,
    pub delete_read_only: bool,
    pub hide_read_only_empty: bool,
    pub hide_read_only_labels: bool,
    pub hide_in_array_item: bool,
    /// set by array nodes on their items when the array is read-only
    pub read_only_array_item: bool,
    pub remove_additional_properties: bool,

    pub id_prefix: String,
    pub autofocus: bool,
    /// free-form object exposed to expressions as `context`
    pub context: Value,
    pub eval_method: EvalMethod,

    pub field_props: Map<String, Value>,
    pub read_only_field_props: Map<String, Value>,
    pub field_col_props: Map<String, Value>,

    pub iconfont: String,
    pub icons: BTreeMap<String, String>,
    pub messages: BTreeMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        let mut field_col_props = Map::new();
        field_col_props.insert("cols".into(), Value::from(12));
        Self {
            locale: "en".into(),
            default_locale: "en".into(),
            root_display: None,
            disable_all: false,
            hide_read_only: false,
            delete_read_only: false,
            hide_read_only_empty: false,
            hide_read_only_labels: false,
            hide_in_array_item: false,
            read_only_array_item: false,
            remove_additional_properties: false,
            id_prefix: "sf-".into(),
            autofocus: false,
            context: Value::Object(Map::new()),
            eval_method: EvalMethod::Path,
            field_props: Map::new(),
            read_only_field_props: Map::new(),
            field_col_props,
            iconfont: "mdi".into(),
            icons: BTreeMap::new(),
            messages: BTreeMap::new(),
        }
    }
}

impl Options {
    /// Fills the message and icon tables and derived flags.
    ///
    /// User-supplied entries win over the built-in tables, the locale table wins
    /// over the default-locale table.
    pub fn finalize(mut self) -> Self {
        let mut messages = messages::table(&self.default_locale);
        messages.extend(messages::table(&self.locale));
        messages.extend(std::mem::take(&mut self.messages));
        self.messages = messages;

        let mut icons = icons::set(&self.iconfont);
        icons.extend(std::mem::take(&mut self.icons));
        self.icons = icons;

        if self.delete_read_only { self.hide_read_only = true; }
        self
    }

    /// Lay schema-local `x-options` over these options.
    ///
    /// The evaluation method can be lowered but never raised to
    /// [`EvalMethod::Unrestricted`] from here: only the top-level configuration
    /// may opt into running schema text as script.
    pub fn fold(&self, overrides: &Map<String, Value>) -> Self {
        if overrides.is_empty() { return self.clone(); }

        let Ok(Value::Object(mut base)) = serde_json::to_value(self) else {
            return self.clone();
        };
        for (k, v) in overrides {
            base.insert(k.clone(), v.clone());
        }
        let mut folded = match crate::path_de::from_value_with_path::<Options>(Value::Object(base)) {
            Ok(o) => o,
            Err(error) => {
                tracing::warn!(target: "schemaform::options", %error, "ignoring invalid x-options");
                return self.clone();
            }
        };
        if folded.eval_method == EvalMethod::Unrestricted && self.eval_method != EvalMethod::Unrestricted {
            tracing::warn!(target: "schemaform::options", "x-options cannot enable unrestricted evaluation");
            folded.eval_method = self.eval_method;
        }
        folded.finalize()
    }

    pub fn message(&self, key: &str) -> String {
        self.messages.get(key).cloned().unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_safe() {
        let o = Options::default();
        assert_eq!(o.eval_method, EvalMethod::Path);
        assert_eq!(o.locale, "en");
    }

    #[test]
    fn legacy_method_names_are_accepted() {
        let o: Options = serde_json::from_value(json!({ "evalMethod": "evalExpr" })).unwrap();
        assert_eq!(o.eval_method, EvalMethod::Sandboxed);
        let o: Options = serde_json::from_value(json!({ "evalMethod": "newFunction" })).unwrap();
        assert_eq!(o.eval_method, EvalMethod::Unrestricted);
    }

    #[test]
    fn finalize_merges_tables_and_flags() {
        let mut o = Options { locale: "fr".into(), delete_read_only: true, ..Options::default() };
        o.messages.insert("required".into(), "Obligatoire !".into());
        let o = o.finalize();
        assert!(o.hide_read_only);
        assert_eq!(o.message("required"), "Obligatoire !");
        // falls back to the default locale table for keys fr lacks
        assert!(o.messages.contains_key("noData"));
        assert!(o.icons.contains_key("add"));
    }

    #[test]
    fn fold_applies_overrides() {
        let base = Options::default().finalize();
        let over = json!({ "hideReadOnly": true, "context": { "x": 1 } });
        let folded = base.fold(over.as_object().unwrap());
        assert!(folded.hide_read_only);
        assert_eq!(folded.context, json!({ "x": 1 }));
    }

    #[test]
    fn fold_cannot_escalate_to_unrestricted() {
        let base = Options::default().finalize();
        let over = json!({ "evalMethod": "unrestricted" });
        assert_eq!(base.fold(over.as_object().unwrap()).eval_method, EvalMethod::Path);

        let over = json!({ "evalMethod": "sandboxed" });
        assert_eq!(base.fold(over.as_object().unwrap()).eval_method, EvalMethod::Sandboxed);
    }

    #[test]
    fn fold_ignores_malformed_overrides() {
        let base = Options::default().finalize();
        let over = json!({ "hideReadOnly": "yes please" });
        assert_eq!(base.fold(over.as_object().unwrap()), base);
    }
}
