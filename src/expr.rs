//! Expression evaluation.
//!
//! Schemas carry small expressions (`x-if`, `x-fromData`, URL placeholders).
//! They are evaluated against an [`ExprContext`] by one of three strategies,
//! picked by [`EvalMethod`]. Evaluation is total: any failure is logged and
//! yields undefined.
pub mod jq;
pub mod path;
#[cfg(feature = "unrestricted-eval")]
pub mod script;

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::options::EvalMethod;

/// Values an expression can see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExprContext {
    pub model: Option<Value>,
    /// form root value; `None` on the root node itself
    pub root: Option<Value>,
    pub parent: Option<Value>,
    pub context: Value,
}

impl ExprContext {
    pub fn to_json(&self) -> Value {
        let mut m = Map::new();
        if let Some(model) = &self.model {
            m.insert("model".into(), model.clone());
            m.insert("value".into(), model.clone());
        }
        // the root node sees itself as root
        if let Some(root) = self.root.as_ref().or(self.model.as_ref()) {
            m.insert("root".into(), root.clone());
            m.insert("modelRoot".into(), root.clone());
        }
        match &self.parent {
            Some(p) => m.insert("parent".into(), json!({ "value": p })),
            None => m.insert("parent".into(), json!({})),
        };
        m.insert("context".into(), self.context.clone());
        Value::Object(m)
    }
}

enum Compiled {
    Path(path::PathExpr),
    Jq(Box<jq::JqFilter>),
    #[cfg(feature = "unrestricted-eval")]
    Script(Box<rhai::AST>),
    /// compile error, kept so the expression is not compiled again
    Invalid(String),
}

/// Per-node evaluator with a compiled-expression cache.
#[derive(Default)]
pub struct Evaluator {
    cache: HashMap<(EvalMethod, bool, String), Compiled>,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator").field("cached", &self.cache.len()).finish()
    }
}

impl Evaluator {
    pub fn new() -> Self { Self::default() }

    pub fn cached(&self) -> usize { self.cache.len() }

    pub fn evaluate(&mut self, expr: &str, ctx: &ExprContext, method: EvalMethod) -> Option<Value> {
        match self.try_evaluate(expr, ctx, method) {
            Ok(v) => {
                tracing::debug!(target: "schemaform::expr", expr, ?method, result = ?v, "evaluated");
                v
            }
            Err(error) => {
                tracing::debug!(target: "schemaform::expr", %error, ?method, "evaluation failed");
                None
            }
        }
    }

    /// Like [`Evaluator::evaluate`] but reports compile and runtime failures.
    pub fn try_evaluate(&mut self, expr: &str, ctx: &ExprContext, method: EvalMethod) -> Result<Option<Value>> {
        let has_root = ctx.root.is_some();
        let compiled = self
            .cache
            .entry((method, has_root, expr.to_string()))
            .or_insert_with(|| compile(expr, method, has_root));

        let input = ctx.to_json();
        match compiled {
            Compiled::Path(e) => Ok(path::eval(e, &input)),
            Compiled::Jq(f) => jq::run(f, &input).map_err(|e| Error::expr(expr, e)),
            #[cfg(feature = "unrestricted-eval")]
            Compiled::Script(ast) => script::run(ast, &input).map_err(|e| Error::expr(expr, e)),
            Compiled::Invalid(message) => Err(Error::expr(expr, message)),
        }
    }

    pub fn truthy(&mut self, expr: &str, ctx: &ExprContext, method: EvalMethod) -> bool {
        truthy(&self.evaluate(expr, ctx, method))
    }
}

fn compile(expr: &str, method: EvalMethod, has_root: bool) -> Compiled {
    let compiled = match method {
        EvalMethod::Path => path::parse(expr).map(|e| Compiled::Path(path::prefixed(e, has_root))),
        EvalMethod::Sandboxed => jq::compile(expr).map(|f| Compiled::Jq(Box::new(f))).map_err(|e| e.to_string()),
        #[cfg(feature = "unrestricted-eval")]
        EvalMethod::Unrestricted => script::compile(expr).map(|a| Compiled::Script(Box::new(a))),
        #[cfg(not(feature = "unrestricted-eval"))]
        EvalMethod::Unrestricted => Err("unrestricted evaluation is not compiled in".to_string()),
    };
    compiled.unwrap_or_else(Compiled::Invalid)
}

/// undefined, `null`, `false`, `0` and `""` are falsy.
pub fn truthy(v: &Option<Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(model: Value) -> ExprContext {
        ExprContext { model: Some(model), context: json!({ "flag": true }), ..Default::default() }
    }

    #[test]
    fn path_is_the_default_strategy() {
        let mut ev = Evaluator::new();
        let c = ctx(json!({ "a": { "b": 5 } }));
        assert_eq!(ev.evaluate("a.b", &c, EvalMethod::default()), Some(json!(5)));
        assert_eq!(ev.evaluate("a.x.y", &c, EvalMethod::default()), None);
        assert!(ev.truthy("context.flag", &c, EvalMethod::Path));
    }

    #[test]
    fn below_root_unprefixed_paths_read_the_root() {
        let mut ev = Evaluator::new();
        let c = ExprContext {
            model: Some(json!("child")),
            root: Some(json!({ "kind": "pro" })),
            parent: Some(json!({ "x": 1 })),
            context: json!({}),
        };
        assert_eq!(ev.evaluate("kind", &c, EvalMethod::Path), Some(json!("pro")));
        assert_eq!(ev.evaluate("model", &c, EvalMethod::Path), Some(json!("child")));
        assert_eq!(ev.evaluate("parent.value.x", &c, EvalMethod::Path), Some(json!(1)));
    }

    #[test]
    fn sandboxed_strategy() {
        let mut ev = Evaluator::new();
        let c = ctx(json!({ "n": 2 }));
        assert_eq!(ev.evaluate("$model.n * 10", &c, EvalMethod::Sandboxed), Some(json!(20)));
        assert_eq!(ev.evaluate("$model.n +", &c, EvalMethod::Sandboxed), None);
    }

    #[cfg(not(feature = "unrestricted-eval"))]
    #[test]
    fn unrestricted_without_feature_is_undefined() {
        let mut ev = Evaluator::new();
        assert_eq!(ev.evaluate("1 + 1", &ctx(json!({})), EvalMethod::Unrestricted), None);
    }

    #[test]
    fn compiled_expressions_are_memoized() {
        let mut ev = Evaluator::new();
        let c = ctx(json!({ "a": 1 }));
        ev.evaluate("a", &c, EvalMethod::Path);
        ev.evaluate("a", &ctx(json!({ "a": 2 })), EvalMethod::Path);
        assert_eq!(ev.cached(), 1);
        ev.evaluate("a", &c, EvalMethod::Sandboxed);
        assert_eq!(ev.cached(), 2);
    }

    #[test]
    fn failures_surface_through_try_evaluate() {
        let mut ev = Evaluator::new();
        let err = ev.try_evaluate("a ==", &ctx(json!({})), EvalMethod::Path).unwrap_err();
        assert!(matches!(err, Error::Expr { .. }));
        assert_eq!(ev.try_evaluate("nope", &ctx(json!({})), EvalMethod::Path).unwrap(), None);
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&None));
        assert!(!truthy(&Some(json!(null))));
        assert!(!truthy(&Some(json!(0))));
        assert!(!truthy(&Some(json!(""))));
        assert!(!truthy(&Some(json!(false))));
        assert!(truthy(&Some(json!([]))));
        assert!(truthy(&Some(json!("0"))));
    }
}
