//! Unrestricted expressions: Rhai scripts with the context keys in scope.
use once_cell::sync::Lazy;
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;

static ENGINE: Lazy<Engine> = Lazy::new(|| {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);
    engine
});

pub fn compile(src: &str) -> Result<AST, String> {
    ENGINE.compile_expression(src).map_err(|e| e.to_string())
}

pub fn run(ast: &AST, ctx: &Value) -> Result<Option<Value>, String> {
    let mut scope = Scope::new();
    if let Value::Object(map) = ctx {
        for (k, v) in map {
            let d = rhai::serde::to_dynamic(v).map_err(|e| e.to_string())?;
            scope.push_dynamic(k.as_str(), d);
        }
    }
    let out: Dynamic = ENGINE.eval_ast_with_scope(&mut scope, ast).map_err(|e| e.to_string())?;
    if out.is_unit() {
        return Ok(None);
    }
    let v: Value = rhai::serde::from_dynamic(&out).map_err(|e| e.to_string())?;
    Ok(Some(v))
}
