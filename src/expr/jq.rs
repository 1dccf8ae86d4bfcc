//! Sandboxed expressions: jq filters run by jaq.
//!
//! The expression context is the filter input `.` and each of its keys is also
//! bound as a global variable (`$model`, `$root`, ...). Only the jq standard
//! library is available; there is no I/O.
use anyhow::{anyhow, Result};
use jaq_core::{compile::Undefined, load, Compiler, Ctx, Filter, Native, RcIter};
use jaq_json::Val;
use serde_json::Value;

pub const VARS: [&str; 6] = ["$model", "$value", "$root", "$modelRoot", "$context", "$parent"];

pub type JqFilter = Filter<Native<Val>>;

pub fn compile(filter_src: &str) -> Result<JqFilter> {
    let loader = load::Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = load::Arena::default();
    let program = load::File { code: filter_src, path: () };

    let modules = loader
        .load(&arena, program)
        .map_err(format_parse_errors)?;

    Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .with_global_vars(VARS)
        .compile(modules)
        .map_err(format_undefined_errors)
}

/// First output of the filter. No output and `null` both mean undefined.
pub fn run(filter: &JqFilter, ctx: &Value) -> Result<Option<Value>> {
    let vars = VARS.map(|name| {
        let key = &name[1..];
        Val::from(ctx.get(key).cloned().unwrap_or(Value::Null))
    });
    let inputs = RcIter::new(core::iter::empty());
    let mut it = filter.run((Ctx::new(vars, &inputs), Val::from(ctx.clone())));

    match it.next() {
        None => Ok(None),
        Some(item) => {
            let v = item.map_err(|e| anyhow!(format!("{e:?}")))?;
            match Value::from(v) {
                Value::Null => Ok(None),
                v => Ok(Some(v)),
            }
        }
    }
}

fn format_parse_errors(
    errs: Vec<(load::File<&str, ()>, load::Error<&str>)>,
) -> anyhow::Error {
    let mut s = String::new();
    for (file, err) in errs {
        s.push_str(&format!("parse error: {err:?} in `{}`\n", file.code));
    }
    anyhow!(s)
}

fn format_undefined_errors(
    errs: Vec<(load::File<&str, ()>, Vec<(&str, Undefined)>)>,
) -> anyhow::Error {
    let mut s = String::new();
    for (file, list) in errs {
        for (name, undef) in list {
            s.push_str(&format!("undefined `{name}`: {undef:?} in `{}`\n", file.code));
        }
    }
    anyhow!(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(src: &str, ctx: Value) -> Option<Value> {
        run(&compile(src).unwrap(), &ctx).unwrap()
    }

    #[test]
    fn input_and_variables() {
        let ctx = json!({ "model": { "a": 2 }, "root": { "b": 3 }, "context": { "c": 4 } });
        assert_eq!(eval(".model.a + $root.b", ctx.clone()), Some(json!(5)));
        assert_eq!(eval("$context.c * 2", ctx.clone()), Some(json!(8)));
        assert_eq!(eval("$model.a > 1", ctx), Some(json!(true)));
    }

    #[test]
    fn null_and_empty_are_undefined() {
        assert_eq!(eval(".model.nope", json!({ "model": {} })), None);
        assert_eq!(eval("empty", json!({})), None);
    }

    #[test]
    fn errors_are_reported() {
        assert!(compile(".a +").is_err());
        assert!(compile("$nope").is_err());
        assert!(run(&compile(".a.b").unwrap(), &json!({ "a": 1 })).is_err());
    }

    #[test]
    fn std_functions_are_available() {
        let ctx = json!({ "model": { "tags": ["x", "y"] } });
        assert_eq!(eval("$model.tags | length", ctx), Some(json!(2)));
    }
}
