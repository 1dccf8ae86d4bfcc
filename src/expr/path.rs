//! Path-getter expressions.
//!
//! A deep property getter (`a.b`, `a[0]`, `a["weird key"]`) that can be
//! combined with a handful of operators:
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | compare
//! compare := operand (("==" | "!=" | "===" | "!==" | "<" | "<=" | ">" | ">=") operand)?
//! operand := literal | path | "(" expr ")"
//! ```
//!
//! Lookups never fail: a missing segment yields undefined (`None`).
use std::borrow::Cow;

use serde_json::Value;

use super::truthy;

#[derive(Debug, Clone, PartialEq)]
pub enum Seg {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathExpr {
    Lit(Value),
    Path(Vec<Seg>),
    Not(Box<PathExpr>),
    And(Box<PathExpr>, Box<PathExpr>),
    Or(Box<PathExpr>, Box<PathExpr>),
    Cmp(CmpOp, Box<PathExpr>, Box<PathExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp { Eq, Ne, Lt, Le, Gt, Ge }

pub const PREFIXES: [&str; 6] = ["context", "model", "value", "modelRoot", "root", "parent"];

// ------------------------------- Parse ----------------------------------- //

pub fn parse(src: &str) -> Result<PathExpr, String> {
    let mut p = Parser { chars: src.chars().collect(), pos: 0 };
    let e = p.or()?;
    p.ws();
    if p.pos < p.chars.len() {
        return Err(format!("unexpected `{}` at {}", p.chars[p.pos], p.pos));
    }
    Ok(e)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) { self.pos += 1; }
    }

    fn eat(&mut self, tok: &str) -> bool {
        self.ws();
        let n = tok.chars().count();
        let matches = self.chars.len() >= self.pos + n
            && self.chars[self.pos..self.pos + n].iter().copied().eq(tok.chars());
        if matches { self.pos += n; }
        matches
    }

    fn or(&mut self) -> Result<PathExpr, String> {
        let mut lhs = self.and()?;
        while self.eat("||") {
            lhs = PathExpr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<PathExpr, String> {
        let mut lhs = self.unary()?;
        while self.eat("&&") {
            lhs = PathExpr::And(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<PathExpr, String> {
        self.ws();
        // `!` but not `!=`
        if self.chars.get(self.pos) == Some(&'!') && self.chars.get(self.pos + 1) != Some(&'=') {
            self.pos += 1;
            return Ok(PathExpr::Not(Box::new(self.unary()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<PathExpr, String> {
        let lhs = self.operand()?;
        // longest tokens first
        let ops = [
            ("===", CmpOp::Eq), ("!==", CmpOp::Ne), ("==", CmpOp::Eq), ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le), (">=", CmpOp::Ge), ("<", CmpOp::Lt), (">", CmpOp::Gt),
        ];
        for (tok, op) in ops {
            if self.eat(tok) {
                let rhs = self.operand()?;
                return Ok(PathExpr::Cmp(op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn operand(&mut self) -> Result<PathExpr, String> {
        self.ws();
        let Some(&c) = self.chars.get(self.pos) else {
            return Err("unexpected end of expression".into());
        };
        match c {
            '(' => {
                self.pos += 1;
                let e = self.or()?;
                if !self.eat(")") { return Err("missing `)`".into()); }
                Ok(e)
            }
            '\'' | '"' => Ok(PathExpr::Lit(Value::String(self.quoted()?))),
            c if c.is_ascii_digit() || c == '-' => self.number(),
            _ => self.path(),
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        let quote = self.chars[self.pos];
        self.pos += 1;
        let mut out = String::new();
        while let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(&n) = self.chars.get(self.pos) { out.push(n); self.pos += 1; }
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err("unterminated string".into())
    }

    fn number(&mut self) -> Result<PathExpr, String> {
        let start = self.pos;
        self.pos += 1;
        while self.chars.get(self.pos).is_some_and(|c| c.is_ascii_digit() || *c == '.') { self.pos += 1; }
        let text: String = self.chars[start..self.pos].iter().collect();
        let n: f64 = text.parse().map_err(|_| format!("bad number `{text}`"))?;
        let v = if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Value::from(n as i64)
        } else {
            serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
        };
        Ok(PathExpr::Lit(v))
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.chars.get(self.pos).is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '$' || *c == '-') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn path(&mut self) -> Result<PathExpr, String> {
        let first = self.ident();
        if first.is_empty() {
            return Err(format!("unexpected `{}` at {}", self.chars[self.pos], self.pos));
        }
        match first.as_str() {
            "true" => return Ok(PathExpr::Lit(Value::Bool(true))),
            "false" => return Ok(PathExpr::Lit(Value::Bool(false))),
            "null" => return Ok(PathExpr::Lit(Value::Null)),
            _ => {}
        }
        let mut segs = vec![seg_of(first)];
        loop {
            match self.chars.get(self.pos) {
                Some('.') => {
                    self.pos += 1;
                    let id = self.ident();
                    if id.is_empty() { return Err(format!("empty path segment at {}", self.pos)); }
                    segs.push(seg_of(id));
                }
                Some('[') => {
                    self.pos += 1;
                    self.ws();
                    let seg = match self.chars.get(self.pos) {
                        Some('\'') | Some('"') => Seg::Key(self.quoted()?),
                        _ => seg_of(self.ident()),
                    };
                    if !self.eat("]") { return Err("missing `]`".into()); }
                    segs.push(seg);
                }
                _ => break,
            }
        }
        Ok(PathExpr::Path(segs))
    }
}

fn seg_of(id: String) -> Seg {
    match id.parse::<usize>() {
        Ok(i) => Seg::Index(i),
        Err(_) => Seg::Key(id),
    }
}

// ------------------------------- Prefix ---------------------------------- //

/// Rewrites unprefixed paths to look into `model` (no root reference) or
/// `root` (nodes below the root).
pub fn prefixed(expr: PathExpr, has_root: bool) -> PathExpr {
    use PathExpr::*;
    match expr {
        Path(mut segs) => {
            let known = matches!(segs.first(), Some(Seg::Key(k)) if PREFIXES.contains(&k.as_str()));
            if !known {
                segs.insert(0, Seg::Key(if has_root { "root" } else { "model" }.into()));
            }
            Path(segs)
        }
        Not(e) => Not(Box::new(prefixed(*e, has_root))),
        And(a, b) => And(Box::new(prefixed(*a, has_root)), Box::new(prefixed(*b, has_root))),
        Or(a, b) => Or(Box::new(prefixed(*a, has_root)), Box::new(prefixed(*b, has_root))),
        Cmp(op, a, b) => Cmp(op, Box::new(prefixed(*a, has_root)), Box::new(prefixed(*b, has_root))),
        lit @ Lit(_) => lit,
    }
}

// ------------------------------- Eval ------------------------------------ //

pub fn get<'a>(ctx: &'a Value, segs: &[Seg]) -> Option<Cow<'a, Value>> {
    let mut cur = Cow::Borrowed(ctx);
    for seg in segs {
        cur = match (seg, cur) {
            (Seg::Key(k), Cow::Borrowed(Value::Object(m))) => Cow::Borrowed(m.get(k)?),
            (Seg::Index(i), Cow::Borrowed(Value::Array(xs))) => Cow::Borrowed(xs.get(*i)?),
            (Seg::Index(i), Cow::Borrowed(Value::Object(m))) => Cow::Borrowed(m.get(&i.to_string())?),
            // `length` of an array is computed, not stored
            (Seg::Key(k), Cow::Borrowed(Value::Array(xs))) if k == "length" => Cow::Owned(Value::from(xs.len())),
            _ => return None,
        };
    }
    Some(cur)
}

pub fn eval(expr: &PathExpr, ctx: &Value) -> Option<Value> {
    match expr {
        PathExpr::Lit(v) => Some(v.clone()),
        PathExpr::Path(segs) => get(ctx, segs).map(Cow::into_owned),
        PathExpr::Not(e) => Some(Value::Bool(!truthy(&eval(e, ctx)))),
        PathExpr::And(a, b) => {
            let l = eval(a, ctx);
            if truthy(&l) { eval(b, ctx) } else { l }
        }
        PathExpr::Or(a, b) => {
            let l = eval(a, ctx);
            if truthy(&l) { l } else { eval(b, ctx) }
        }
        PathExpr::Cmp(op, a, b) => Some(Value::Bool(compare(*op, &eval(a, ctx), &eval(b, ctx)))),
    }
}

fn compare(op: CmpOp, a: &Option<Value>, b: &Option<Value>) -> bool {
    match op {
        CmpOp::Eq => loose_eq(a, b),
        CmpOp::Ne => !loose_eq(a, b),
        _ => {
            let ord = match (a, b) {
                (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64().partial_cmp(&y.as_f64()),
                (Some(Value::String(x)), Some(Value::String(y))) => Some(x.cmp(y)),
                _ => None,
            };
            let Some(ord) = ord else { return false };
            match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            }
        }
    }
}

// numbers compare by value (1 == 1.0)
fn loose_eq(a: &Option<Value>, b: &Option<Value>) -> bool {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(src: &str, has_root: bool, ctx: Value) -> Option<Value> {
        let e = prefixed(parse(src).unwrap(), has_root);
        eval(&e, &ctx)
    }

    #[test]
    fn unprefixed_path_reads_model_without_root() {
        assert_eq!(run("a.b", false, json!({ "model": { "a": { "b": 5 } } })), Some(json!(5)));
    }

    #[test]
    fn unprefixed_path_reads_root_below_root() {
        let ctx = json!({ "model": { "a": 1 }, "root": { "a": 2 } });
        assert_eq!(run("a", true, ctx.clone()), Some(json!(2)));
        assert_eq!(run("model.a", true, ctx), Some(json!(1)));
    }

    #[test]
    fn missing_paths_are_undefined() {
        assert_eq!(run("a.b.c", false, json!({ "model": { "a": 1 } })), None);
        assert_eq!(run("context.x", false, json!({})), None);
    }

    #[test]
    fn brackets_and_indices() {
        let ctx = json!({ "model": { "list": [ { "k y": 3 } ] } });
        assert_eq!(run("list[0]['k y']", false, ctx.clone()), Some(json!(3)));
        assert_eq!(run("list.0[\"k y\"]", false, ctx.clone()), Some(json!(3)));
        assert_eq!(run("list.length", false, ctx), Some(json!(1)));
    }

    #[test]
    fn length_of_long_arrays() {
        let xs: Vec<Value> = (0..2000).map(Value::from).collect();
        let ctx = json!({ "model": { "xs": xs } });
        assert_eq!(run("xs.length", false, ctx.clone()), Some(json!(2000)));
        assert_eq!(run("xs.length > 1500", false, ctx.clone()), Some(json!(true)));
        assert_eq!(run("xs.length.foo", false, ctx), None);
    }

    #[test]
    fn operators() {
        let ctx = json!({ "model": { "kind": "pro", "n": 3, "off": false } });
        assert_eq!(run("kind == 'pro'", false, ctx.clone()), Some(json!(true)));
        assert_eq!(run("kind !== \"pro\"", false, ctx.clone()), Some(json!(false)));
        assert_eq!(run("n >= 3 && !off", false, ctx.clone()), Some(json!(true)));
        assert_eq!(run("missing || n", false, ctx.clone()), Some(json!(3)));
        assert_eq!(run("(n < 2) || (n > 10)", false, ctx), Some(json!(false)));
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(parse("a..b").is_err());
        assert!(parse("a == ").is_err());
        assert!(parse("'open").is_err());
    }
}
