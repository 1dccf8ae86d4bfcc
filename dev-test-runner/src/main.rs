//! Runs the JSON fixtures under `fixtures/` against the form engine.
//!
//! Each fixture builds a form, applies its inputs in order, settles, and
//! compares the final value (and optionally the rendered field keys).
//!
//! ```text
//! cargo run -p dev-test-runner -- [FILTER_REGEX]
//! ```
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use schemaform::{FormTree, Options, Services};

static FIXTURE_DIR: Lazy<PathBuf> = Lazy::new(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures"));

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    name: String,
    schema: Value,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    options: Option<Options>,
    /// `[full_key, value]` pairs; `null` clears the field
    #[serde(default)]
    inputs: Vec<(String, Option<Value>)>,
    expect: Value,
    /// full keys of the rendered fields, in order
    #[serde(default)]
    rendered: Option<Vec<String>>,
}

fn load(path: &Path) -> Result<Fixture, String> {
    let src = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let de = &mut serde_json::Deserializer::from_str(&src);
    serde_path_to_error::deserialize(de).map_err(|e| format!("{}: at {}: {}", path.display(), e.path(), e.inner()))
}

async fn run(fixture: Fixture) -> Result<(), String> {
    let options = fixture.options.unwrap_or_default();
    let mut tree = FormTree::new(fixture.schema, fixture.value, options, Services::default());
    for (key, value) in fixture.inputs {
        tree.input(&key, value);
        tree.change().await;
    }
    let got = tree.value().cloned().unwrap_or(Value::Null);
    if got != fixture.expect {
        return Err(format!("value\n  expected {}\n  got      {}", fixture.expect, got));
    }
    if let Some(expected) = fixture.rendered {
        let got: Vec<String> = tree.render().into_iter().map(|p| p.full_key).collect();
        if got != expected {
            return Err(format!("rendered\n  expected {expected:?}\n  got      {got:?}"));
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let filter = match std::env::args().nth(1).map(|f| Regex::new(&f)).transpose() {
        Ok(f) => f,
        Err(error) => {
            eprintln!("invalid filter: {error}");
            return ExitCode::FAILURE;
        }
    };

    let mut paths: Vec<PathBuf> = match std::fs::read_dir(&*FIXTURE_DIR) {
        Ok(rd) => rd.filter_map(|e| e.ok().map(|e| e.path())).filter(|p| p.extension().is_some_and(|x| x == "json")).collect(),
        Err(error) => {
            eprintln!("cannot read {}: {error}", FIXTURE_DIR.display());
            return ExitCode::FAILURE;
        }
    };
    paths.sort();

    let (mut passed, mut failed) = (0, 0);
    for path in paths {
        let fixture = match load(&path) {
            Ok(f) => f,
            Err(error) => {
                eprintln!("❌ {error}");
                failed += 1;
                continue;
            }
        };
        if filter.as_ref().is_some_and(|re| !re.is_match(&fixture.name)) { continue; }
        let name = fixture.name.clone();
        match run(fixture).await {
            Ok(()) => {
                eprintln!("✅ {name}");
                passed += 1;
            }
            Err(error) => {
                eprintln!("❌ {name}: {error}");
                failed += 1;
            }
        }
    }
    eprintln!("—— {passed} passed, {failed} failed ——");
    if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
