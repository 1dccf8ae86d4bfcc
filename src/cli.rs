//! Minimal CLI: resolve → prepare → render, plus a one-shot expression evaluator.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;

use schemaform::expr::{Evaluator, ExprContext};
use schemaform::options::{EvalMethod, Options};
use schemaform::path_de;
use schemaform::refs::{self, Substitutions};
use schemaform::services::Services;
use schemaform::tree::FormTree;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// inspect how JSON schemas turn into forms
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// inline `$ref`s and report the broken ones
    Resolve(ResolveOut),
    /// repair a value against a schema and print the result
    Prepare(FormSettings),
    /// print the widget parameters of every visible field
    Render(FormSettings),
    /// evaluate one expression against a model
    Eval(EvalOut),
}

#[derive(Args, Debug, Clone)]
struct ResolveOut {
    /// One or more schema files. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,

    /// locale substituted for `~$locale~` in references
    #[arg(long, default_value = "en")]
    locale: String,

    /// output directory (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct FormSettings {
    /// schema file
    #[arg(long, short)]
    schema: PathBuf,

    /// value file (an empty form if omitted)
    #[arg(long, short)]
    value: Option<PathBuf>,

    /// options file, camelCase keys
    #[arg(long)]
    options: Option<PathBuf>,

    /// overrides the locale of the options file
    #[arg(long)]
    locale: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct EvalOut {
    /// the expression
    expr: String,

    /// path | sandboxed | unrestricted
    #[arg(long, default_value = "path", value_parser = parse_method)]
    method: EvalMethod,

    /// model as inline JSON
    #[arg(long, default_value = "null")]
    model: String,

    /// root model as inline JSON
    #[arg(long)]
    root: Option<String>,

    /// context object as inline JSON
    #[arg(long, default_value = "{}")]
    context: String,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Resolve(target) => target.run(),
            Command::Prepare(target) => {
                let tree = target.build()?;
                println!("{}", serde_json::to_string_pretty(&tree.value())?);
                Ok(())
            }
            Command::Render(target) => {
                let mut tree = target.build()?;
                let params = tree.render();
                println!("{}", serde_json::to_string_pretty(&params)?);
                Ok(())
            }
            Command::Eval(target) => target.run(),
        }
    }
}

impl ResolveOut {
    fn run(&self) -> anyhow::Result<()> {
        let paths = resolve_file_path_patterns(&self.input)?;
        let substitutions = Substitutions::locale(&self.locale, &[]);
        let resolved = paths
            .par_iter()
            .map(|path| -> anyhow::Result<_> {
                let schema = read_json(path)?;
                Ok((path, refs::resolve(&schema, &substitutions)))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        for (path, schema) in resolved {
            for (pointer, message) in refs::broken_refs(&schema) {
                eprintln!(
                    "{} {} at #{}: {}",
                    "broken ref".red().bold(),
                    path.display(),
                    pointer,
                    message.yellow(),
                );
            }
            let src = serde_json::to_string_pretty(&schema)?;
            match self.out.as_ref() {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    let name = path.file_name().context("input path has no file name")?;
                    std::fs::write(dir.join(name), &src)?;
                }
                None => println!("{src}"),
            }
        }
        Ok(())
    }
}

impl FormSettings {
    fn build(&self) -> anyhow::Result<FormTree> {
        let schema = read_json(&self.schema)?;
        let value = self.value.as_deref().map(read_json).transpose()?;
        let mut options = match &self.options {
            Some(path) => {
                let src = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                path_de::from_str_with_path::<Options>(&src)
                    .with_context(|| format!("invalid options in {}", path.display()))?
            }
            None => Options::default(),
        };
        if let Some(locale) = &self.locale {
            options.locale = locale.clone();
        }
        let tree = FormTree::new(schema, value, options, Services::default());
        if !tree.registry().is_empty() {
            tracing::warn!(pending = tree.registry().len(), "async work left unsettled");
        }
        Ok(tree)
    }
}

impl EvalOut {
    fn run(&self) -> anyhow::Result<()> {
        let ctx = ExprContext {
            model: parse_inline(&self.model, "--model")?,
            root: self.root.as_deref().map(|r| parse_inline(r, "--root")).transpose()?.flatten(),
            parent: None,
            context: serde_json::from_str(&self.context).context("invalid --context")?,
        };
        let result = Evaluator::new().try_evaluate(&self.expr, &ctx, self.method)?;
        match result {
            Some(v) => println!("{}", serde_json::to_string_pretty(&v)?),
            None => println!("{}", "undefined".dimmed()),
        }
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn parse_method(s: &str) -> Result<EvalMethod, String> {
    serde_json::from_value(Value::String(s.to_string())).map_err(|e| e.to_string())
}

/// `null` reads as undefined.
fn parse_inline(src: &str, flag: &str) -> anyhow::Result<Option<Value>> {
    let v: Value = serde_json::from_str(src).with_context(|| format!("invalid {flag}"))?;
    Ok((!v.is_null()).then_some(v))
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read source file {}", path.display()))?;
    serde_json::from_str(&src)
        .with_context(|| format!("failed to parse JSON source file {}", path.display()))
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }
    Ok(out)
}
