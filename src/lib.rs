//! JSON-Schema driven form engine.
//!
//! A schema and a value go in; a tree of form nodes comes out that keeps the
//! value consistent with the schema as both change, and describes what each
//! widget should show.
//!
//! - [`refs`] inlines `$ref`s, with locale substitution.
//! - [`expr`] evaluates the small expressions schemas carry.
//! - [`schema`] computes a node's effective schema for its current value.
//! - [`tree`] owns the node tree, syncs it and reports changes.
pub mod error;
pub mod expr;
pub mod kind;
pub mod node;
pub mod options;
pub mod path_de;
pub mod refs;
pub mod rules;
pub mod schema;
pub mod services;
pub mod settle;
pub mod tree;

pub use error::{Error, Result};
pub use expr::{Evaluator, ExprContext};
pub use node::{FormNode, NodeState, WidgetParams};
pub use options::{EvalMethod, Options};
pub use schema::FullSchema;
pub use services::Services;
pub use tree::{FormEvent, FormTree, SyncReport};
