//! One form field.
//!
//! A [`FormNode`] owns its effective schema, the last value it saw and its
//! children. A sync pass walks the tree top-down: every node receives its
//! slice of the value, repairs it against its effective schema, lets its
//! children do the same, and hands the result back to its parent.
//!
//! ```text
//! Uninitialized ──prepare──▶ SchemaPending ──init/repair──▶ Ready
//!                                  ▲                          │
//!                                  └── new effective schema ──┘
//! ```
use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::expr::{Evaluator, ExprContext};
use crate::kind::{self, Kind, SelectItem};
use crate::options::{EvalMethod, Options};
use crate::rules::{self, Rule};
use crate::schema::{self, is_const_list, FullSchema, Key, NodeInfo};
use crate::services::{Services, Validator};
use crate::settle::{AsyncRegistry, Delivery, Mailbox};
use crate::tree::FormEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    Uninitialized,
    SchemaPending,
    Ready,
}

/// Read-only view of the tree shared by every node during a pass or a render.
pub(crate) struct Env<'a> {
    pub services: &'a Services,
    /// form root value as of the start of the pass
    pub root_value: Option<Value>,
    /// whether the top-level options opted into unrestricted evaluation
    pub unrestricted: bool,
}

pub(crate) struct Pass<'a> {
    pub env: Env<'a>,
    pub registry: &'a AsyncRegistry,
    pub mailbox: &'a Mailbox,
    /// full key → (url, body) responses delivered since the previous pass
    pub fetched: HashMap<String, Vec<(String, Value)>>,
    pub events: Vec<FormEvent>,
}

/// Inputs of the last preparation; preparing again with equal inputs is
/// skipped.
#[derive(Debug, Clone, PartialEq)]
struct Prepared {
    schema: Value,
    options: Options,
    required: bool,
    /// only tracked for schemas whose preparation depends on the value
    value: Option<Option<Value>>,
}

pub struct FormNode {
    info: NodeInfo,
    /// `oneOf`/`anyOf` keyword when this node renders a branch of its parent
    branch: Option<String>,
    state: NodeState,
    schema: Value,
    full: Option<FullSchema>,
    prepared: Option<Prepared>,
    prepare_count: usize,
    value: Option<Value>,
    changed: bool,
    initially_defined: bool,
    touched: bool,
    evaluator: Evaluator,
    markdown: HashMap<String, String>,
    /// branch keyword → fragment contributed by the branch
    sub_models: IndexMap<String, Map<String, Value>>,
    children: Vec<FormNode>,
    branches: Vec<FormNode>,
    rules: Vec<Rule>,
    /// rules for the `oneOf`/`anyOf` selector of an object node
    branch_rules: Vec<Rule>,
    validator: Option<Validator>,
    items: Option<Vec<SelectItem>>,
    fetched_url: Option<String>,
}

impl std::fmt::Debug for FormNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormNode")
            .field("full_key", &self.info.full_key)
            .field("branch", &self.branch)
            .field("state", &self.state)
            .field("value", &self.value)
            .field("children", &self.children)
            .field("branches", &self.branches)
            .finish_non_exhaustive()
    }
}

impl FormNode {
    pub(crate) fn new(info: NodeInfo) -> Self {
        Self {
            info,
            branch: None,
            state: NodeState::Uninitialized,
            schema: Value::Null,
            full: None,
            prepared: None,
            prepare_count: 0,
            value: None,
            changed: false,
            initially_defined: false,
            touched: false,
            evaluator: Evaluator::new(),
            markdown: HashMap::new(),
            sub_models: IndexMap::new(),
            children: Vec::new(),
            branches: Vec::new(),
            rules: Vec::new(),
            branch_rules: Vec::new(),
            validator: None,
            items: None,
            fetched_url: None,
        }
    }

    fn new_branch(info: NodeInfo, keyword: &str) -> Self {
        Self { branch: Some(keyword.to_string()), ..Self::new(info) }
    }

    // ——— ACCESSORS ———

    pub fn info(&self) -> &NodeInfo { &self.info }
    pub fn full_key(&self) -> &str { &self.info.full_key }
    pub fn state(&self) -> NodeState { self.state }
    pub fn full_schema(&self) -> Option<&FullSchema> { self.full.as_ref() }
    pub fn value(&self) -> Option<&Value> { self.value.as_ref() }
    pub fn is_changed(&self) -> bool { self.changed }
    pub fn initially_defined(&self) -> bool { self.initially_defined }
    /// how many times the effective schema was computed
    pub fn prepare_count(&self) -> usize { self.prepare_count }
    pub fn rules(&self) -> &[Rule] { &self.rules }
    pub fn branch_rules(&self) -> &[Rule] { &self.branch_rules }
    pub fn items(&self) -> Option<&[SelectItem]> { self.items.as_deref() }
    pub fn sub_models(&self) -> &IndexMap<String, Map<String, Value>> { &self.sub_models }
    pub fn children(&self) -> &[FormNode] { &self.children }
    pub fn branch_nodes(&self) -> &[FormNode] { &self.branches }

    pub fn kind(&self) -> Kind {
        self.full.as_ref().map(kind::kind_of).unwrap_or(Kind::Unknown)
    }

    /// Validation message for the current value, when a validator exists and
    /// the value was either present from the start or edited since.
    pub fn error(&self) -> Option<String> {
        let v = self.validator.as_ref()?;
        if !(self.initially_defined || self.touched) { return None; }
        v(&self.value)
    }

    // ——— SYNC ———

    pub(crate) fn sync(
        &mut self,
        schema: &Value,
        value: Option<Value>,
        options: &Options,
        parent: Option<&Value>,
        pass: &mut Pass<'_>,
    ) -> Option<Value> {
        let incoming = value.clone();
        self.refresh_schema(schema, value.as_ref(), options);
        let Some(full) = self.full.take() else { return value };

        let mut value = value;
        if self.state != NodeState::Ready {
            value = self.init_from_schema(&full, value, pass.env.services);
            self.state = NodeState::Ready;
        }
        let deleted = full.read_only && full.options.delete_read_only;
        if let (Some(c), false) = (&full.const_, deleted) {
            value = Some(c.clone());
        }
        value = self.sync_children(&full, value, parent, pass);
        value = self.fix_properties(&full, value);
        self.value = value.clone();
        self.refresh_items(&full, parent, pass);
        self.full = Some(full);

        if value != incoming && self.branch.is_none() {
            tracing::debug!(target: "schemaform::node", full_key = %self.info.full_key, "value repaired");
            self.changed = true;
            pass.events.push(FormEvent::InputChild {
                full_key: self.info.full_key.clone(),
                value: value.clone(),
                old_value: incoming,
            });
            if self.info.is_root() {
                pass.events.push(FormEvent::Input { value: value.clone() });
            }
        }
        value
    }

    fn refresh_schema(&mut self, schema: &Value, value: Option<&Value>, options: &Options) {
        let conditional = schema::declares_conditionals(schema);
        let tracked = conditional.then(|| value.cloned());
        if let Some(p) = &self.prepared {
            if p.schema == *schema && p.options == *options && p.required == self.info.required && p.value == tracked {
                return;
            }
        }

        let full = schema::prepare(schema, value, options, &self.info);
        self.prepare_count += 1;
        self.prepared = Some(Prepared {
            schema: schema.clone(),
            options: options.clone(),
            required: self.info.required,
            value: tracked,
        });
        self.schema = schema.clone();

        // equal effective schemas stop here: nothing downstream reruns
        if self.full.as_ref() != Some(&full) {
            self.full = Some(full);
            self.state = NodeState::SchemaPending;
        }
    }

    fn init_from_schema(&mut self, full: &FullSchema, value: Option<Value>, services: &Services) -> Option<Value> {
        self.initially_defined = match (full.type_.as_deref(), &value) {
            (Some("array"), Some(Value::Array(xs))) => !xs.is_empty(),
            (Some("array"), _) => false,
            (Some("object"), Some(Value::Object(m))) => !m.is_empty(),
            (Some("object"), _) => false,
            (_, v) => !matches!(v, None | Some(Value::Null)),
        };

        self.rules = services.rules.rules(&self.schema, full, &full.options, self.info.required, false);
        self.branch_rules = if selects_branch(full) {
            services.rules.rules(&self.schema, full, &full.options, false, true)
        } else {
            Vec::new()
        };
        self.validator = services
            .validator
            .as_ref()
            .and_then(|factory| factory.make(&Value::Object(full.keywords.clone())));

        if full.read_only && full.options.delete_read_only {
            return None;
        }

        let mut value = fix_value_type(value, full);
        if value.is_none() {
            value = full.get("default").cloned();
        }

        let container = full.is_type("object") || full.is_type("array");
        if container && matches!(value, None | Some(Value::Null)) {
            value = full.default_value.clone().filter(|d| !d.is_null());
        }
        // a select-derived object left empty means nothing was selected
        if kind::is_select(full) && matches!(&value, Some(Value::Object(m)) if m.is_empty()) {
            value = None;
        }

        if let Some(Value::Array(xs)) = &mut value {
            if full.is_type("array") { xs.retain(|x| !x.is_null()); }
        }
        nullable(full.nullable, value)
    }

    fn sync_children(
        &mut self,
        full: &FullSchema,
        value: Option<Value>,
        parent: Option<&Value>,
        pass: &mut Pass<'_>,
    ) -> Option<Value> {
        let container = !kind::is_select(full) && full.broken_ref.is_none();
        match (full.type_.as_deref(), value) {
            (Some("object"), Some(Value::Object(obj))) if container => {
                Some(Value::Object(self.sync_object(full, obj, parent, pass)))
            }
            (Some("array"), Some(Value::Array(xs))) if container => {
                Some(Value::Array(self.sync_array(full, xs, pass)))
            }
            (_, value) => {
                self.children.clear();
                self.branches.clear();
                self.sub_models.clear();
                value
            }
        }
    }

    fn sync_object(
        &mut self,
        full: &FullSchema,
        mut obj: Map<String, Value>,
        parent: Option<&Value>,
        pass: &mut Pass<'_>,
    ) -> Map<String, Value> {
        // children see the object as it was when the walk started
        let snapshot = Value::Object(obj.clone());

        let mut previous = std::mem::take(&mut self.children);
        for prop in &full.properties {
            let key = Key::Prop(prop.key.clone());
            let mut child = match previous.iter().position(|c| c.info.key == key) {
                Some(i) => previous.swap_remove(i),
                None => FormNode::new(self.info.child(key, prop.required)),
            };
            child.info.required = prop.required;

            let current = obj.get(&prop.key).cloned();
            let out = child.sync(&prop.schema, current.clone(), &full.options, Some(&snapshot), pass);
            if out != current {
                match out {
                    Some(v) => { obj.insert(prop.key.clone(), v); }
                    None => { obj.remove(&prop.key); }
                }
            }
            self.children.push(child);
        }

        let mut previous = std::mem::take(&mut self.branches);
        let mut live = Vec::new();
        for branch in &full.branches {
            let mut node = match previous.iter().position(|b| b.branch.as_deref() == Some(branch.keyword.as_str())) {
                Some(i) => previous.swap_remove(i),
                None => FormNode::new_branch(self.info.clone(), &branch.keyword),
            };
            let mut branch_schema = branch.schema.as_object().cloned().unwrap_or_default();
            branch_schema.entry("type").or_insert_with(|| Value::String("object".into()));
            let branch_schema = Value::Object(branch_schema);

            let out = node.sync(&branch_schema, Some(Value::Object(obj.clone())), &full.options, parent, pass);
            let fragment: Map<String, Value> = match (out, node.full.as_ref()) {
                (Some(Value::Object(m)), Some(bf)) => m.into_iter().filter(|(k, _)| bf.property(k).is_some()).collect(),
                _ => Map::new(),
            };
            self.sub_models.insert(branch.keyword.clone(), fragment);
            live.push(branch.keyword.clone());
            self.branches.push(node);
        }
        self.sub_models.retain(|k, _| live.contains(k));
        obj
    }

    fn sync_array(&mut self, full: &FullSchema, mut xs: Vec<Value>, pass: &mut Pass<'_>) -> Vec<Value> {
        let snapshot = Value::Array(xs.clone());
        let mut options = full.options.clone();
        if full.read_only { options.read_only_array_item = true; }

        self.branches.clear();
        self.children.truncate(xs.len());
        let mut first_dropped = None;
        for (i, item) in xs.iter_mut().enumerate() {
            let item_schema = match full.items() {
                Some(Value::Array(tuple)) => tuple.get(i).cloned().unwrap_or_else(|| full.get("additionalItems").cloned().unwrap_or(Value::Bool(true))),
                Some(s) => s.clone(),
                None => Value::Object(Map::new()),
            };
            if self.children.len() <= i {
                self.children.push(FormNode::new(self.info.child(Key::Index(i), false)));
            }
            let current = Some(item.clone());
            let out = self.children[i].sync(&item_schema, current.clone(), &options, Some(&snapshot), pass);
            if out != current {
                *item = out.unwrap_or(Value::Null);
            }
            if item.is_null() && first_dropped.is_none() {
                first_dropped = Some(i);
            }
        }
        // items after a hole shift down; their nodes start over
        if let Some(i) = first_dropped {
            xs.retain(|x| !x.is_null());
            self.children.truncate(i);
        }
        xs
    }

    /// Strip undeclared keys when the schema is closed, then lay the branch
    /// fragments over the object. Keys the schema pins with `const` are never
    /// taken from a fragment.
    fn fix_properties(&self, full: &FullSchema, value: Option<Value>) -> Option<Value> {
        if !full.is_type("object") { return value; }
        let Some(Value::Object(mut obj)) = value else { return value };

        let computed = full.get("x-fromData").is_some() || full.get("x-fromUrl").is_some();
        if full.properties.is_empty() && (self.sub_models.is_empty() || computed) {
            return Some(Value::Object(obj));
        }

        if full.options.remove_additional_properties || full.closed() {
            let branch_keys: Vec<&String> = self.sub_models.values().flat_map(|f| f.keys()).collect();
            obj.retain(|k, _| full.property(k).is_some() || branch_keys.contains(&k));
        }

        for fragment in self.sub_models.values() {
            for (k, v) in fragment {
                if full.property(k).is_some_and(|p| p.schema.get("const").is_some()) { continue; }
                if obj.get(k) != Some(v) {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        Some(Value::Object(obj))
    }

    // ——— SELECT ITEMS ———

    fn refresh_items(&mut self, full: &FullSchema, parent: Option<&Value>, pass: &mut Pass<'_>) {
        if !kind::is_select(full) {
            self.items = None;
            self.fetched_url = None;
            return;
        }
        let mut items = kind::static_items(full);

        if let Some(expr) = full.x_str("x-fromData") {
            let data = self.evaluate(expr, full, parent, &pass.env);
            items = Some(data.map(|d| kind::items_from_data(full, &d)).unwrap_or_default());
        }

        if let Some(template) = full.x_str("x-fromUrl") {
            match self.fill_url(template, full, parent, &pass.env) {
                Some(url) => {
                    if self.fetched_url.as_deref() != Some(url.as_str()) {
                        self.fetch(&url, pass);
                        self.fetched_url = Some(url.clone());
                        self.items = None;
                    }
                    // responses for an outdated url are dropped
                    let fresh = pass
                        .fetched
                        .remove(&self.info.full_key)
                        .and_then(|bodies| bodies.into_iter().rev().find(|(u, _)| *u == url));
                    if let Some((_, body)) = fresh {
                        self.items = Some(kind::items_from_data(full, &body));
                    }
                    items = self.items.take();
                }
                None => {
                    self.fetched_url = None;
                    items = Some(Vec::new());
                }
            }
        }

        // the current value stays selectable even before items arrive
        let mut items = items.unwrap_or_default();
        if let Some(v) = &self.value {
            let single = !full.is_type("array") && !v.is_null();
            if single && !items.iter().any(|i| &i.value == v) {
                let title = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                items.push(SelectItem { value: v.clone(), title });
            }
        }
        self.items = Some(items);
    }

    /// Replace `{expr}` placeholders; `None` when one of them is undefined.
    fn fill_url(&mut self, template: &str, full: &FullSchema, parent: Option<&Value>, env: &Env<'_>) -> Option<String> {
        static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("static regex"));
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else { continue };
            let v = self.evaluate(expr.as_str(), full, parent, env)?;
            out.push_str(&template[last..whole.start()]);
            match v {
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Some(out)
    }

    fn fetch(&self, url: &str, pass: &Pass<'_>) {
        let Some(http) = pass.env.services.http.clone() else {
            tracing::warn!(target: "schemaform::node", url, "x-fromUrl without an HTTP client");
            return;
        };
        let mailbox = pass.mailbox.clone();
        let full_key = self.info.full_key.clone();
        let url = url.to_string();
        pass.registry.register(&self.info.full_key, async move {
            match http.get_json(&url).await {
                Ok(body) => mailbox.push(Delivery::Fetched { full_key, url, body }),
                Err(error) => tracing::warn!(target: "schemaform::node", %error, url = %url, "fetching select items failed"),
            }
        });
    }

    // ——— EXPRESSIONS ———

    fn method(full: &FullSchema, env: &Env<'_>) -> EvalMethod {
        match full.options.eval_method {
            EvalMethod::Unrestricted if !env.unrestricted => EvalMethod::Path,
            m => m,
        }
    }

    fn context(&self, full: &FullSchema, parent: Option<&Value>, env: &Env<'_>) -> ExprContext {
        ExprContext {
            model: self.value.clone(),
            root: if self.info.is_root() { None } else { env.root_value.clone() },
            parent: parent.cloned(),
            context: full.options.context.clone(),
        }
    }

    fn evaluate(&mut self, expr: &str, full: &FullSchema, parent: Option<&Value>, env: &Env<'_>) -> Option<Value> {
        let ctx = self.context(full, parent, env);
        self.evaluator.evaluate(expr, &ctx, Self::method(full, env))
    }

    fn markdown(&mut self, text: &str, services: &Services) -> String {
        self.markdown
            .entry(text.to_string())
            .or_insert_with(|| services.markdown.render(text))
            .clone()
    }

    // ——— RENDER ———

    pub(crate) fn render(&mut self, parent: Option<&Value>, depth: usize, env: &Env<'_>, out: &mut Vec<WidgetParams>) {
        let Some(full) = self.full.take() else { return };
        let visible = {
            let value = self.value.clone();
            let ctx = self.context(&full, parent, env);
            let method = Self::method(&full, env);
            should_render(Some(&full), value.as_ref(), |e| self.evaluator.truthy(e, &ctx, method))
        };
        if visible {
            if self.branch.is_none() {
                let params = self.widget_params(&full, depth, env);
                out.push(params);
            }
            let own = self.value.clone();
            let depth = if self.branch.is_some() { depth } else { depth + 1 };
            for child in self.children.iter_mut().chain(self.branches.iter_mut()) {
                child.render(own.as_ref(), depth, env, out);
            }
        }
        self.full = Some(full);
    }

    fn widget_params(&mut self, full: &FullSchema, depth: usize, env: &Env<'_>) -> WidgetParams {
        let services = env.services;
        let o = &full.options;
        let read_only = full.read_only || o.read_only_array_item;
        let dash = self.info.dash_key();

        let class = format!(
            "sf-property sf-property-{dash} {} {}",
            full.layout.class.as_deref().unwrap_or(""),
            if read_only { "read-only" } else { "" },
        )
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

        let mut field_props = if read_only { o.read_only_field_props.clone() } else { Map::new() };
        field_props.extend(o.field_props.clone());
        field_props.extend(full.layout.props.clone());

        let description_html = full.description().map(str::to_string).map(|d| self.markdown(&d, services));
        let mut slots = Map::new();
        for (name, text) in &full.layout.slots {
            let html = match text {
                Value::String(s) => self.markdown(s, services),
                other => other.to_string(),
            };
            slots.insert(name.clone(), Value::String(html));
        }

        let branch_selects = BRANCH_KEYWORDS
            .iter()
            .filter(|k| full.is_type("object") && is_branch_list(full.get(k)))
            .map(|k| {
                let alts = full.get(k).and_then(Value::as_array).cloned().unwrap_or_default();
                let selected = full.branches.iter().find(|b| b.keyword == *k).map(|b| b.index);
                BranchSelect {
                    keyword: k.to_string(),
                    selected,
                    error: rules::check(&self.branch_rules, &selected.map(Value::from)),
                    titles: alts
                        .iter()
                        .enumerate()
                        .map(|(i, a)| a.get("title").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| format!("{}", i + 1)))
                        .collect(),
                }
            })
            .collect();

        WidgetParams {
            key: self.info.key.clone(),
            full_key: self.info.full_key.clone(),
            depth,
            value: self.value.clone(),
            widget_value: kind::widget_value(full, self.value.as_ref()),
            schema: self.schema.clone(),
            kind: kind::kind_of(full),
            widget: kind::widget_of(full),
            label: full.label.clone(),
            disabled: full.disabled,
            required: full.required,
            rules: self.rules.clone(),
            options: o.clone(),
            description_html,
            id: format!("{}{dash}", o.id_prefix),
            class,
            style: full.layout.style.clone(),
            col_props: full.layout.cols.clone(),
            field_props,
            slot_name: full.slot_name.clone(),
            slots,
            formatted_value: schema::formatted_value(full, self.value.as_ref(), services),
            items: self.items.clone(),
            branch_selects,
            broken_ref: full.broken_ref.clone(),
            error: self.error(),
            full_schema: full.clone(),
        }
    }

    // ——— LOOKUP ———

    pub(crate) fn find(&self, full_key: &str) -> Option<&FormNode> {
        if self.branch.is_none() && self.info.full_key == full_key {
            return Some(self);
        }
        self.children
            .iter()
            .chain(self.branches.iter())
            .filter(|c| c.branch.is_some() || covers(&c.info.full_key, full_key))
            .find_map(|c| c.find(full_key))
    }

    pub(crate) fn find_mut(&mut self, full_key: &str) -> Option<&mut FormNode> {
        if self.branch.is_none() && self.info.full_key == full_key {
            return Some(self);
        }
        self.children
            .iter_mut()
            .chain(self.branches.iter_mut())
            .filter(|c| c.branch.is_some() || covers(&c.info.full_key, full_key))
            .find_map(|c| c.find_mut(full_key))
    }

    pub(crate) fn mark_changed(&mut self) {
        self.changed = true;
        self.touched = true;
    }

    pub(crate) fn any_changed(&self) -> bool {
        self.changed || self.children.iter().chain(self.branches.iter()).any(FormNode::any_changed)
    }

    /// Clear dirty flags, collecting `(full_key, value)` of every dirty node.
    pub(crate) fn take_changed(&mut self, out: &mut Vec<(String, Option<Value>)>) {
        if self.changed && self.branch.is_none() {
            self.touched = true;
            out.push((self.info.full_key.clone(), self.value.clone()));
        }
        self.changed = false;
        for c in self.children.iter_mut().chain(self.branches.iter_mut()) {
            c.take_changed(out);
        }
    }

    /// Send every initialized node back through init/repair on the next pass.
    pub(crate) fn reset(&mut self) {
        if self.state == NodeState::Ready {
            self.state = NodeState::SchemaPending;
        }
        for c in self.children.iter_mut().chain(self.branches.iter_mut()) {
            c.reset();
        }
    }

    pub(crate) fn clear_changed(&mut self) {
        self.changed = false;
        for c in self.children.iter_mut().chain(self.branches.iter_mut()) {
            c.clear_changed();
        }
    }
}

const BRANCH_KEYWORDS: [&str; 2] = ["oneOf", "anyOf"];

fn is_branch_list(v: Option<&Value>) -> bool {
    v.is_some_and(Value::is_array) && !is_const_list(v)
}

/// Whether an object node lets the user pick among `oneOf`/`anyOf` alternatives.
fn selects_branch(full: &FullSchema) -> bool {
    full.is_type("object") && BRANCH_KEYWORDS.iter().any(|k| is_branch_list(full.get(k)))
}

/// Whether the node at `node_key` is `target` or one of its ancestors.
fn covers(node_key: &str, target: &str) -> bool {
    node_key == schema::ROOT_KEY
        || target == node_key
        || target.strip_prefix(node_key).is_some_and(|rest| rest.starts_with('.'))
}

/// A value whose JSON type contradicts the schema type is dropped.
pub fn fix_value_type(value: Option<Value>, full: &FullSchema) -> Option<Value> {
    let v = match value {
        None | Some(Value::Null) => return value,
        Some(v) => v,
    };
    let ok = match full.type_.as_deref() {
        Some("string") => v.is_string(),
        Some("integer" | "number") => v.is_number(),
        Some("boolean") => v.is_boolean(),
        Some("array") => v.is_array(),
        Some("object") => v.is_object(),
        _ => true,
    };
    ok.then_some(v)
}

/// Null and undefined collapse to `null` on nullable nodes, to undefined
/// otherwise.
pub fn nullable(is_nullable: bool, value: Option<Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) if is_nullable => Some(Value::Null),
        None | Some(Value::Null) => None,
        v => v,
    }
}

/// Whether a node is handed to the widget layer at all.
pub fn should_render(full: Option<&FullSchema>, value: Option<&Value>, mut visible_if: impl FnMut(&str) -> bool) -> bool {
    let Some(full) = full else { return false };
    let o = &full.options;
    if full.const_.is_some() { return false; }
    if full.display.as_deref() == Some("hidden") { return false; }
    if full.read_only && o.hide_read_only { return false; }
    if o.read_only_array_item && o.hide_in_array_item { return false; }
    let empty = match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    };
    if (full.read_only || o.read_only_array_item) && o.hide_read_only_empty && empty { return false; }
    if let Some(e) = &full.visible_if {
        if !visible_if(e) { return false; }
    }
    true
}

// ——— WIDGET PARAMS ———

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchSelect {
    pub keyword: String,
    pub selected: Option<usize>,
    pub titles: Vec<String>,
    /// message of the first failing selector rule
    pub error: Option<String>,
}

/// Everything a widget needs to draw one visible node.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetParams {
    pub key: Key,
    pub full_key: String,
    pub depth: usize,
    pub value: Option<Value>,
    /// value as the widget shows it (separator-joined strings come split)
    pub widget_value: Option<Value>,
    pub schema: Value,
    pub full_schema: FullSchema,
    pub kind: Kind,
    pub widget: &'static str,
    pub label: String,
    pub disabled: bool,
    pub required: bool,
    #[serde(skip)]
    pub rules: Vec<Rule>,
    #[serde(skip)]
    pub options: Options,
    pub description_html: Option<String>,
    pub id: String,
    pub class: String,
    pub style: Option<Value>,
    pub col_props: Map<String, Value>,
    pub field_props: Map<String, Value>,
    pub slot_name: String,
    pub slots: Map<String, Value>,
    pub formatted_value: Option<String>,
    pub items: Option<Vec<SelectItem>>,
    pub branch_selects: Vec<BranchSelect>,
    pub broken_ref: Option<String>,
    pub error: Option<String>,
}

impl std::fmt::Debug for WidgetParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetParams")
            .field("full_key", &self.full_key)
            .field("widget", &self.widget)
            .field("value", &self.value)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full(schema: Value) -> FullSchema {
        schema::prepare(&schema, None, &Options::default().finalize(), &NodeInfo::root())
    }

    fn full_with(schema: Value, options: Options) -> FullSchema {
        schema::prepare(&schema, None, &options.finalize(), &NodeInfo::root())
    }

    #[test]
    fn nullability() {
        assert_eq!(nullable(true, None), Some(Value::Null));
        assert_eq!(nullable(false, Some(Value::Null)), None);
        assert_eq!(nullable(false, Some(json!(0))), Some(json!(0)));
    }

    #[test]
    fn type_mismatches_are_dropped() {
        let f = full(json!({ "type": "string" }));
        assert_eq!(fix_value_type(Some(json!(3)), &f), None);
        assert_eq!(fix_value_type(Some(json!("3")), &f), Some(json!("3")));
        assert_eq!(fix_value_type(Some(Value::Null), &f), Some(Value::Null));
        let f = full(json!({ "type": "object" }));
        assert_eq!(fix_value_type(Some(json!([])), &f), None);
    }

    #[test]
    fn render_eligibility() {
        let always = |_: &str| true;
        assert!(!should_render(None, None, always));
        assert!(!should_render(Some(&full(json!({ "const": 1 }))), None, always));
        assert!(!should_render(Some(&full(json!({ "type": "string", "x-display": "hidden" }))), None, always));
        assert!(should_render(Some(&full(json!({ "type": "string" }))), None, always));

        let ro = json!({ "type": "string", "readOnly": true });
        assert!(!should_render(Some(&full_with(ro.clone(), Options { hide_read_only: true, ..Options::default() })), None, always));
        let hide_empty = Options { hide_read_only_empty: true, ..Options::default() };
        assert!(!should_render(Some(&full_with(ro.clone(), hide_empty.clone())), Some(&json!("")), always));
        assert!(should_render(Some(&full_with(ro, hide_empty)), Some(&json!("x")), always));

        let item = Options { read_only_array_item: true, hide_in_array_item: true, ..Options::default() };
        assert!(!should_render(Some(&full_with(json!({ "type": "string" }), item)), None, always));
    }

    #[test]
    fn visibility_expression_is_consulted() {
        let f = full(json!({ "type": "string", "x-if": "show" }));
        let mut seen = Vec::new();
        assert!(!should_render(Some(&f), None, |e| { seen.push(e.to_string()); false }));
        assert_eq!(seen, ["show"]);
        assert!(should_render(Some(&f), None, |_| true));
    }

    #[test]
    fn ancestor_keys() {
        assert!(covers("root", "a.b"));
        assert!(covers("a", "a.b"));
        assert!(covers("a.b", "a.b"));
        assert!(!covers("a", "ab"));
        assert!(!covers("a.b", "a"));
    }
}
