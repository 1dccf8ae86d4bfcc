use std::collections::BTreeMap;

use once_cell::sync::Lazy;

static MDI: &[(&str, &str)] = &[
    ("calendar", "mdi-calendar"),
    ("clock", "mdi-clock"),
    ("info", "mdi-information"),
    ("add", "mdi-plus"),
    ("edit", "mdi-pencil"),
    ("delete", "mdi-delete"),
    ("close", "mdi-close"),
    ("sort", "mdi-arrow-up-down"),
    ("file", "mdi-paperclip"),
    ("color", "mdi-palette"),
];

static FA: &[(&str, &str)] = &[
    ("calendar", "fas fa-calendar"),
    ("clock", "fas fa-clock"),
    ("info", "fas fa-info-circle"),
    ("add", "fas fa-plus"),
    ("edit", "fas fa-pen"),
    ("delete", "fas fa-trash"),
    ("close", "fas fa-times"),
    ("sort", "fas fa-sort"),
    ("file", "fas fa-paperclip"),
    ("color", "fas fa-palette"),
];

static SETS: Lazy<BTreeMap<&'static str, &'static [(&'static str, &'static str)]>> =
    Lazy::new(|| BTreeMap::from([("mdi", MDI), ("fa", FA)]));

/// Icon names for an icon font, mdi when the font is unknown.
pub fn set(iconfont: &str) -> BTreeMap<String, String> {
    let entries = SETS.get(iconfont).copied().unwrap_or(MDI);
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
