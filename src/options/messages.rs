//! Built-in message tables used by the default rule provider and the widget
//! layer. `{name}` placeholders are filled from schema keywords.
use std::collections::BTreeMap;

use once_cell::sync::Lazy;

static EN: &[(&str, &str)] = &[
    ("required", "This information is required"),
    ("noData", "No matching value found"),
    ("search", "Search..."),
    ("minimum", "Value must be greater than or equal to {minimum}"),
    ("maximum", "Value must be lower than or equal to {maximum}"),
    ("minLength", "{minLength} characters minimum"),
    ("maxLength", "{maxLength} characters maximum"),
    ("minItems", "No less than {minItems} items"),
    ("maxItems", "No more than {maxItems} items"),
    ("pattern", "The value does not match the expected format"),
    ("addItem", "Add a new item"),
    ("delete", "Delete"),
    ("edit", "Edit"),
    ("close", "Close"),
    ("brokenRef", "This field is misconfigured"),
];

static FR: &[(&str, &str)] = &[
    ("required", "Information obligatoire"),
    ("search", "Rechercher..."),
    ("minimum", "La valeur doit être supérieure ou égale à {minimum}"),
    ("maximum", "La valeur doit être inférieure ou égale à {maximum}"),
    ("minLength", "{minLength} caractères minimum"),
    ("maxLength", "{maxLength} caractères maximum"),
    ("minItems", "Au moins {minItems} éléments"),
    ("maxItems", "Au plus {maxItems} éléments"),
    ("pattern", "La valeur ne correspond pas au format attendu"),
    ("addItem", "Ajouter un élément"),
    ("delete", "Supprimer"),
    ("edit", "Éditer"),
    ("close", "Fermer"),
    ("brokenRef", "Ce champ est mal configuré"),
];

static DE: &[(&str, &str)] = &[
    ("required", "Diese Angabe ist erforderlich"),
    ("noData", "Kein passender Wert gefunden"),
    ("search", "Suchen..."),
    ("minLength", "Mindestens {minLength} Zeichen"),
    ("maxLength", "Höchstens {maxLength} Zeichen"),
    ("pattern", "Der Wert entspricht nicht dem erwarteten Format"),
];

static TABLES: Lazy<BTreeMap<&'static str, BTreeMap<String, String>>> = Lazy::new(|| {
    let build = |entries: &[(&str, &str)]| {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()
    };
    BTreeMap::from([("en", build(EN)), ("fr", build(FR)), ("de", build(DE))])
});

/// Table for `locale`, English when the locale is unknown.
pub fn table(locale: &str) -> BTreeMap<String, String> {
    TABLES.get(locale).or_else(|| TABLES.get("en")).cloned().unwrap_or_default()
}
