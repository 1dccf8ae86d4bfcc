//! Collaborators the engine calls through narrow contracts.
//!
//! Everything here is explicit and threaded through construction; the engine
//! never looks for a markdown renderer, HTTP client or validator anywhere else.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::rules::{DefaultRules, RuleProvider};

pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, text: &str) -> String;
}

/// Returns the text unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainText;

impl MarkdownRenderer for PlainText {
    fn render(&self, text: &str) -> String { text.to_string() }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value>;
}

/// Compiled validator: `None` when the value is valid, a message otherwise.
pub type Validator = Arc<dyn Fn(&Option<Value>) -> Option<String> + Send + Sync>;

pub trait ValidatorFactory: Send + Sync {
    /// `None` when the schema cannot be compiled; validation is then skipped.
    fn make(&self, schema: &Value) -> Option<Validator>;
}

pub type Formatter = Arc<dyn Fn(&Value, &str) -> String + Send + Sync>;

/// format name → formatter
#[derive(Clone)]
pub struct Formats(HashMap<String, Formatter>);

impl Formats {
    pub fn empty() -> Self { Self(HashMap::new()) }

    pub fn with(mut self, format: impl Into<String>, f: Formatter) -> Self {
        self.0.insert(format.into(), f);
        self
    }

    pub fn get(&self, format: &str) -> Option<&Formatter> { self.0.get(format) }
}

impl Default for Formats {
    /// `date`, `date-time` and `time`. Values that do not parse are shown as-is.
    fn default() -> Self {
        use chrono::{DateTime, NaiveDate, NaiveTime};
        fn text(v: &Value) -> String {
            v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())
        }
        Self::empty()
            .with("date-time", Arc::new(|v: &Value, _locale: &str| {
                let s = text(v);
                DateTime::parse_from_rfc3339(&s)
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or(s)
            }))
            .with("date", Arc::new(|v: &Value, _locale: &str| {
                let s = text(v);
                NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map(|d| d.format("%d %b %Y").to_string())
                    .unwrap_or(s)
            }))
            .with("time", Arc::new(|v: &Value, _locale: &str| {
                let s = text(v);
                let head = s.get(..8).unwrap_or(s.as_str());
                NaiveTime::parse_from_str(head, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(head, "%H:%M"))
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or(s)
            }))
    }
}

impl fmt::Debug for Formats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        f.debug_tuple("Formats").field(&keys).finish()
    }
}

#[derive(Clone)]
pub struct Services {
    pub markdown: Arc<dyn MarkdownRenderer>,
    pub http: Option<Arc<dyn HttpClient>>,
    pub validator: Option<Arc<dyn ValidatorFactory>>,
    pub rules: Arc<dyn RuleProvider>,
    pub formats: Formats,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            markdown: Arc::new(PlainText),
            http: None,
            validator: None,
            rules: Arc::new(DefaultRules),
            formats: Formats::default(),
        }
    }
}

impl Services {
    pub fn with_markdown(mut self, m: impl MarkdownRenderer + 'static) -> Self {
        self.markdown = Arc::new(m);
        self
    }
    pub fn with_http(mut self, h: impl HttpClient + 'static) -> Self {
        self.http = Some(Arc::new(h));
        self
    }
    pub fn with_validator(mut self, v: impl ValidatorFactory + 'static) -> Self {
        self.validator = Some(Arc::new(v));
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("http", &self.http.is_some())
            .field("validator", &self.validator.is_some())
            .field("formats", &self.formats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_formats() {
        let f = Formats::default();
        assert_eq!(f.get("date").unwrap()(&json!("2024-03-01"), "en"), "01 Mar 2024");
        assert_eq!(f.get("date-time").unwrap()(&json!("2024-03-01T10:20:00Z"), "en"), "2024-03-01 10:20");
        assert_eq!(f.get("time").unwrap()(&json!("10:20:30"), "en"), "10:20");
        assert_eq!(f.get("date").unwrap()(&json!("not a date"), "en"), "not a date");
        assert!(f.get("color").is_none());
    }
}
