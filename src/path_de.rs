use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(located)
}

pub fn from_slice_with_path<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(located)
}

/// Same as above, for values already parsed (schema-local `x-options`).
pub fn from_value_with_path<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(located)
}

fn located<E: std::fmt::Display>(err: serde_path_to_error::Error<E>) -> Error {
    Error::Config {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Outer { inner: Inner }
    #[derive(Debug, Deserialize)]
    struct Inner { flag: bool }

    #[test]
    fn error_carries_json_path() {
        let err = from_str_with_path::<Outer>(r#"{"inner": {"flag": 3}}"#).unwrap_err();
        match err {
            Error::Config { path, .. } => assert_eq!(path, "inner.flag"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn value_form_reports_path_too() {
        let err = from_value_with_path::<Outer>(serde_json::json!({"inner": {}})).unwrap_err();
        assert!(err.to_string().contains("inner"));
    }
}
