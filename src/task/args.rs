use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced when reading an argument out of [`Args`].
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("missing positional argument {index}")]
    MissingPositional { index: usize },

    #[error("missing keyword argument `{name}`")]
    MissingKeyword { name: String },

    #[error("argument `{name}` could not be serialized: {reason}")]
    Unserializable { name: String, reason: String },

    #[error("argument `{name}` has the wrong type: {source}")]
    Invalid {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Opaque positional and keyword arguments handed to a worker function.
///
/// Values are stored as JSON and deserialized on access, so a function can pull
/// out whatever concrete type it expects.
///
/// # Examples
///
/// ```rust
/// use relay::task::Args;
///
/// let args = Args::new().arg(5).kwarg("y", 10);
/// let x: i64 = args.get(0).unwrap();
/// let y: i64 = args.get_kw("y").unwrap();
/// assert_eq!(x + y, 15);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    keyword: Map<String, Value>,
    // Serialization errors of arguments, reported when the argument is read.
    rejected_positional: BTreeMap<usize, String>,
    rejected_keyword: BTreeMap<String, String>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    ///
    /// A value that cannot be represented as JSON (e.g. a map with non-string
    /// keys) still takes its position; reading it returns
    /// [`ArgsError::Unserializable`].
    pub fn arg(mut self, value: impl serde::Serialize) -> Self {
        let index = self.positional.len();
        match serde_json::to_value(value) {
            Ok(value) => self.positional.push(value),
            Err(e) => {
                self.positional.push(Value::Null);
                self.rejected_positional.insert(index, e.to_string());
            }
        }
        self
    }

    /// Sets a keyword argument, replacing any earlier value under `name`.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl serde::Serialize) -> Self {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.rejected_keyword.remove(&name);
                self.keyword.insert(name, value);
            }
            Err(e) => {
                self.keyword.remove(&name);
                self.rejected_keyword.insert(name, e.to_string());
            }
        }
        self
    }

    /// `true` when every argument serialized successfully.
    pub fn is_complete(&self) -> bool {
        self.rejected_positional.is_empty() && self.rejected_keyword.is_empty()
    }

    /// Reads positional argument `index` as `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ArgsError> {
        if let Some(reason) = self.rejected_positional.get(&index) {
            return Err(unserializable(format!("#{index}"), reason));
        }
        let value = self
            .positional
            .get(index)
            .ok_or(ArgsError::MissingPositional { index })?;
        decode(value, || format!("#{index}"))
    }

    /// Reads keyword argument `name` as `T`.
    pub fn get_kw<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgsError> {
        if let Some(reason) = self.rejected_keyword.get(name) {
            return Err(unserializable(name.to_owned(), reason));
        }
        let value = self
            .keyword
            .get(name)
            .ok_or_else(|| ArgsError::MissingKeyword {
                name: name.to_owned(),
            })?;
        decode(value, || name.to_owned())
    }

    /// Reads keyword argument `name`, falling back to `default` when it is absent.
    pub fn get_kw_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, ArgsError> {
        match self.get_kw(name) {
            Err(ArgsError::MissingKeyword { .. }) => Ok(default),
            other => other,
        }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &Map<String, Value> {
        &self.keyword
    }
}

fn unserializable(name: String, reason: &str) -> ArgsError {
    ArgsError::Unserializable {
        name,
        reason: reason.to_owned(),
    }
}

fn decode<T: DeserializeOwned>(value: &Value, name: impl FnOnce() -> String) -> Result<T, ArgsError> {
    T::deserialize(value).map_err(|source| ArgsError::Invalid {
        name: name(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_positional_and_keyword() {
        let args = Args::new().arg("hello").arg(3).kwarg("verbose", true);

        assert_eq!(args.get::<String>(0).unwrap(), "hello");
        assert_eq!(args.get::<u32>(1).unwrap(), 3);
        assert!(args.get_kw::<bool>("verbose").unwrap());
    }

    #[test]
    fn missing_arguments_are_reported() {
        let args = Args::new();

        assert!(matches!(
            args.get::<i32>(2),
            Err(ArgsError::MissingPositional { index: 2 })
        ));
        let err = args.get_kw::<i32>("depth").unwrap_err();
        assert_eq!(err.to_string(), "missing keyword argument `depth`");
    }

    #[test]
    fn wrong_type_names_the_argument() {
        let args = Args::new().arg("not a number");

        let err = args.get::<u64>(0).unwrap_err();
        assert!(matches!(&err, ArgsError::Invalid { name, .. } if name == "#0"));
    }

    #[test]
    fn keyword_default_only_when_absent() {
        let args = Args::new().kwarg("limit", "ten");

        assert_eq!(args.get_kw_or("offset", 0u32).unwrap(), 0);
        assert!(args.get_kw_or("limit", 5u32).is_err());
    }

    #[test]
    fn unserializable_values_fail_where_they_are_read() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON");

        let args = Args::new().arg(bad.clone()).arg(7).kwarg("map", bad);

        assert!(!args.is_complete());
        assert!(matches!(
            args.get::<Value>(0),
            Err(ArgsError::Unserializable { name, .. }) if name == "#0"
        ));
        assert_eq!(args.get::<i32>(1).unwrap(), 7);
        assert!(matches!(
            args.get_kw::<Value>("map"),
            Err(ArgsError::Unserializable { name, .. }) if name == "map"
        ));
    }

    #[test]
    fn replacing_a_rejected_kwarg_clears_the_error() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((0, 0), 0);

        let args = Args::new().kwarg("y", bad).kwarg("y", 3);

        assert!(args.is_complete());
        assert_eq!(args.get_kw::<i32>("y").unwrap(), 3);
    }

    #[test]
    fn later_kwarg_replaces_earlier() {
        let args = Args::new().kwarg("y", 1).kwarg("y", 2);

        assert_eq!(args.keyword().len(), 1);
        assert_eq!(args.get_kw::<i32>("y").unwrap(), 2);
    }
}
