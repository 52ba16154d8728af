//! Payload validators applied after a candidate parses.

use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

/// Error produced when a parsed payload does not meet its expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Error message.
    pub message: String,
    /// Field that caused the error, if applicable.
    pub field: Option<String>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref field) = self.field {
            write!(f, "Field '{field}': {}", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Checks a parsed payload against an expected shape.
pub trait SchemaValidator: Send + Sync {
    /// Returns an error if the payload is not acceptable.
    fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError>;
}

/// Requires the payload to be an object containing the listed keys.
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    fields: Vec<String>,
    non_empty: bool,
}

impl RequiredFields {
    /// Creates a validator requiring the given keys.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            non_empty: false,
        }
    }

    /// Additionally rejects null, empty strings and empty arrays or objects.
    #[must_use]
    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }
}

fn is_empty_value(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => false,
    }
}

impl SchemaValidator for RequiredFields {
    fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        let Some(object) = payload.as_object() else {
            return Err(ValidationError::new("Payload must be a JSON object"));
        };
        for field in &self.fields {
            match object.get(field) {
                None => return Err(ValidationError::for_field(field, "missing")),
                Some(value) if self.non_empty && is_empty_value(value) => {
                    return Err(ValidationError::for_field(field, "must not be empty"));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Requires the payload to deserialize into `T`.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    /// Creates a typed validator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSchema")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> SchemaValidator for TypedSchema<T> {
    fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        T::deserialize(payload)
            .map(|_| ())
            .map_err(|e| ValidationError::new(e.to_string()))
    }
}

/// Validator backed by a closure.
pub struct FnValidator<F> {
    func: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&serde_json::Value) -> Result<(), ValidationError> + Send + Sync,
{
    /// Wraps a closure.
    #[must_use]
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator").finish_non_exhaustive()
    }
}

impl<F> SchemaValidator for FnValidator<F>
where
    F: Fn(&serde_json::Value) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        (self.func)(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_required_fields() {
        let v = RequiredFields::new(["episodes"]);
        assert!(v.validate(&json!({"episodes": []})).is_ok());

        let err = v.validate(&json!({"title": "x"})).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("episodes"));

        assert!(v.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_required_fields_non_empty() {
        let v = RequiredFields::new(["dialogue"]).non_empty();
        assert!(v.validate(&json!({"dialogue": [{"speaker": "A"}]})).is_ok());
        assert!(v.validate(&json!({"dialogue": []})).is_err());
        assert!(v.validate(&json!({"dialogue": "  "})).is_err());
        assert!(v.validate(&json!({"dialogue": 0})).is_ok());
    }

    #[test]
    fn test_typed_schema() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Episode {
            title: String,
            number: u32,
        }

        let v = TypedSchema::<Episode>::new();
        assert!(v.validate(&json!({"title": "Intro", "number": 1})).is_ok());
        assert!(v.validate(&json!({"title": "Intro", "number": "one"})).is_err());
    }

    #[test]
    fn test_fn_validator() {
        let v = FnValidator::new(|p: &serde_json::Value| {
            if p.get("score").and_then(serde_json::Value::as_i64).unwrap_or(0) > 0 {
                Ok(())
            } else {
                Err(ValidationError::for_field("score", "must be positive"))
            }
        });
        assert!(v.validate(&json!({"score": 3})).is_ok());
        assert_eq!(
            v.validate(&json!({"score": -1})).unwrap_err().to_string(),
            "Field 'score': must be positive"
        );
    }
}
