//! Transform registry for registering and calling column transforms.
//!
//! Mapping columns name a transform (`transform: phone`) that is applied to
//! the extracted value before it is stored on the record. The registry is a
//! small plugin point: the built-in normalizers are registered under fixed
//! names, and callers may register their own functions before a run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::entity::FieldValue;
use crate::normalize::{normalize_email, Normalizers};

/// Error type for transform operations
#[derive(Debug, Clone)]
pub enum TransformError {
    NotFound(String),
    InvalidArgs(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::NotFound(name) => write!(f, "Transform not found: {}", name),
            TransformError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
        }
    }
}

impl std::error::Error for TransformError {}

/// Per-record context handed to every transform.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// The record's own resolved `country`, used for phone parsing
    pub country: Option<String>,
}

/// Trait for column transform functions
///
/// A transform receives the column value after type coercion, so list
/// columns arrive as `FieldValue::List`. Returning `FieldValue::Null` means
/// the value did not survive normalization.
pub trait TransformFn: Send + Sync {
    fn execute(
        &self,
        value: FieldValue,
        context: &TransformContext,
    ) -> Result<FieldValue, TransformError>;
}

/// Simple function-based implementation of TransformFn
impl<F> TransformFn for F
where
    F: Fn(FieldValue, &TransformContext) -> Result<FieldValue, TransformError> + Send + Sync,
{
    fn execute(
        &self,
        value: FieldValue,
        context: &TransformContext,
    ) -> Result<FieldValue, TransformError> {
        self(value, context)
    }
}

/// Apply a text function to a scalar, or to every item of a list.
/// Non-text items are rendered as text first.
fn map_text<F>(value: FieldValue, f: F) -> FieldValue
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        FieldValue::List(items) => {
            let mapped: Vec<FieldValue> = items
                .into_iter()
                .filter_map(|item| item.to_text())
                .filter_map(|text| f(&text))
                .map(FieldValue::String)
                .collect();
            FieldValue::List(mapped).normalized()
        }
        other => other
            .to_text()
            .and_then(|text| f(&text))
            .map(FieldValue::String)
            .unwrap_or(FieldValue::Null),
    }
}

/// Registry for storing and calling transformation functions
pub struct TransformRegistry {
    transforms: HashMap<String, Box<dyn TransformFn>>,
}

impl TransformRegistry {
    /// Create a new empty transform registry
    pub fn new() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in normalizers:
    /// `phone`, `email`, `job_title`, `lowercase` and `trim`.
    pub fn with_builtins(normalizers: Arc<Normalizers>) -> Self {
        let mut registry = Self::new();

        let phones = Arc::clone(&normalizers);
        registry.register(
            "phone",
            Box::new(move |value: FieldValue, ctx: &TransformContext| {
                Ok(map_text(value, |raw| {
                    phones.phones.normalize(raw, ctx.country.as_deref())
                }))
            }),
        );

        registry.register(
            "email",
            Box::new(|value: FieldValue, _ctx: &TransformContext| {
                Ok(map_text(value, normalize_email))
            }),
        );

        let titles = Arc::clone(&normalizers);
        registry.register(
            "job_title",
            Box::new(move |value: FieldValue, _ctx: &TransformContext| {
                Ok(map_text(value, |raw| titles.job_titles.clean(raw)))
            }),
        );

        registry.register(
            "lowercase",
            Box::new(|value: FieldValue, _ctx: &TransformContext| {
                Ok(map_text(value, |raw| Some(raw.to_lowercase())))
            }),
        );

        registry.register(
            "trim",
            Box::new(|value: FieldValue, _ctx: &TransformContext| {
                Ok(map_text(value, |raw| {
                    let trimmed = raw.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                }))
            }),
        );

        registry
    }

    /// Register a transformation function, replacing any existing one with
    /// the same name
    pub fn register(&mut self, name: impl Into<String>, func: Box<dyn TransformFn>) {
        self.transforms.insert(name.into(), func);
    }

    /// Call a registered transformation function
    pub fn call(
        &self,
        name: &str,
        value: FieldValue,
        context: &TransformContext,
    ) -> Result<FieldValue, TransformError> {
        let transform = self
            .transforms
            .get(name)
            .ok_or_else(|| TransformError::NotFound(name.to_string()))?;

        transform.execute(value, context)
    }

    /// Check if a transform is registered
    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Get list of all registered transform names, sorted
    pub fn list_transforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.list_transforms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::tests::test_config;

    fn builtins() -> TransformRegistry {
        let normalizers = Normalizers::new(&test_config()).unwrap();
        TransformRegistry::with_builtins(Arc::new(normalizers))
    }

    fn india() -> TransformContext {
        TransformContext {
            country: Some("India".to_string()),
        }
    }

    #[test]
    fn test_register_and_call_transform() {
        let mut registry = TransformRegistry::new();

        registry.register(
            "uppercase",
            Box::new(|value: FieldValue, _ctx: &TransformContext| {
                let text = value
                    .to_text()
                    .ok_or_else(|| TransformError::InvalidArgs("expected text".to_string()))?;
                Ok(FieldValue::String(text.to_uppercase()))
            }) as Box<dyn TransformFn>,
        );

        let result = registry
            .call("uppercase", FieldValue::from("hello"), &TransformContext::default())
            .unwrap();
        assert_eq!(result, FieldValue::from("HELLO"));

        let result = registry.call("uppercase", FieldValue::Null, &TransformContext::default());
        assert!(matches!(result, Err(TransformError::InvalidArgs(_))));
    }

    #[test]
    fn test_transform_not_found() {
        let registry = TransformRegistry::new();
        let result = registry.call("nonexistent", FieldValue::Null, &TransformContext::default());

        assert!(matches!(result, Err(TransformError::NotFound(_))));
    }

    #[test]
    fn test_builtin_names() {
        let registry = builtins();
        assert_eq!(
            registry.list_transforms(),
            vec!["email", "job_title", "lowercase", "phone", "trim"]
        );
        assert!(!registry.has_transform("company_name"));
    }

    #[test]
    fn test_phone_transform_scalar_and_list() {
        let registry = builtins();

        let scalar = registry
            .call("phone", FieldValue::Int(9876543210), &india())
            .unwrap();
        assert_eq!(scalar, FieldValue::from("+919876543210"));

        let list = registry
            .call(
                "phone",
                FieldValue::List(vec![
                    FieldValue::from("98765 43210"),
                    FieldValue::from("not-a-number"),
                ]),
                &india(),
            )
            .unwrap();
        assert_eq!(list, FieldValue::List(vec![FieldValue::from("+919876543210")]));

        let garbage = registry
            .call("phone", FieldValue::from("not-a-number"), &india())
            .unwrap();
        assert_eq!(garbage, FieldValue::Null);
    }

    #[test]
    fn test_email_and_job_title_transforms() {
        let registry = builtins();
        let ctx = TransformContext::default();

        assert_eq!(
            registry.call("email", FieldValue::from(" A@X.COM "), &ctx).unwrap(),
            FieldValue::from("a@x.com")
        );
        assert_eq!(
            registry
                .call("job_title", FieldValue::from("Architect at Studio"), &ctx)
                .unwrap(),
            FieldValue::from("Architect")
        );
    }
}
