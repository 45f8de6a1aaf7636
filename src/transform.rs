//! Declarative request-transform engine.
//!
//! A provider operation is described by a [`FunctionConfig`]: an ordered list
//! of (canonical field, [`FieldRule`]) entries. The interpreter reads each
//! canonical field from the inbound body, applies defaults and transforms,
//! enforces numeric constraints, and places the result at a dotted path in
//! the provider body. Providers are data, not code.

use crate::target::ProviderTarget;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("missing required field '{0}'")]
    MissingRequiredField(String),
    #[error("field '{field}' value {value} is out of range [{min:?}, {max:?}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    #[error("conflicting values for provider path '{0}'")]
    PathConflict(String),
    #[error("{0}")]
    Invalid(String),
}

/// Transform callback: computes the provider-side value from the full
/// canonical body and the request target.
pub type TransformFn = fn(&Value, &ProviderTarget) -> Result<Value, TransformError>;

/// Default callback: computes a default from the full canonical body and the
/// request target when the canonical field is absent.
pub type DefaultFn = fn(&Value, &ProviderTarget) -> Value;

/// Default for an absent canonical field.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Computed(DefaultFn),
}

impl std::fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultValue::Value(v) => write!(f, "Value({})", v),
            DefaultValue::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// Placement constraints shared by `Copy` and `Transform` rules.
#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    /// Dotted path in the provider body
    pub path: &'static str,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldSpec {
    pub fn at(path: &'static str) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Value(value));
        self
    }

    pub fn default_fn(mut self, f: DefaultFn) -> Self {
        self.default = Some(DefaultValue::Computed(f));
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }
}

/// One mapping rule for a canonical field.
#[derive(Debug, Clone)]
pub enum FieldRule {
    /// Place a fixed value regardless of the canonical body.
    Const { path: &'static str, value: Value },
    /// Copy the canonical field to a provider path.
    Copy(FieldSpec),
    /// Derive the provider value from the whole canonical body.
    Transform { spec: FieldSpec, f: TransformFn },
    /// Fan one canonical field out to several provider params.
    Fanout(Vec<FieldRule>),
}

/// Ordered mapping from canonical field names to rules.
pub struct FunctionConfig {
    pub fields: Vec<(&'static str, FieldRule)>,
}

impl FunctionConfig {
    pub fn new(fields: Vec<(&'static str, FieldRule)>) -> Self {
        Self { fields }
    }

    /// Build the provider body from a canonical body.
    pub fn apply(&self, body: &Value, target: &ProviderTarget) -> Result<Value, TransformError> {
        let mut out = Value::Object(Map::new());
        for (field, rule) in &self.fields {
            apply_rule(field, rule, body, target, &mut out)?;
        }
        Ok(out)
    }
}

fn apply_rule(
    field: &str,
    rule: &FieldRule,
    body: &Value,
    target: &ProviderTarget,
    out: &mut Value,
) -> Result<(), TransformError> {
    match rule {
        FieldRule::Const { path, value } => place(out, path, value.clone()),
        FieldRule::Copy(spec) => {
            let Some(value) = resolve(field, spec, body, target)? else {
                return Ok(());
            };
            check_range(field, spec, &value)?;
            place(out, spec.path, value)
        }
        FieldRule::Transform { spec, f } => {
            if resolve(field, spec, body, target)?.is_none() {
                return Ok(());
            }
            let value = f(body, target)?;
            if value.is_null() {
                return Ok(());
            }
            check_range(field, spec, &value)?;
            place(out, spec.path, value)
        }
        FieldRule::Fanout(rules) => {
            for rule in rules {
                apply_rule(field, rule, body, target, out)?;
            }
            Ok(())
        }
    }
}

/// Read the canonical field, falling back to the default. `None` means the
/// entry is skipped entirely; JSON null counts as absent.
fn resolve(
    field: &str,
    spec: &FieldSpec,
    body: &Value,
    target: &ProviderTarget,
) -> Result<Option<Value>, TransformError> {
    match body.get(field) {
        Some(value) if !value.is_null() => Ok(Some(value.clone())),
        _ => match &spec.default {
            Some(DefaultValue::Value(v)) => Ok(Some(v.clone())),
            Some(DefaultValue::Computed(f)) => Ok(Some(f(body, target))),
            None if spec.required => Err(TransformError::MissingRequiredField(field.to_string())),
            None => Ok(None),
        },
    }
}

fn check_range(field: &str, spec: &FieldSpec, value: &Value) -> Result<(), TransformError> {
    if spec.min.is_none() && spec.max.is_none() {
        return Ok(());
    }
    let Some(number) = value.as_f64() else {
        return Ok(());
    };
    if spec.min.is_some_and(|min| number < min) || spec.max.is_some_and(|max| number > max) {
        return Err(TransformError::OutOfRange {
            field: field.to_string(),
            value: number,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(())
}

/// Place `value` at a dotted `path`, creating intermediate objects. Placing
/// the same leaf twice is an error unless the values are equal.
pub fn place(out: &mut Value, path: &str, value: Value) -> Result<(), TransformError> {
    let mut current = out;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let map = current
            .as_object_mut()
            .ok_or_else(|| TransformError::PathConflict(path.to_string()))?;
        if i == segments.len() - 1 {
            match map.get(*segment) {
                Some(existing) if *existing != value => {
                    return Err(TransformError::PathConflict(path.to_string()));
                }
                _ => {
                    map.insert(segment.to_string(), value);
                }
            }
            return Ok(());
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use serde_json::json;

    fn test_target() -> ProviderTarget {
        let mut headers = HeaderMap::new();
        headers.insert("x-bg-aws-region", HeaderValue::from_static("us-east-1"));
        headers.insert("x-bg-aws-access-key-id", HeaderValue::from_static("AKIA"));
        headers.insert(
            "x-bg-aws-secret-access-key",
            HeaderValue::from_static("secret"),
        );
        ProviderTarget::from_headers(&headers).unwrap()
    }

    fn double_tokens(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
        let n = body["max_tokens"].as_u64().unwrap_or(0);
        Ok(json!(n * 2))
    }

    #[test]
    fn test_copy_with_dotted_path() {
        let config = FunctionConfig::new(vec![(
            "max_tokens",
            FieldRule::Copy(FieldSpec::at("inferenceConfig.maxTokens")),
        )]);
        let body = json!({"max_tokens": 16});
        let out = config.apply(&body, &test_target()).unwrap();
        assert_eq!(out, json!({"inferenceConfig": {"maxTokens": 16}}));
    }

    #[test]
    fn test_absent_optional_field_skipped() {
        let config = FunctionConfig::new(vec![(
            "temperature",
            FieldRule::Copy(FieldSpec::at("inferenceConfig.temperature")),
        )]);
        let out = config.apply(&json!({}), &test_target()).unwrap();
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_missing_required_field() {
        let config = FunctionConfig::new(vec![(
            "messages",
            FieldRule::Copy(FieldSpec::at("messages").required()),
        )]);
        let err = config.apply(&json!({}), &test_target()).unwrap_err();
        assert_eq!(
            err,
            TransformError::MissingRequiredField("messages".to_string())
        );
    }

    #[test]
    fn test_default_value_applied() {
        let config = FunctionConfig::new(vec![(
            "max_tokens",
            FieldRule::Copy(FieldSpec::at("max_tokens").default_value(json!(4096))),
        )]);
        let out = config.apply(&json!({}), &test_target()).unwrap();
        assert_eq!(out["max_tokens"], 4096);
    }

    #[test]
    fn test_range_enforcement() {
        let config = FunctionConfig::new(vec![(
            "temperature",
            FieldRule::Copy(FieldSpec::at("inferenceConfig.temperature").range(0.0, 1.0)),
        )]);
        let err = config
            .apply(&json!({"temperature": 1.5}), &test_target())
            .unwrap_err();
        assert!(matches!(err, TransformError::OutOfRange { .. }));
    }

    #[test]
    fn test_transform_replaces_value() {
        let config = FunctionConfig::new(vec![(
            "max_tokens",
            FieldRule::Transform {
                spec: FieldSpec::at("doubled"),
                f: double_tokens,
            },
        )]);
        let out = config
            .apply(&json!({"max_tokens": 8}), &test_target())
            .unwrap();
        assert_eq!(out["doubled"], 16);
    }

    #[test]
    fn test_transform_null_result_omitted() {
        fn always_null(_: &Value, _: &ProviderTarget) -> Result<Value, TransformError> {
            Ok(Value::Null)
        }
        let config = FunctionConfig::new(vec![(
            "model",
            FieldRule::Transform {
                spec: FieldSpec::at("additionalModelRequestFields"),
                f: always_null,
            },
        )]);
        let out = config
            .apply(&json!({"model": "m"}), &test_target())
            .unwrap();
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_fanout_places_multiple_params() {
        let config = FunctionConfig::new(vec![(
            "max_tokens",
            FieldRule::Fanout(vec![
                FieldRule::Copy(FieldSpec::at("a")),
                FieldRule::Copy(FieldSpec::at("b.c")),
            ]),
        )]);
        let out = config
            .apply(&json!({"max_tokens": 3}), &test_target())
            .unwrap();
        assert_eq!(out, json!({"a": 3, "b": {"c": 3}}));
    }

    #[test]
    fn test_conflicting_placement_rejected() {
        let mut out = json!({});
        place(&mut out, "a.b", json!(1)).unwrap();
        // Same value is idempotent
        place(&mut out, "a.b", json!(1)).unwrap();
        // Different value conflicts
        let err = place(&mut out, "a.b", json!(2)).unwrap_err();
        assert_eq!(err, TransformError::PathConflict("a.b".to_string()));
    }

    #[test]
    fn test_const_rule() {
        let config = FunctionConfig::new(vec![(
            "model",
            FieldRule::Const {
                path: "anthropic_version",
                value: json!("bedrock-2023-05-31"),
            },
        )]);
        let out = config.apply(&json!({}), &test_target()).unwrap();
        assert_eq!(out["anthropic_version"], "bedrock-2023-05-31");
    }

    #[test]
    fn test_null_canonical_field_treated_as_absent() {
        let config = FunctionConfig::new(vec![(
            "temperature",
            FieldRule::Copy(FieldSpec::at("temperature")),
        )]);
        let out = config
            .apply(&json!({"temperature": null}), &test_target())
            .unwrap();
        assert_eq!(out, json!({}));
    }
}
