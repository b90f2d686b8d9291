//! Typed input-schema representation and evaluator.
//!
//! Tool input schemas are deserialized into [`Schema`], a typed subset of
//! JSON Schema covering the constraint kinds the gateway enforces: runtime
//! type, required object keys, enum membership, string length bounds and
//! numeric bounds. Unknown keywords are ignored (no closed-schema mode).
//!
//! Validation is exhaustive: every violation in the input is collected and
//! reported in one pass, so clients fix all problems in a single round trip.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Runtime type discriminator for schema `type` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Boolean,
    /// Whole number.
    Integer,
    /// Any number.
    Number,
    /// JSON string.
    String,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl SchemaType {
    /// Returns `true` if `value`'s runtime shape matches this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        write!(f, "{name}")
    }
}

/// Typed schema node. One per constraint site; object schemas recurse
/// through `properties`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Expected runtime type, if constrained.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    /// Human-readable description, carried through to `tools/list`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sub-schemas for object properties (BTreeMap for stable ordering).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    /// Keys that must be present on object values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Allowed values for scalars.
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Minimum string length.
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    /// Maximum string length.
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    /// Inclusive numeric lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Inclusive numeric upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

/// Machine-readable violation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// Value's runtime type does not match `type`.
    TypeMismatch,
    /// A `required` key is absent.
    MissingRequired,
    /// Value is not a member of `enum`.
    EnumMismatch,
    /// String shorter than `minLength`.
    TooShort,
    /// String longer than `maxLength`.
    TooLong,
    /// Number below `minimum`.
    BelowMinimum,
    /// Number above `maximum`.
    AboveMaximum,
}

impl ViolationCode {
    /// Returns the snake_case wire form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TypeMismatch => "type_mismatch",
            Self::MissingRequired => "missing_required",
            Self::EnumMismatch => "enum_mismatch",
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
            Self::BelowMinimum => "below_minimum",
            Self::AboveMaximum => "above_maximum",
        }
    }
}

/// One schema violation, tagged with the path it occurred at.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// Dotted path from the input root; empty string for the root itself.
    pub path: String,
    /// Machine-readable violation kind.
    pub code: ViolationCode,
    /// Human-readable description of the violation.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let site = if self.path.is_empty() { "input" } else { &self.path };
        write!(f, "{site}: {} [{}]", self.message, self.code.as_str())
    }
}

impl Schema {
    /// Validates `value` against this schema, collecting every violation.
    ///
    /// Never fails fast: the returned list contains all type, required,
    /// enum, length and bound violations found anywhere in the input.
    #[must_use]
    pub fn validate(&self, value: &Value) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check(value, "", &mut violations);
        violations
    }

    /// Validates `value`, converting any violations into a single
    /// [`GatewayError::ValidationFailed`] whose message concatenates
    /// every violation.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ValidationFailed`] if the value violates
    /// the schema in any way.
    pub fn validate_or_err(&self, value: &Value) -> Result<(), GatewayError> {
        let violations = self.validate(value);
        if violations.is_empty() {
            return Ok(());
        }
        let joined = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(GatewayError::ValidationFailed(joined))
    }

    fn check(&self, value: &Value, path: &str, out: &mut Vec<Violation>) {
        if let Some(expected) = self.schema_type
            && !expected.matches(value)
        {
            out.push(Violation {
                path: path.to_string(),
                code: ViolationCode::TypeMismatch,
                message: format!("expected {expected}, got {}", type_name(value)),
            });
        }

        if let Some(obj) = value.as_object() {
            for key in &self.required {
                if !obj.contains_key(key) {
                    out.push(Violation {
                        path: join_path(path, key),
                        code: ViolationCode::MissingRequired,
                        message: "required key is missing".to_string(),
                    });
                }
            }
            for (key, sub) in &self.properties {
                if let Some(child) = obj.get(key) {
                    sub.check(child, &join_path(path, key), out);
                }
            }
        }

        if let Some(allowed) = &self.enum_values
            && !value.is_null()
            && !allowed.contains(value)
        {
            out.push(Violation {
                path: path.to_string(),
                code: ViolationCode::EnumMismatch,
                message: format!("value {value} is not one of the allowed values"),
            });
        }

        if let Some(s) = value.as_str() {
            let len = s.chars().count() as u64;
            if let Some(min) = self.min_length
                && len < min
            {
                out.push(Violation {
                    path: path.to_string(),
                    code: ViolationCode::TooShort,
                    message: format!("length {len} is below minLength {min}"),
                });
            }
            if let Some(max) = self.max_length
                && len > max
            {
                out.push(Violation {
                    path: path.to_string(),
                    code: ViolationCode::TooLong,
                    message: format!("length {len} exceeds maxLength {max}"),
                });
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum
                && n < min
            {
                out.push(Violation {
                    path: path.to_string(),
                    code: ViolationCode::BelowMinimum,
                    message: format!("{n} is below minimum {min}"),
                });
            }
            if let Some(max) = self.maximum
                && n > max
            {
                out.push(Violation {
                    path: path.to_string(),
                    code: ViolationCode::AboveMaximum,
                    message: format!("{n} exceeds maximum {max}"),
                });
            }
        }
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Human-readable runtime type name for error messages.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
