use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FieldError;

/// Raw name -> value map handed to a step for one execution.
pub type FieldValues = HashMap<String, Value>;

/// Extra predicate a field value must satisfy on top of its declared type.
pub type Validator = fn(&Value) -> bool;

/// Declared type of a step field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    /// Integer or float.
    Number,
    Boolean,
    List,
    Map,
    /// Any non-null value.
    Any,
}

impl FieldType {
    /// Whether `value` has this type. Null never matches.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::List => value.is_array(),
            FieldType::Map => value.is_object(),
            FieldType::Any => !value.is_null(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::List => "list",
            FieldType::Map => "map",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Static declaration of one field of a step type.
#[derive(Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub validator: Option<Validator>,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            validator: None,
            description: "",
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
            validator: None,
            description: "",
        }
    }

    pub const fn with_validator(self, validator: Validator) -> Self {
        Self {
            validator: Some(validator),
            ..self
        }
    }

    pub const fn describe(self, description: &'static str) -> Self {
        Self {
            description,
            ..self
        }
    }

    /// Non-null, right type, and accepted by the validator if there is one.
    pub fn accepts(&self, value: &Value) -> bool {
        self.ty.matches(value) && self.validator.map_or(true, |check| check(value))
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("required", &self.required)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Current values of a step's declared fields.
///
/// Values are stored as given and validated on demand, so one bad value never
/// hides the state of the others.
#[derive(Debug, Clone)]
pub struct Fields {
    specs: &'static [FieldSpec],
    values: HashMap<String, Value>,
}

impl Fields {
    pub fn new(specs: &'static [FieldSpec]) -> Self {
        Self {
            specs,
            values: HashMap::new(),
        }
    }

    pub fn specs(&self) -> &'static [FieldSpec] {
        self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&'static FieldSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Store a raw value without validating it.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        let spec = self
            .spec(name)
            .ok_or_else(|| FieldError::Unknown(name.to_string()))?;
        self.values.insert(spec.name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Re-check the declared type and validator of `name` against its current value.
    pub fn is_valid(&self, name: &str) -> bool {
        match (self.spec(name), self.values.get(name)) {
            (Some(spec), Some(value)) => spec.accepts(value),
            _ => false,
        }
    }

    /// Assign every value in `values`, then check that all required fields hold
    /// valid values, including required fields absent from `values`.
    pub fn apply_all(&mut self, values: &FieldValues) -> Result<(), FieldError> {
        let mut keys: Vec<&String> = values.keys().collect();
        keys.sort();

        for key in keys {
            self.set(key, values[key].clone())?;
            if !self.is_valid(key) {
                return Err(FieldError::BadValue(key.clone()));
            }
        }

        for spec in self.specs.iter().filter(|s| s.required) {
            if !self.is_valid(spec.name) {
                return Err(FieldError::Missing(spec.name.to_string()));
            }
        }

        Ok(())
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }
}
