use rust_decimal::Decimal;
use weave_core::aa::AaValue;

/// A runtime value in the formula language (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Decimal(Decimal),
    Str(String),
    Bool(bool),
    Json(serde_json::Value),
    /// `var['x'] otherwise default` resolves to this when the variable has
    /// never been set; distinct from any user-representable value.
    Unset,
}

impl Value {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Decimal(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::Unset => false,
            Value::Json(v) => !v.is_null(),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Decimal(d) => d.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Unset => String::new(),
            Value::Json(v) => v.to_string(),
        }
    }

    pub fn to_aa_value(&self) -> Option<AaValue> {
        match self {
            Value::Decimal(d) => Some(AaValue::Decimal(*d)),
            Value::Str(s) => Some(AaValue::String(s.clone())),
            Value::Bool(b) => Some(AaValue::Bool(*b)),
            Value::Json(j) => Some(AaValue::Json(j.clone())),
            Value::Unset => None,
        }
    }

    pub fn from_aa_value(v: &AaValue) -> Value {
        match v {
            AaValue::Decimal(d) => Value::Decimal(*d),
            AaValue::String(s) => Value::Str(s.clone()),
            AaValue::Bool(b) => Value::Bool(*b),
            AaValue::Json(j) => Value::Json(j.clone()),
        }
    }

    /// Serialized byte length, used to enforce `MAX_STATE_VAR_VALUE_LENGTH`.
    pub fn byte_len(&self) -> usize {
        self.as_str().len()
    }
}
