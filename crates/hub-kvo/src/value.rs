//! Property values.
//!
//! A property on an observable object holds either a plain JSON value or a
//! reference to another observable object. JSON values compare by value;
//! object references compare by identity, which is what path observation
//! needs to decide whether an intermediate segment actually changed.

use serde_json::Value;

use crate::object::ObservableObject;

/// The value of one property slot.
#[derive(Clone)]
pub enum PropValue {
    /// A plain JSON value. `Value::Null` doubles as "absent".
    Json(Value),
    /// A reference to another observable object in the graph.
    Object(ObservableObject),
}

impl PropValue {
    /// The null/absent value.
    pub fn null() -> Self {
        PropValue::Json(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Json(Value::Null))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            PropValue::Json(v) => Some(v),
            PropValue::Object(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            PropValue::Json(v) => Some(v),
            PropValue::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObservableObject> {
        match self {
            PropValue::Object(o) => Some(o),
            PropValue::Json(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(Value::as_bool)
    }
}

impl Default for PropValue {
    fn default() -> Self {
        PropValue::null()
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Json(a), PropValue::Json(b)) => a == b,
            (PropValue::Object(a), PropValue::Object(b)) => a.object_id() == b.object_id(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for PropValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropValue::Json(v) => write!(f, "Json({v})"),
            PropValue::Object(o) => write!(f, "Object(#{})", o.object_id()),
        }
    }
}

impl From<Value> for PropValue {
    fn from(v: Value) -> Self {
        PropValue::Json(v)
    }
}

impl From<ObservableObject> for PropValue {
    fn from(o: ObservableObject) -> Self {
        PropValue::Object(o)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Json(Value::String(s.to_owned()))
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Json(Value::String(s))
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        PropValue::Json(Value::from(n))
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        PropValue::Json(Value::from(n))
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Json(Value::Bool(b))
    }
}
