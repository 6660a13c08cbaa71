//! Record types and declarative attribute schemas.
//!
//! A [`RecordType`] names a kind of record, its primary key and its
//! declared attributes. Each [`RecordAttribute`] coerces the raw hash value
//! on read (`to_type`) and canonicalizes on write (`from_type`).

use serde_json::Value;

/// Coercion kind of one declared attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    String,
    Integer,
    Float,
    Boolean,
    /// No coercion: the raw JSON value passes through.
    Raw,
}

/// One declared attribute on a record type.
#[derive(Debug, Clone)]
pub struct RecordAttribute {
    key: String,
    kind: AttrKind,
    default: Option<Value>,
    hash_key: Option<String>,
}

impl RecordAttribute {
    pub fn new(key: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            key: key.into(),
            kind,
            default: None,
            hash_key: None,
        }
    }

    /// Value reported when the hash carries nothing for this attribute.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Reads and writes a different key in the underlying hash.
    pub fn with_hash_key(mut self, hash_key: impl Into<String>) -> Self {
        self.hash_key = Some(hash_key.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> AttrKind {
        self.kind
    }

    /// The key used in the data hash.
    pub fn storage_key(&self) -> &str {
        self.hash_key.as_deref().unwrap_or(&self.key)
    }

    /// Coerces a raw hash value for reading; missing or null values yield
    /// the default.
    pub fn to_type(&self, raw: Option<&Value>) -> Value {
        match raw.filter(|v| !v.is_null()) {
            Some(raw) => coerce(self.kind, raw)
                .or_else(|| self.default.clone())
                .unwrap_or(Value::Null),
            None => self.default.clone().unwrap_or(Value::Null),
        }
    }

    /// Canonicalizes a value for storage in the hash.
    pub fn from_type(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        coerce(self.kind, value).unwrap_or(Value::Null)
    }
}

fn coerce(kind: AttrKind, value: &Value) -> Option<Value> {
    match kind {
        AttrKind::Raw => Some(value.clone()),
        AttrKind::String => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            other => Some(Value::String(other.to_string())),
        },
        AttrKind::Integer => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Value::from),
        AttrKind::Float => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Value::from),
        AttrKind::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Number(n) => Some(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            Value::String(s) => Some(Value::Bool(!s.is_empty())),
            _ => None,
        },
    }
}

/// A registered kind of record.
#[derive(Debug, Clone)]
pub struct RecordType {
    name: String,
    primary_key: String,
    attributes: Vec<RecordAttribute>,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_owned(),
            attributes: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn with_attribute(mut self, attribute: RecordAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn attributes(&self) -> &[RecordAttribute] {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_coercion_and_default() {
        let attr = RecordAttribute::new("age", AttrKind::Integer).with_default(json!(0));
        assert_eq!(attr.to_type(Some(&json!(41))), json!(41));
        assert_eq!(attr.to_type(Some(&json!("41"))), json!(41));
        assert_eq!(attr.to_type(Some(&json!(41.9))), json!(41));
        assert_eq!(attr.to_type(None), json!(0));
        assert_eq!(attr.to_type(Some(&json!(null))), json!(0));
    }

    #[test]
    fn string_coercion() {
        let attr = RecordAttribute::new("name", AttrKind::String);
        assert_eq!(attr.to_type(Some(&json!("a"))), json!("a"));
        assert_eq!(attr.to_type(Some(&json!(7))), json!("7"));
        assert_eq!(attr.to_type(None), Value::Null);
    }

    #[test]
    fn boolean_truthiness() {
        let attr = RecordAttribute::new("ok", AttrKind::Boolean).with_default(json!(false));
        assert_eq!(attr.to_type(Some(&json!(true))), json!(true));
        assert_eq!(attr.to_type(Some(&json!(1))), json!(true));
        assert_eq!(attr.to_type(Some(&json!(""))), json!(false));
        assert_eq!(attr.to_type(None), json!(false));
    }

    #[test]
    fn storage_key_override() {
        let attr = RecordAttribute::new("fullName", AttrKind::String).with_hash_key("full_name");
        assert_eq!(attr.storage_key(), "full_name");
        let plain = RecordAttribute::new("age", AttrKind::Integer);
        assert_eq!(plain.storage_key(), "age");
    }
}
