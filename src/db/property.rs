use std::time::SystemTime;

use crate::core::types::Arguments;
use crate::provider::error::Error;

/// Indexed string values longer than this are rejected by the store.
pub const MAX_INDEXED_STRING_BYTES: usize = 1500;

/// The store's native value types. Nested maps are deliberately absent: structured data is
/// stored as encoded strings or bytes.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Timestamp(SystemTime),
    List(Vec<Value>),
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::decode(&s).map_err(serde::de::Error::custom)
    }
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<SystemTime> for Value {
    fn from(t: SystemTime) -> Self {
        Value::Timestamp(t)
    }
}

impl From<Option<SystemTime>> for Value {
    fn from(t: Option<SystemTime>) -> Self {
        t.map(Value::Timestamp).unwrap_or(Value::Null)
    }
}

impl From<&[String]> for Value {
    fn from(list: &[String]) -> Self {
        Value::List(list.iter().cloned().map(Value::String).collect())
    }
}

impl From<&Arguments> for Value {
    fn from(args: &Arguments) -> Self {
        Value::from(args.as_parts())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Property {
    pub name: String,
    pub value: Value,
    #[serde(default = "indexed_by_default")]
    pub indexed: bool,
}

fn indexed_by_default() -> bool {
    true
}

/// Flat, ordered property bag of one entity.
///
/// Readers are lenient about absence (a missing or null property reads as the zero value,
/// as in any schemaless store) and strict about type: a property holding the wrong type is
/// reported as `Error::Malformed`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets an indexed property, replacing any previous value of the same name.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.insert(name, value.into(), true);
    }

    pub fn set_unindexed(&mut self, name: &str, value: impl Into<Value>) {
        self.insert(name, value.into(), false);
    }

    fn insert(&mut self, name: &str, value: Value, indexed: bool) {
        let property = Property {
            name: name.to_string(),
            value,
            indexed,
        };
        match self.0.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = property,
            None => self.0.push(property),
        }
    }

    /// Overwrites the values of the named properties with those in `patch`.
    pub fn apply(&mut self, patch: &Properties) {
        for p in patch.iter() {
            self.insert(&p.name, p.value.clone(), p.indexed);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Equality match against an indexed property. Unindexed properties never match.
    pub fn matches(&self, name: &str, value: &Value) -> bool {
        self.0
            .iter()
            .any(|p| p.indexed && p.name == name && &p.value == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<(), Error> {
        for p in self.0.iter().filter(|p| p.indexed) {
            check_indexed(&p.name, &p.value)?;
        }
        Ok(())
    }

    pub fn string(&self, name: &str) -> Result<String, Error> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(mismatch(name, "string", other)),
        }
    }

    pub fn strings(&self, name: &str) -> Result<Vec<String>, Error> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(mismatch(name, "string", other)),
                })
                .collect(),
            Some(other) => Err(mismatch(name, "list", other)),
        }
    }

    pub fn arguments(&self, name: &str) -> Result<Arguments, Error> {
        Ok(self.strings(name)?.into_iter().collect())
    }

    pub fn bool(&self, name: &str) -> Result<bool, Error> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(mismatch(name, "bool", other)),
        }
    }

    pub fn bytes(&self, name: &str) -> Result<Vec<u8>, Error> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Bytes(b)) => Ok(b.clone()),
            Some(other) => Err(mismatch(name, "bytes", other)),
        }
    }

    pub fn timestamp(&self, name: &str) -> Result<Option<SystemTime>, Error> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Timestamp(t)) => Ok(Some(*t)),
            Some(other) => Err(mismatch(name, "timestamp", other)),
        }
    }
}

fn mismatch(name: &str, expected: &str, found: &Value) -> Error {
    Error::malformed(
        name,
        format!("expected {}, found {}", expected, found.type_name()),
    )
}

fn check_indexed(name: &str, value: &Value) -> Result<(), Error> {
    match value {
        Value::String(s) if s.len() > MAX_INDEXED_STRING_BYTES => Err(Error::InvalidProperty {
            name: name.to_string(),
            reason: format!(
                "indexed string is {} bytes, limit is {}",
                s.len(),
                MAX_INDEXED_STRING_BYTES
            ),
        }),
        Value::List(items) => items.iter().try_for_each(|v| check_indexed(name, v)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_properties_read_as_zero_values() {
        let props = Properties::new();
        assert_eq!(props.string("State").unwrap(), "");
        assert!(props.strings("Scopes").unwrap().is_empty());
        assert!(!props.bool("Active").unwrap());
        assert!(props.timestamp("CreatedAt").unwrap().is_none());
    }

    #[test]
    fn wrong_type_is_malformed() {
        let mut props = Properties::new();
        props.set("Active", "yes");
        assert!(matches!(props.bool("Active"), Err(Error::Malformed { .. })));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut props = Properties::new();
        props.set("A", 1i64);
        props.set("B", 2i64);
        props.set("A", 3i64);
        let names: Vec<_> = props.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(props.get("A"), Some(&Value::Int(3)));
    }

    #[test]
    fn unindexed_properties_do_not_match() {
        let mut props = Properties::new();
        props.set_unindexed("Secret", "x");
        props.set("ClientID", "x");
        assert!(!props.matches("Secret", &Value::from("x")));
        assert!(props.matches("ClientID", &Value::from("x")));
    }

    #[test]
    fn long_indexed_strings_are_rejected() {
        let long = "a".repeat(MAX_INDEXED_STRING_BYTES + 1);
        let mut props = Properties::new();
        props.set_unindexed("EncodedForm", long.as_str());
        assert!(props.validate().is_ok());
        props.set("RedirectURI", long.as_str());
        assert!(matches!(
            props.validate(),
            Err(Error::InvalidProperty { .. })
        ));
    }

    #[test]
    fn json_representation_round_trips() {
        let mut props = Properties::new();
        props.set("Active", true);
        props.set_unindexed("Session", b"{\"sub\":\"1\"}".to_vec());
        props.set("CreatedAt", SystemTime::now());
        props.set("Scopes", &Arguments::from_delimited_parts("openid photos"));

        let json = serde_json::to_value(&props).unwrap();
        let back: Properties = serde_json::from_value(json).unwrap();
        assert_eq!(back, props);
    }
}
