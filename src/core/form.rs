use std::collections::BTreeMap;
use std::iter::FromIterator;

use crate::provider::error::Error;

/// Request form parameters: each key maps to one or more values.
///
/// Keys are kept sorted, which is also the canonical encoding order, so a form survives an
/// encode/parse round trip exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form(BTreeMap<String, Vec<String>>);

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add(&mut self, key: &str, value: &str) {
        self.0
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn set(&mut self, key: &str, values: Vec<String>) {
        self.0.insert(key.to_string(), values);
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `application/x-www-form-urlencoded` encoding, sorted by key.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.0 {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }

    pub fn parse(encoded: &str) -> Result<Self, Error> {
        validate_escapes(encoded)?;
        let mut form = Self::new();
        for (key, value) in form_urlencoded::parse(encoded.as_bytes()) {
            form.add(&key, &value);
        }
        Ok(form)
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Form {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut form = Self::new();
        for (key, value) in iter {
            form.add(key, value);
        }
        form
    }
}

/// Rejects what a lenient decoder would silently repair: stray `%` escapes and `;`
/// separators.
fn validate_escapes(encoded: &str) -> Result<(), Error> {
    let bytes = encoded.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let escape = bytes.get(i + 1..i + 3);
                match escape {
                    Some([a, b]) if a.is_ascii_hexdigit() && b.is_ascii_hexdigit() => i += 3,
                    _ => {
                        return Err(Error::malformed(
                            "EncodedForm",
                            format!("invalid escape at byte {}", i),
                        ))
                    }
                }
            }
            b';' => {
                return Err(Error::malformed(
                    "EncodedForm",
                    "semicolon separators are not allowed",
                ))
            }
            _ => i += 1,
        }
    }
    Ok(())
}
