//! Opaque, caller-typed session payloads.
//!
//! The store never knows the concrete session type. Callers restore a session by handing
//! in an empty container of the shape they expect, and the stored bytes are decoded into it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::types::RequestKind;
use crate::provider::error::Error;

/// Session capability. Implemented for every serde-serializable, cloneable type.
pub trait Session: Any + Debug + Send + Sync {
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error>;
    /// Replaces `self` with the decoded value. On error `self` is left unchanged.
    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error>;
    fn clone_session(&self) -> Box<dyn Session>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> Session for T
where
    T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static,
{
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn clone_session(&self) -> Box<dyn Session> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Clone for Box<dyn Session> {
    fn clone(&self) -> Self {
        (**self).clone_session()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restore {
    Restored,
    /// Nothing was stored; the container was not touched.
    Empty,
}

pub fn encode(session: &dyn Session) -> Result<Vec<u8>, Error> {
    session.encode().map_err(|e| Error::malformed("Session", e))
}

pub fn decode(bytes: Option<&[u8]>, into: &mut dyn Session) -> Result<Restore, Error> {
    match bytes {
        None => Ok(Restore::Empty),
        Some(b) if b.is_empty() => Ok(Restore::Empty),
        Some(b) => {
            into.decode(b).map_err(|e| Error::malformed("Session", e))?;
            Ok(Restore::Restored)
        }
    }
}

/// ID token claims carried by an OpenID Connect session.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub audience: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// General-purpose session for OpenID Connect flows.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OpenIdSession {
    #[serde(default)]
    pub claims: IdTokenClaims,
    #[serde(default)]
    pub headers: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub expires_at: HashMap<RequestKind, SystemTime>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub subject: String,
}

impl OpenIdSession {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            claims: IdTokenClaims {
                subject: subject.to_string(),
                ..IdTokenClaims::default()
            },
            ..Self::default()
        }
    }

    pub fn set_expires_at(&mut self, kind: RequestKind, at: SystemTime) {
        self.expires_at.insert(kind, at);
    }

    pub fn expires_at(&self, kind: RequestKind) -> Option<SystemTime> {
        self.expires_at.get(&kind).copied()
    }
}
