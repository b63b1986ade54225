use std::fmt;
use std::iter::FromIterator;
use std::str::FromStr;

/// Ordered, duplicate-free list of protocol arguments (scopes, audiences, grant types,
/// response types). Insertion order is kept; re-adding an element is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct Arguments(Vec<String>);

impl Arguments {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_delimited_parts(parts: &str) -> Self {
        parts.split(' ').filter(|p| !p.is_empty()).collect()
    }

    /// Appends `arg` unless it is already present. Returns whether it was added.
    pub fn append(&mut self, arg: impl Into<String>) -> bool {
        let arg = arg.into();
        if self.contains(&arg) {
            return false;
        }
        self.0.push(arg);
        true
    }

    pub fn contains(&self, arg: &str) -> bool {
        self.0.iter().any(|a| a == arg)
    }

    pub fn contains_all(&self, other: &Arguments) -> bool {
        other.iter().all(|a| self.contains(a))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_joined(&self) -> String {
        self.0.join(" ")
    }

    pub fn as_parts(&self) -> &[String] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<S: Into<String>> FromIterator<S> for Arguments {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut args = Self::new();
        for arg in iter {
            args.append(arg);
        }
        args
    }
}

impl<'a> IntoIterator for &'a Arguments {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ClientId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(serde::Deserialize)]
#[serde(transparent)]
pub struct ClientSecret(pub String);

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(..)")
    }
}

impl AsRef<str> for ClientSecret {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Default, Eq, PartialEq)]
pub struct HashedClientSecret(pub String);

impl fmt::Debug for HashedClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashedClientSecret(..)")
    }
}

impl From<String> for HashedClientSecret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for HashedClientSecret {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Storage key of a token-bound request, as derived by the protocol engine's token strategy.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Signature(pub String);

impl Signature {
    /// Signature part of an HMAC-style `<key>.<signature>` token.
    pub fn of_token(token: &str) -> Self {
        let sig = token.rsplit('.').next().unwrap_or(token);
        Self(sig.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "Signature({}..)", prefix)
    }
}

impl From<&str> for Signature {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which storage namespace a request belongs to. Each kind is its own entity kind in the
/// document store, and storage operations check the tag of the request they are handed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    AuthorizeCode,
    AccessToken,
    RefreshToken,
    OpenIdConnect,
    Pkce,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::AuthorizeCode,
        RequestKind::AccessToken,
        RequestKind::RefreshToken,
        RequestKind::OpenIdConnect,
        RequestKind::Pkce,
    ];

    pub fn entity_kind(self) -> &'static str {
        match self {
            RequestKind::AuthorizeCode => "AuthorizeCodeRequest",
            RequestKind::AccessToken => "AccessTokenRequest",
            RequestKind::RefreshToken => "RefreshTokenRequest",
            RequestKind::OpenIdConnect => "OpenIdConnectRequest",
            RequestKind::Pkce => "PkceRequest",
        }
    }

    pub fn from_entity_kind(kind: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.entity_kind() == kind)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_keep_first_seen_order() {
        let mut args: Arguments = vec!["openid", "photos", "openid"].into_iter().collect();
        assert!(!args.append("photos"));
        assert!(args.append("offline"));
        assert_eq!(args.as_parts(), &["openid", "photos", "offline"]);
    }

    #[test]
    fn delimited_parts_skip_empty_segments() {
        let args = Arguments::from_delimited_parts("openid  photos ");
        assert_eq!(args.as_joined(), "openid photos");
    }

    #[test]
    fn signature_of_hmac_token() {
        assert_eq!(Signature::of_token("key.sig").as_str(), "sig");
        assert_eq!(Signature::of_token("opaque").as_str(), "opaque");
    }

    #[test]
    fn entity_kind_round_trip() {
        for kind in RequestKind::ALL.iter() {
            assert_eq!(RequestKind::from_entity_kind(kind.entity_kind()), Some(*kind));
        }
        assert_eq!(RequestKind::from_entity_kind("Client"), None);
    }
}
