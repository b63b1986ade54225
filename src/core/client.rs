use std::time::SystemTime;

use crate::core::types::{Arguments, ClientId, HashedClientSecret};
use crate::db::{Key, Properties, Record};
use crate::provider::error::Error;

pub const CLIENT_KIND: &str = "Client";

const DEFAULT_GRANT_TYPE: &str = "authorization_code";
const DEFAULT_RESPONSE_TYPE: &str = "code";

/// A JSON Web Key. Key material beyond the common header parameters is kept as-is.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    pub fn key(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

/// A registered OAuth 2.0 / OpenID Connect client.
///
/// The list accessors substitute protocol defaults on read; the stored lists are kept as
/// configured, so an empty list stays empty in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Client {
    pub id: ClientId,
    secret: HashedClientSecret,
    pub redirect_uris: Vec<String>,
    pub grant_types: Arguments,
    pub response_types: Arguments,
    pub scopes: Arguments,
    pub audience: Arguments,
    pub public: bool,
    pub jwks_uri: String,
    pub jwks: Option<JsonWebKeySet>,
    pub token_endpoint_auth_method: String,
    pub request_uris: Vec<String>,
    pub request_object_signing_algorithm: String,
    created_at: Option<SystemTime>,
    updated_at: Option<SystemTime>,
}

impl Client {
    pub fn new(id: ClientId, secret: HashedClientSecret) -> Self {
        Self {
            id,
            secret,
            ..Self::default()
        }
    }

    pub fn key(&self) -> Key {
        client_key(&self.id)
    }

    pub fn set_hashed_secret(&mut self, secret: HashedClientSecret) {
        self.secret = secret;
    }

    pub(crate) fn hashed_secret(&self) -> &HashedClientSecret {
        &self.secret
    }

    pub fn grant_types(&self) -> Arguments {
        if self.grant_types.is_empty() {
            return Arguments::from_delimited_parts(DEFAULT_GRANT_TYPE);
        }
        self.grant_types.clone()
    }

    pub fn response_types(&self) -> Arguments {
        if self.response_types.is_empty() {
            return Arguments::from_delimited_parts(DEFAULT_RESPONSE_TYPE);
        }
        self.response_types.clone()
    }

    pub fn scopes(&self) -> &Arguments {
        &self.scopes
    }

    pub fn token_endpoint_auth_signing_algorithm(&self) -> &'static str {
        "RS256"
    }

    pub fn created_at(&self) -> Option<SystemTime> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<SystemTime> {
        self.updated_at
    }
}

pub fn client_key(id: &ClientId) -> Key {
    Key::new(CLIENT_KIND, id.as_str())
}

impl Record for Client {
    fn save(&mut self) -> Result<Properties, Error> {
        let now = SystemTime::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);

        let jwks = match &self.jwks {
            Some(set) => {
                serde_json::to_string(set).map_err(|e| Error::malformed("JSONWebKeysJSON", e))?
            }
            None => String::new(),
        };

        let mut props = Properties::new();
        props.set_unindexed("Secret", self.secret.0.as_bytes().to_vec());
        props.set("RedirectURIs", self.redirect_uris.as_slice());
        props.set("GrantTypes", &self.grant_types);
        props.set("ResponseTypes", &self.response_types);
        props.set("Scopes", &self.scopes);
        props.set("Audience", &self.audience);
        props.set("Public", self.public);
        props.set("JSONWebKeysURI", self.jwks_uri.as_str());
        props.set_unindexed("JSONWebKeysJSON", jwks);
        props.set(
            "TokenEndpointAuthMethod",
            self.token_endpoint_auth_method.as_str(),
        );
        props.set("RequestURIs", self.request_uris.as_slice());
        props.set(
            "RequestObjectSigningAlgorithm",
            self.request_object_signing_algorithm.as_str(),
        );
        props.set("UpdatedAt", self.updated_at);
        props.set("CreatedAt", self.created_at);
        Ok(props)
    }

    fn load(key: &Key, props: Properties) -> Result<Self, Error> {
        if key.kind() != CLIENT_KIND {
            return Err(Error::UnsupportedType(key.kind().to_string()));
        }

        let secret = String::from_utf8(props.bytes("Secret")?)
            .map_err(|e| Error::malformed("Secret", e))?;
        let jwks = match props.string("JSONWebKeysJSON")? {
            s if s.is_empty() => None,
            s => Some(
                serde_json::from_str(&s).map_err(|e| Error::malformed("JSONWebKeysJSON", e))?,
            ),
        };

        Ok(Self {
            id: ClientId(key.name().to_string()),
            secret: HashedClientSecret(secret),
            redirect_uris: props.strings("RedirectURIs")?,
            grant_types: props.arguments("GrantTypes")?,
            response_types: props.arguments("ResponseTypes")?,
            scopes: props.arguments("Scopes")?,
            audience: props.arguments("Audience")?,
            public: props.bool("Public")?,
            jwks_uri: props.string("JSONWebKeysURI")?,
            jwks,
            token_endpoint_auth_method: props.string("TokenEndpointAuthMethod")?,
            request_uris: props.strings("RequestURIs")?,
            request_object_signing_algorithm: props.string("RequestObjectSigningAlgorithm")?,
            created_at: props.timestamp("CreatedAt")?,
            updated_at: props.timestamp("UpdatedAt")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Entity;

    fn jwks() -> JsonWebKeySet {
        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "kid": "key-1",
                "use": "sig",
                "alg": "RS256",
                "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
                "e": "AQAB"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn accessors_default_on_read_only() {
        let mut client = Client::new(ClientId::from("my-client"), HashedClientSecret::default());
        assert_eq!(client.grant_types().as_joined(), "authorization_code");
        assert_eq!(client.response_types().as_joined(), "code");

        let props = client.save().unwrap();
        assert!(props.strings("GrantTypes").unwrap().is_empty());
        assert!(props.strings("ResponseTypes").unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut client = Client::new(
            ClientId::from("my-client"),
            HashedClientSecret("$argon2i$v=19$m=4096,t=3,p=1$c2FsdA$aGFzaA".to_string()),
        );
        client.redirect_uris = vec!["https://host/callback".to_string()];
        client.grant_types = Arguments::from_delimited_parts("authorization_code refresh_token");
        client.scopes = Arguments::from_delimited_parts("openid offline");
        client.jwks = Some(jwks());
        client.request_uris = vec!["https://host/request.jwt".to_string()];

        let entity = Entity::from_record(client.key(), &mut client).unwrap();
        assert_eq!(entity.key.name(), "my-client");
        assert!(entity.properties.get("ID").is_none());

        let loaded: Client = entity.into_record().unwrap();
        assert_eq!(loaded, client);
        assert_eq!(loaded.jwks.unwrap().key("key-1").unwrap().params["e"], "AQAB");
    }

    #[test]
    fn created_at_is_kept_across_saves() {
        let mut client = Client::new(ClientId::from("c"), HashedClientSecret::default());
        client.save().unwrap();
        let created = client.created_at();
        let first_update = client.updated_at().unwrap();
        client.save().unwrap();
        assert_eq!(client.created_at(), created);
        assert!(client.updated_at().unwrap() >= first_update);
    }

    #[test]
    fn removing_the_key_set_clears_its_json() {
        let mut client = Client::new(ClientId::from("c"), HashedClientSecret::default());
        client.jwks = Some(jwks());
        assert!(!client.save().unwrap().string("JSONWebKeysJSON").unwrap().is_empty());
        client.jwks = None;
        assert!(client.save().unwrap().string("JSONWebKeysJSON").unwrap().is_empty());
    }

    #[test]
    fn unparsable_key_set_fails_the_load() {
        let mut client = Client::new(ClientId::from("c"), HashedClientSecret::default());
        let mut props = client.save().unwrap();
        props.set_unindexed("JSONWebKeysJSON", "{not json");

        let err = Client::load(&client.key(), props).unwrap_err();
        assert!(matches!(err, Error::Malformed { ref field, .. } if field == "JSONWebKeysJSON"));
    }
}
