//! Persisted authorization and token requests.
//!
//! A [`Requester`] is the record of one in-flight or completed exchange. It is stored under
//! the entity kind of its [`RequestKind`], keyed by the signature the protocol engine derives
//! from the issued credential. The client is referenced by ID only and re-attached on load.

use std::time::SystemTime;

use url::Url;

use crate::core::client::Client;
use crate::core::form::Form;
use crate::core::redirect;
use crate::core::session::{self, Restore, Session};
use crate::core::types::{Arguments, ClientId, RequestKind, Signature};
use crate::db::{Key, Properties, Record};
use crate::provider::error::Error;

/// Toggles the soft-delete flag of a stored request.
pub trait ActiveState {
    fn is_active(&self) -> bool;
    fn set_active(&mut self, active: bool);
}

/// Holds a reference to the client a request was made by.
pub trait ClientBinding {
    fn client_id(&self) -> &ClientId;
    fn set_client(&mut self, client: Client);
}

/// Rebuilds the session of a loaded request into a caller-chosen container.
pub trait SessionRestore {
    fn restore_session(&mut self, container: Box<dyn Session>) -> Result<Restore, Error>;
}

#[derive(Debug, Clone)]
pub struct Requester {
    kind: RequestKind,
    pub id: String,
    pub requested_at: Option<SystemTime>,
    client_id: ClientId,
    client: Option<Client>,
    requested_scope: Arguments,
    granted_scope: Arguments,
    requested_audience: Arguments,
    granted_audience: Arguments,
    pub form: Form,
    session: Option<Box<dyn Session>>,
    session_data: Vec<u8>,
    pub grant_types: Arguments,
    handled_grant_type: Arguments,
    pub response_types: Arguments,
    redirect_uri: String,
    pub state: String,
    handled_response_types: Vec<String>,
    active: bool,
    created_at: Option<SystemTime>,
    updated_at: Option<SystemTime>,
}

impl Requester {
    /// A new, active request made now.
    pub fn new(kind: RequestKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            requested_at: Some(SystemTime::now()),
            client_id: ClientId::default(),
            client: None,
            requested_scope: Arguments::new(),
            granted_scope: Arguments::new(),
            requested_audience: Arguments::new(),
            granted_audience: Arguments::new(),
            form: Form::new(),
            session: None,
            session_data: Vec::new(),
            grant_types: Arguments::new(),
            handled_grant_type: Arguments::new(),
            response_types: Arguments::new(),
            redirect_uri: String::new(),
            state: String::new(),
            handled_response_types: Vec::new(),
            active: true,
            created_at: None,
            updated_at: None,
        }
    }

    /// Copies this request into another namespace, as a fresh active record. Used when an
    /// authorization code request is carried over into the tokens issued for it.
    pub fn derive(&self, kind: RequestKind) -> Self {
        let mut derived = self.clone();
        derived.kind = kind;
        derived.active = true;
        derived.created_at = None;
        derived.updated_at = None;
        derived
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn key(&self, signature: &Signature) -> Key {
        request_key(self.kind, signature)
    }

    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    pub fn session(&self) -> Option<&dyn Session> {
        self.session.as_deref()
    }

    /// The attached session, if it is a `T`.
    pub fn session_as<T: Session>(&self) -> Option<&T> {
        self.session
            .as_ref()
            .and_then(|s| s.as_any().downcast_ref::<T>())
    }

    pub fn set_session(&mut self, session: Box<dyn Session>) {
        self.session = Some(session);
    }

    pub fn requested_scopes(&self) -> &Arguments {
        &self.requested_scope
    }

    pub fn granted_scopes(&self) -> &Arguments {
        &self.granted_scope
    }

    pub fn requested_audience(&self) -> &Arguments {
        &self.requested_audience
    }

    pub fn granted_audience(&self) -> &Arguments {
        &self.granted_audience
    }

    pub fn append_requested_scope(&mut self, scope: &str) {
        self.requested_scope.append(scope);
    }

    pub fn append_requested_audience(&mut self, audience: &str) {
        self.requested_audience.append(audience);
    }

    pub fn grant_scope(&mut self, scope: &str) {
        self.granted_scope.append(scope);
    }

    pub fn grant_audience(&mut self, audience: &str) {
        self.granted_audience.append(audience);
    }

    pub fn set_requested_scopes(&mut self, scopes: &Arguments) {
        self.requested_scope.clear();
        for scope in scopes.iter() {
            self.append_requested_scope(scope);
        }
    }

    pub fn set_requested_audience(&mut self, audience: &Arguments) {
        self.requested_audience.clear();
        for a in audience.iter() {
            self.append_requested_audience(a);
        }
    }

    pub fn handled_grant_type(&self) -> &Arguments {
        &self.handled_grant_type
    }

    pub fn set_grant_type_handled(&mut self, grant_type: &str) {
        self.handled_grant_type.append(grant_type);
    }

    pub fn handled_response_types(&self) -> &[String] {
        &self.handled_response_types
    }

    /// Records a handled response type. Repeats are kept in the order they were handled.
    pub fn set_response_type_handled(&mut self, response_type: &str) {
        self.handled_response_types.push(response_type.to_string());
    }

    /// True when there was something to handle and every requested response type was.
    pub fn did_handle_all_response_types(&self) -> bool {
        !self.response_types.is_empty()
            && self
                .response_types
                .iter()
                .all(|rt| self.handled_response_types.iter().any(|h| h.as_str() == rt))
    }

    pub fn raw_redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn set_redirect_uri(&mut self, uri: &str) {
        self.redirect_uri = uri.to_string();
    }

    /// The parsed redirect URI. Empty and unparsable values both read as `None`.
    pub fn redirect_uri(&self) -> Option<Url> {
        if self.redirect_uri.is_empty() {
            return None;
        }
        Url::parse(&self.redirect_uri).ok()
    }

    pub fn is_redirect_uri_valid(&self) -> bool {
        if self.redirect_uri().is_none() {
            return false;
        }
        let client = match &self.client {
            Some(client) => client,
            None => return false,
        };
        match redirect::match_redirect_uri(&self.redirect_uri, &client.redirect_uris) {
            Some(matched) => redirect::is_valid_redirect_uri(&matched),
            None => false,
        }
    }

    /// Folds `other` into this request. Scopes and audiences are unioned; the requesting
    /// time, client and session are taken from `other`; form values of `other` win per key.
    pub fn merge(&mut self, other: &Requester) {
        for scope in other.requested_scope.iter() {
            self.append_requested_scope(scope);
        }
        for scope in other.granted_scope.iter() {
            self.grant_scope(scope);
        }
        for aud in other.requested_audience.iter() {
            self.append_requested_audience(aud);
        }
        for aud in other.granted_audience.iter() {
            self.grant_audience(aud);
        }

        self.requested_at = other.requested_at;
        self.client = other.client.clone();
        self.client_id = other.client_id.clone();
        self.session = other.session.clone();

        for (key, values) in other.form.iter() {
            self.form.set(key, values.to_vec());
        }
    }

    /// A detached copy whose form holds only the first value of each allowed key.
    pub fn sanitize(&self, allowed: &[&str]) -> Requester {
        let mut sanitized = self.clone();
        let mut form = Form::new();
        for (key, values) in self.form.iter() {
            if !allowed.contains(&key) {
                continue;
            }
            if let Some(first) = values.first() {
                form.add(key, first);
            }
        }
        sanitized.form = form;
        sanitized
    }

    pub fn created_at(&self) -> Option<SystemTime> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<SystemTime> {
        self.updated_at
    }

    /// Loads a request and restores its session into `container` in one step.
    pub fn load_with_session(
        key: &Key,
        props: Properties,
        container: Box<dyn Session>,
    ) -> Result<Self, Error> {
        let mut requester = Self::load(key, props)?;
        requester.restore_session(container)?;
        Ok(requester)
    }
}

pub fn request_key(kind: RequestKind, signature: &Signature) -> Key {
    Key::new(kind.entity_kind(), signature.as_str())
}

impl ActiveState for Requester {
    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

impl ClientBinding for Requester {
    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn set_client(&mut self, client: Client) {
        self.client_id = client.id.clone();
        self.client = Some(client);
    }
}

impl SessionRestore for Requester {
    fn restore_session(&mut self, mut container: Box<dyn Session>) -> Result<Restore, Error> {
        let restored = session::decode(Some(self.session_data.as_slice()), container.as_mut())?;
        self.session = match restored {
            Restore::Restored => Some(container),
            Restore::Empty => None,
        };
        Ok(restored)
    }
}

impl Record for Requester {
    fn save(&mut self) -> Result<Properties, Error> {
        let now = SystemTime::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);

        if let Some(client) = &self.client {
            self.client_id = client.id.clone();
        }
        if let Some(session) = &self.session {
            self.session_data = session::encode(&**session)?;
        }

        let mut props = Properties::new();
        props.set("ID", self.id.as_str());
        props.set("RequestedAt", self.requested_at);
        props.set("ClientID", self.client_id.as_str());
        props.set("RequestedScope", &self.requested_scope);
        props.set("GrantedScope", &self.granted_scope);
        props.set_unindexed("EncodedForm", self.form.encode());
        props.set_unindexed("Session", self.session_data.clone());
        props.set("RequestedAudience", &self.requested_audience);
        props.set("GrantedAudience", &self.granted_audience);
        props.set("GrantTypes", &self.grant_types);
        props.set("HandledGrantType", &self.handled_grant_type);
        props.set("ResponseTypes", &self.response_types);
        props.set("RedirectURI", self.redirect_uri.as_str());
        props.set("State", self.state.as_str());
        props.set("HandledResponseTypes", self.handled_response_types.as_slice());
        props.set("Active", self.active);
        props.set("UpdatedAt", self.updated_at);
        props.set("CreatedAt", self.created_at);
        Ok(props)
    }

    fn load(key: &Key, props: Properties) -> Result<Self, Error> {
        let kind = RequestKind::from_entity_kind(key.kind())
            .ok_or_else(|| Error::UnsupportedType(key.kind().to_string()))?;

        Ok(Self {
            kind,
            id: props.string("ID")?,
            requested_at: props.timestamp("RequestedAt")?,
            client_id: ClientId(props.string("ClientID")?),
            client: None,
            requested_scope: props.arguments("RequestedScope")?,
            granted_scope: props.arguments("GrantedScope")?,
            requested_audience: props.arguments("RequestedAudience")?,
            granted_audience: props.arguments("GrantedAudience")?,
            form: Form::parse(&props.string("EncodedForm")?)?,
            session: None,
            session_data: props.bytes("Session")?,
            grant_types: props.arguments("GrantTypes")?,
            handled_grant_type: props.arguments("HandledGrantType")?,
            response_types: props.arguments("ResponseTypes")?,
            redirect_uri: props.string("RedirectURI")?,
            state: props.string("State")?,
            handled_response_types: props.strings("HandledResponseTypes")?,
            active: props.bool("Active")?,
            created_at: props.timestamp("CreatedAt")?,
            updated_at: props.timestamp("UpdatedAt")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::OpenIdSession;
    use crate::core::types::HashedClientSecret;
    use crate::db::Entity;

    fn client(redirect_uris: &[&str]) -> Client {
        let mut client = Client::new(ClientId::from("my-client"), HashedClientSecret::default());
        client.redirect_uris = redirect_uris.iter().map(|u| u.to_string()).collect();
        client
    }

    fn round_trip(requester: &mut Requester) -> Requester {
        let sig = Signature::from("sig");
        let entity = Entity::from_record(requester.key(&sig), requester).unwrap();
        entity.into_record().unwrap()
    }

    #[test]
    fn granting_twice_stores_once() {
        let mut req = Requester::new(RequestKind::AuthorizeCode, "req-1");
        req.append_requested_scope("openid");
        req.append_requested_scope("photos");
        req.grant_scope("openid");
        req.grant_scope("openid");

        let loaded = round_trip(&mut req);
        assert_eq!(loaded.granted_scopes().as_parts(), &["openid"]);
        assert_eq!(loaded.requested_scopes().as_parts(), &["openid", "photos"]);
    }

    #[test]
    fn form_survives_storage() {
        let mut req = Requester::new(RequestKind::AccessToken, "req");
        req.form = vec![
            ("state", "abc"),
            ("code", "xyz"),
            ("scope", "openid offline"),
            ("scope", "photos"),
        ]
        .into_iter()
        .collect();

        let loaded = round_trip(&mut req);
        assert_eq!(loaded.form, req.form);
        assert_eq!(loaded.form.keys().collect::<Vec<_>>(), vec!["code", "scope", "state"]);
    }

    #[test]
    fn corrupt_form_fails_the_load() {
        let mut req = Requester::new(RequestKind::AccessToken, "req");
        let mut props = req.save().unwrap();
        props.set_unindexed("EncodedForm", "code=%zz");
        let err = Requester::load(&Key::new("AccessTokenRequest", "sig"), props).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn unknown_entity_kind_is_unsupported() {
        let mut req = Requester::new(RequestKind::AccessToken, "req");
        let props = req.save().unwrap();
        let err = Requester::load(&Key::new("Client", "sig"), props).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));
    }

    #[test]
    fn client_id_follows_the_attached_client() {
        let mut req = Requester::new(RequestKind::AccessToken, "req");
        req.set_client(client(&[]));
        let mut loaded = round_trip(&mut req);
        assert_eq!(loaded.client_id().as_str(), "my-client");
        assert!(loaded.client().is_none());

        // Saving again without re-attaching keeps the reference.
        loaded.set_active(false);
        let reloaded = round_trip(&mut loaded);
        assert_eq!(reloaded.client_id().as_str(), "my-client");
        assert!(!reloaded.is_active());
    }

    #[test]
    fn session_bytes_kept_when_no_session_attached() {
        let mut req = Requester::new(RequestKind::AccessToken, "req");
        req.set_session(Box::new(OpenIdSession::new("user-1")));
        let mut loaded = round_trip(&mut req);

        // Not restored, so nothing is attached; the stored bytes must survive a resave.
        let mut reloaded = round_trip(&mut loaded);
        let restored = reloaded
            .restore_session(Box::new(OpenIdSession::default()))
            .unwrap();
        assert_eq!(restored, Restore::Restored);
        assert_eq!(
            reloaded.session_as::<OpenIdSession>().unwrap().subject,
            "user-1"
        );
    }

    #[test]
    fn restore_without_stored_session_is_empty() {
        let mut req = Requester::new(RequestKind::AccessToken, "req");
        let mut loaded = round_trip(&mut req);
        let restored = loaded
            .restore_session(Box::new(OpenIdSession::new("ignored")))
            .unwrap();
        assert_eq!(restored, Restore::Empty);
        assert!(loaded.session().is_none());
    }

    #[test]
    fn sanitize_returns_detached_form() {
        let mut req = Requester::new(RequestKind::AuthorizeCode, "req-2");
        req.form = vec![("code", "xyz"), ("code", "second"), ("state", "abc")]
            .into_iter()
            .collect();

        let mut sanitized = req.sanitize(&["code"]);
        assert_eq!(sanitized.form.keys().collect::<Vec<_>>(), vec!["code"]);
        assert_eq!(sanitized.form.get_all("code"), &["xyz"]);

        sanitized.form.add("injected", "1");
        sanitized.form.remove("code");
        assert_eq!(req.form.get("code"), Some("xyz"));
        assert_eq!(req.form.get("state"), Some("abc"));
        assert!(!req.form.contains_key("injected"));
    }

    #[test]
    fn merge_unions_and_overrides() {
        let mut base = Requester::new(RequestKind::AuthorizeCode, "base");
        base.append_requested_scope("openid");
        base.form.add("state", "old");
        base.form.add("nonce", "n");

        let mut other = Requester::new(RequestKind::AuthorizeCode, "other");
        other.append_requested_scope("photos");
        other.append_requested_scope("openid");
        other.grant_audience("api");
        other.form.add("state", "new");
        other.set_client(client(&[]));
        other.set_session(Box::new(OpenIdSession::new("sub")));

        base.merge(&other);
        assert_eq!(base.requested_scopes().as_parts(), &["openid", "photos"]);
        assert_eq!(base.granted_audience().as_parts(), &["api"]);
        assert_eq!(base.form.get("state"), Some("new"));
        assert_eq!(base.form.get("nonce"), Some("n"));
        assert_eq!(base.requested_at, other.requested_at);
        assert_eq!(base.client_id().as_str(), "my-client");
        assert!(base.session_as::<OpenIdSession>().is_some());
        assert_eq!(base.id, "base");
    }

    #[test]
    fn redirect_uri_validity_fails_closed() {
        let mut req = Requester::new(RequestKind::AuthorizeCode, "req");
        assert!(!req.is_redirect_uri_valid());

        req.set_redirect_uri("https://host/callback");
        assert!(!req.is_redirect_uri_valid(), "no client attached");

        req.set_client(client(&["https://host/other"]));
        assert!(!req.is_redirect_uri_valid(), "not registered");

        req.set_client(client(&["https://host/callback"]));
        assert!(req.is_redirect_uri_valid());

        req.set_redirect_uri("not a uri");
        assert!(req.redirect_uri().is_none());
        assert!(!req.is_redirect_uri_valid());
    }

    #[test]
    fn registered_uri_matches_verbatim_before_normalization() {
        for uri in &[
            "https://host",
            "https://Host/cb",
            "https://host:443/cb",
            "https://host/cb?a=b c",
        ] {
            let mut req = Requester::new(RequestKind::AuthorizeCode, "req");
            req.set_redirect_uri(uri);
            req.set_client(client(&[*uri]));
            assert!(req.is_redirect_uri_valid(), "{} should match itself", uri);
        }

        let mut req = Requester::new(RequestKind::AuthorizeCode, "req");
        req.set_redirect_uri("https://host/");
        req.set_client(client(&["https://host"]));
        assert!(!req.is_redirect_uri_valid());
    }

    #[test]
    fn fresh_unattached_request_stores_no_client() {
        let mut req = Requester::new(RequestKind::AccessToken, "req");
        let props = req.save().unwrap();
        assert_eq!(props.string("ClientID").unwrap(), "");

        let loaded = round_trip(&mut req);
        assert!(loaded.client_id().is_empty());
        assert!(loaded.client().is_none());
    }

    #[test]
    fn handled_response_types_keep_repeats() {
        let mut req = Requester::new(RequestKind::AuthorizeCode, "req");
        req.set_response_type_handled("code");
        req.set_response_type_handled("token");
        req.set_response_type_handled("code");

        let loaded = round_trip(&mut req);
        assert_eq!(loaded.handled_response_types(), &["code", "token", "code"]);
    }

    #[test]
    fn registered_uri_with_fragment_is_invalid() {
        let mut req = Requester::new(RequestKind::AuthorizeCode, "req");
        req.set_redirect_uri("https://host/cb#frag");
        req.set_client(client(&["https://host/cb#frag"]));
        assert!(!req.is_redirect_uri_valid());
    }

    #[test]
    fn all_response_types_handled() {
        let mut req = Requester::new(RequestKind::AuthorizeCode, "req");
        assert!(!req.did_handle_all_response_types());

        req.response_types = Arguments::from_delimited_parts("code id_token");
        req.set_response_type_handled("code");
        assert!(!req.did_handle_all_response_types());
        req.set_response_type_handled("id_token");
        assert!(req.did_handle_all_response_types());
    }

    #[test]
    fn derive_starts_a_fresh_active_record() {
        let mut code = Requester::new(RequestKind::AuthorizeCode, "req");
        code.grant_scope("openid");
        code.save().unwrap();
        code.set_active(false);

        let access = code.derive(RequestKind::AccessToken);
        assert_eq!(access.kind(), RequestKind::AccessToken);
        assert!(access.is_active());
        assert!(access.created_at().is_none());
        assert_eq!(access.granted_scopes().as_parts(), &["openid"]);
        assert_eq!(access.id, "req");
    }
}
