//! Storage capabilities consumed by an OAuth 2.0 / OpenID Connect protocol engine.
//!
//! [`Storage`] is constructed once from a [`StorageConfig`] and shared by reference. It
//! implements every capability trait below on top of a [`Datastore`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::client::Client;
use crate::core::requester::Requester;
use crate::core::session::Session;
use crate::core::types::{ClientId, ClientSecret, HashedClientSecret, RequestKind, Signature};
use crate::db::Datastore;
use crate::util::context::Context;
use crate::util::hash::HashingService;
use crate::util::random::random_string;

pub mod client;
pub mod error;
pub mod requests;
pub mod revocation;
pub mod transaction;

pub use error::{Error, Result};
pub use revocation::RevocationIndex;
pub use transaction::TransactionManager;

#[async_trait]
pub trait ClientManager {
    async fn get_client(&self, ctx: &Context, id: &ClientId) -> Result<Client>;
    /// Stores a new client. Fails with `Error::Conflict` if the ID is taken.
    async fn create_client(&self, ctx: &Context, client: &mut Client) -> Result<()>;
    /// Replaces a stored client. Fails with `Error::NotFound` if there is none.
    async fn update_client(&self, ctx: &Context, client: &mut Client) -> Result<()>;
    /// Checks a client's credentials. An unknown client and a wrong secret are
    /// indistinguishable: both yield `Error::NotFound`.
    async fn authenticate_client(
        &self,
        ctx: &Context,
        id: &ClientId,
        secret: &ClientSecret,
    ) -> Result<Client>;
}

#[async_trait]
pub trait AuthorizeCodeStorage {
    async fn create_authorize_code_session(
        &self,
        ctx: &Context,
        code: &Signature,
        request: &mut Requester,
    ) -> Result<()>;
    /// Loads the request behind a code. An invalidated code yields `Error::Inactive`
    /// carrying the request.
    async fn get_authorize_code_session(
        &self,
        ctx: &Context,
        code: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester>;
    /// Marks the code as used. Succeeds at most once per code.
    async fn invalidate_authorize_code_session(&self, ctx: &Context, code: &Signature)
        -> Result<()>;
}

#[async_trait]
pub trait AccessTokenStorage {
    async fn create_access_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        request: &mut Requester,
    ) -> Result<()>;
    async fn get_access_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester>;
    async fn revoke_access_token_session(&self, ctx: &Context, signature: &Signature)
        -> Result<()>;
}

#[async_trait]
pub trait RefreshTokenStorage {
    async fn create_refresh_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        request: &mut Requester,
    ) -> Result<()>;
    async fn get_refresh_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester>;
    async fn revoke_refresh_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
    ) -> Result<()>;
}

/// ID token requests, keyed by the authorization code they were issued with.
#[async_trait]
pub trait OpenIdConnectRequestStorage {
    async fn create_open_id_connect_session(
        &self,
        ctx: &Context,
        code: &Signature,
        request: &mut Requester,
    ) -> Result<()>;
    async fn get_open_id_connect_session(
        &self,
        ctx: &Context,
        code: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester>;
    async fn delete_open_id_connect_session(&self, ctx: &Context, code: &Signature)
        -> Result<()>;
}

#[async_trait]
pub trait PkceRequestStorage {
    async fn create_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        request: &mut Requester,
    ) -> Result<()>;
    async fn get_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester>;
    async fn delete_pkce_request_session(&self, ctx: &Context, signature: &Signature)
        -> Result<()>;
}

#[async_trait]
pub trait ResourceOwnerPasswordCredentialsStorage {
    async fn authenticate(&self, ctx: &Context, username: &str, secret: &str) -> Result<()>;
}

#[async_trait]
pub trait TokenRevocationStorage {
    /// Revokes every access token issued for the request `request_id`.
    async fn revoke_access_token(&self, ctx: &Context, request_id: &str) -> Result<usize>;
    /// Revokes every refresh token issued for the request `request_id`.
    async fn revoke_refresh_token(&self, ctx: &Context, request_id: &str) -> Result<usize>;
    async fn revoke_token_by_signature(
        &self,
        ctx: &Context,
        kind: RequestKind,
        signature: &Signature,
    ) -> Result<()>;
    async fn revoke_client_tokens(&self, ctx: &Context, client_id: &ClientId) -> Result<usize>;
}

#[async_trait]
pub trait TokenIntrospectionStorage {
    /// Finds the active request a token signature belongs to, trying `hint` first.
    async fn lookup_token(
        &self,
        ctx: &Context,
        signature: &Signature,
        hint: Option<RequestKind>,
        session: Box<dyn Session>,
    ) -> Result<Requester>;
}

/// Verifies resource owner credentials. The storage layer holds no user records itself.
#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    /// Returns `Error::NotFound` when the credentials are not accepted.
    async fn authenticate(&self, ctx: &Context, username: &str, secret: &str) -> Result<()>;
}

/// Adapts a plain credential check into a [`UserAuthenticator`].
pub struct FnAuthenticator<F>(pub F);

#[async_trait]
impl<F> UserAuthenticator for FnAuthenticator<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    async fn authenticate(&self, _ctx: &Context, username: &str, secret: &str) -> Result<()> {
        if (self.0)(username, secret) {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }
}

pub struct StorageConfig {
    pub datastore: Arc<dyn Datastore>,
    pub hasher: HashingService,
    pub authenticate_user: Arc<dyn UserAuthenticator>,
}

pub struct Storage {
    store: Arc<dyn Datastore>,
    hasher: HashingService,
    users: Arc<dyn UserAuthenticator>,
    // Verified against when a client is unknown, so both outcomes cost one hash.
    decoy: HashedClientSecret,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("store", &self.store)
            .field("hasher", &self.hasher)
            .finish()
    }
}

impl Storage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let decoy = config
            .hasher
            .hash(&ClientSecret(random_string(32)))?;
        Ok(Self {
            store: config.datastore,
            hasher: config.hasher,
            users: config.authenticate_user,
            decoy,
        })
    }

    pub fn datastore(&self) -> &dyn Datastore {
        self.store.as_ref()
    }

    pub fn hash_secret(&self, secret: &ClientSecret) -> Result<HashedClientSecret> {
        self.hasher.hash(secret)
    }

    pub fn transactions(&self) -> TransactionManager<'_> {
        TransactionManager::new(self.store.as_ref())
    }

    pub fn revocations(&self) -> RevocationIndex<'_> {
        RevocationIndex::new(self)
    }
}
