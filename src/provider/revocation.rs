use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{event, Level};

use super::{Error, Result, Storage, TokenIntrospectionStorage, TokenRevocationStorage};
use crate::core::requester::{request_key, Requester};
use crate::core::session::Session;
use crate::core::types::{ClientId, RequestKind, Signature};
use crate::db::{Key, Properties, Query, Transaction};
use crate::util::context::Context;

/// The property patch that soft-deletes a request.
pub(crate) fn deactivation() -> Properties {
    let mut props = Properties::new();
    props.set("Active", false);
    props.set("UpdatedAt", SystemTime::now());
    props
}

/// Finds stored requests by signature, client or request ID and marks them inactive.
///
/// Every deactivation is a single-record patch, so repeating one is harmless. Fan-out
/// operations are not atomic across the set; after a failure they can simply be re-run.
pub struct RevocationIndex<'a> {
    storage: &'a Storage,
}

impl<'a> RevocationIndex<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    async fn deactivate(&self, ctx: &Context, key: Key) -> Result<()> {
        let tx = Transaction::new().patch(key, deactivation());
        self.storage.store.commit(ctx, tx).await
    }

    /// Deactivates the request stored under `signature`. Fails with `Error::NotFound` if
    /// there is none; revoking an already inactive request succeeds.
    #[tracing::instrument(skip(self, ctx, signature))]
    pub async fn revoke_by_signature(
        &self,
        ctx: &Context,
        kind: RequestKind,
        signature: &Signature,
    ) -> Result<()> {
        self.deactivate(ctx, request_key(kind, signature)).await?;
        event!(Level::DEBUG, "Revoked request");
        Ok(())
    }

    /// Deactivates every active request of every kind made by `client_id`. Returns how many
    /// records were changed.
    #[tracing::instrument(skip(self, ctx), fields(client_id = %client_id))]
    pub async fn revoke_by_client(&self, ctx: &Context, client_id: &ClientId) -> Result<usize> {
        let mut revoked = 0;
        for kind in RequestKind::ALL.iter() {
            let query = Query::kind(kind.entity_kind())
                .filter_eq("ClientID", client_id.as_str())
                .filter_eq("Active", true);
            revoked += self.deactivate_all(ctx, query).await?;
        }
        event!(Level::INFO, revoked, "Revoked client requests");
        Ok(revoked)
    }

    /// Deactivates every active request of `kind` that carries the request ID `request_id`.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn revoke_by_request_id(
        &self,
        ctx: &Context,
        kind: RequestKind,
        request_id: &str,
    ) -> Result<usize> {
        let query = Query::kind(kind.entity_kind())
            .filter_eq("ID", request_id)
            .filter_eq("Active", true);
        let revoked = self.deactivate_all(ctx, query).await?;
        event!(Level::DEBUG, revoked, "Revoked requests");
        Ok(revoked)
    }

    async fn deactivate_all(&self, ctx: &Context, query: Query) -> Result<usize> {
        let mut revoked = 0;
        for entity in self.storage.store.query(ctx, query).await? {
            match self.deactivate(ctx, entity.key).await {
                Ok(()) => revoked += 1,
                // Gone since the query ran.
                Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(revoked)
    }

    /// Finds the active request a token signature belongs to. The hinted kind is tried
    /// first, then access and refresh tokens.
    #[tracing::instrument(skip(self, ctx, signature, session))]
    pub async fn lookup_by_signature(
        &self,
        ctx: &Context,
        signature: &Signature,
        hint: Option<RequestKind>,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        let mut kinds: Vec<RequestKind> = hint.into_iter().collect();
        for kind in [RequestKind::AccessToken, RequestKind::RefreshToken].iter() {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }

        for kind in kinds {
            match self
                .storage
                .get_request(ctx, kind, signature, session.clone())
                .await
            {
                Err(Error::NotFound) => continue,
                result => return result,
            }
        }
        Err(Error::NotFound)
    }
}

#[async_trait]
impl TokenRevocationStorage for Storage {
    async fn revoke_access_token(&self, ctx: &Context, request_id: &str) -> Result<usize> {
        self.revocations()
            .revoke_by_request_id(ctx, RequestKind::AccessToken, request_id)
            .await
    }

    async fn revoke_refresh_token(&self, ctx: &Context, request_id: &str) -> Result<usize> {
        self.revocations()
            .revoke_by_request_id(ctx, RequestKind::RefreshToken, request_id)
            .await
    }

    async fn revoke_token_by_signature(
        &self,
        ctx: &Context,
        kind: RequestKind,
        signature: &Signature,
    ) -> Result<()> {
        self.revocations()
            .revoke_by_signature(ctx, kind, signature)
            .await
    }

    async fn revoke_client_tokens(&self, ctx: &Context, client_id: &ClientId) -> Result<usize> {
        self.revocations().revoke_by_client(ctx, client_id).await
    }
}

#[async_trait]
impl TokenIntrospectionStorage for Storage {
    async fn lookup_token(
        &self,
        ctx: &Context,
        signature: &Signature,
        hint: Option<RequestKind>,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        self.revocations()
            .lookup_by_signature(ctx, signature, hint, session)
            .await
    }
}
