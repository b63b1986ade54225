use tracing::{event, Level};

use super::revocation::deactivation;
use super::{Error, Result};
use crate::core::requester::{request_key, Requester};
use crate::core::types::{RequestKind, Signature};
use crate::db::{Datastore, Entity, Transaction};
use crate::util::context::Context;

/// Multi-record writes that must happen exactly once.
///
/// Each operation is one conditional commit: it requires the consumed record to still be
/// active, deactivates it and inserts the new records. Of two concurrent callers consuming
/// the same record one commits, the other gets `Error::TransactionAborted` and writes
/// nothing. Nothing is retried here.
pub struct TransactionManager<'a> {
    store: &'a dyn Datastore,
}

/// A request to be stored under the signature of the credential issued for it.
pub struct Issue<'r> {
    pub signature: &'r Signature,
    pub request: &'r mut Requester,
}

impl<'r> Issue<'r> {
    pub fn new(signature: &'r Signature, request: &'r mut Requester) -> Self {
        Self { signature, request }
    }

    fn into_entity(self, kind: RequestKind) -> Result<Entity> {
        if self.request.kind() != kind {
            return Err(Error::UnsupportedType(format!(
                "{} cannot be issued as {}",
                self.request.kind(),
                kind
            )));
        }
        Entity::from_record(self.request.key(self.signature), self.request)
    }
}

impl<'a> TransactionManager<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self { store }
    }

    fn consume(kind: RequestKind, signature: &Signature) -> Transaction {
        let key = request_key(kind, signature);
        Transaction::new()
            .expect_equals(key.clone(), "Active", true)
            .patch(key, deactivation())
    }

    async fn commit(&self, ctx: &Context, tx: Transaction) -> Result<()> {
        match self.store.commit(ctx, tx).await {
            Err(Error::TransactionAborted(reason)) => {
                event!(Level::WARN, %reason, "Lost race for a single-use record");
                Err(Error::TransactionAborted(reason))
            }
            result => result,
        }
    }

    /// Redeems an authorization code: the code record is deactivated and the access token
    /// (and optionally refresh token) records are created, all or nothing.
    #[tracing::instrument(skip_all)]
    pub async fn exchange_authorize_code(
        &self,
        ctx: &Context,
        code: &Signature,
        access: Issue<'_>,
        refresh: Option<Issue<'_>>,
    ) -> Result<()> {
        let mut tx = Self::consume(RequestKind::AuthorizeCode, code)
            .insert(access.into_entity(RequestKind::AccessToken)?);
        if let Some(refresh) = refresh {
            tx = tx.insert(refresh.into_entity(RequestKind::RefreshToken)?);
        }

        self.commit(ctx, tx).await?;
        event!(Level::DEBUG, "Exchanged authorization code");
        Ok(())
    }

    /// Replaces a refresh token: the old record is deactivated and a new access and refresh
    /// token pair is created, all or nothing.
    #[tracing::instrument(skip_all)]
    pub async fn rotate_refresh_token(
        &self,
        ctx: &Context,
        old: &Signature,
        access: Issue<'_>,
        refresh: Issue<'_>,
    ) -> Result<()> {
        let tx = Self::consume(RequestKind::RefreshToken, old)
            .insert(access.into_entity(RequestKind::AccessToken)?)
            .insert(refresh.into_entity(RequestKind::RefreshToken)?);

        self.commit(ctx, tx).await?;
        event!(Level::DEBUG, "Rotated refresh token");
        Ok(())
    }

    /// Deactivates an authorization code on its own. Succeeds at most once per code.
    #[tracing::instrument(skip_all)]
    pub async fn invalidate_authorize_code(&self, ctx: &Context, code: &Signature) -> Result<()> {
        self.commit(ctx, Self::consume(RequestKind::AuthorizeCode, code))
            .await?;
        event!(Level::DEBUG, "Invalidated authorization code");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::requester::ActiveState;
    use crate::db::{MemoryStore, Record};

    async fn seed_code(store: &MemoryStore, ctx: &Context) -> Signature {
        let code = Signature::from("code-1");
        let mut request = Requester::new(RequestKind::AuthorizeCode, "req");
        let entity = Entity::from_record(request.key(&code), &mut request).unwrap();
        store.insert(ctx, entity).await.unwrap();
        code
    }

    #[tokio::test]
    async fn second_invalidation_is_aborted() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let code = seed_code(&store, &ctx).await;
        let manager = TransactionManager::new(&store);

        manager.invalidate_authorize_code(&ctx, &code).await.unwrap();
        let err = manager
            .invalidate_authorize_code(&ctx, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionAborted(_)));
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let manager = TransactionManager::new(&store);
        let err = manager
            .invalidate_authorize_code(&ctx, &Signature::from("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn mistagged_token_is_rejected() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let code = seed_code(&store, &ctx).await;
        let manager = TransactionManager::new(&store);

        let sig = Signature::from("at");
        let mut wrong = Requester::new(RequestKind::RefreshToken, "req");
        let err = manager
            .exchange_authorize_code(&ctx, &code, Issue::new(&sig, &mut wrong), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));

        let stored = store
            .get(&ctx, &request_key(RequestKind::AuthorizeCode, &code))
            .await
            .unwrap()
            .unwrap();
        let code_request = Requester::load(&stored.key, stored.properties).unwrap();
        assert!(code_request.is_active());
    }
}
