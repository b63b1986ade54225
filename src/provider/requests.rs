use async_trait::async_trait;
use tracing::{event, Level};

use super::{
    AccessTokenStorage, AuthorizeCodeStorage, ClientManager, Error, OpenIdConnectRequestStorage,
    PkceRequestStorage, RefreshTokenStorage, ResourceOwnerPasswordCredentialsStorage, Result,
    Storage,
};
use crate::core::requester::{request_key, ActiveState, ClientBinding, Requester, SessionRestore};
use crate::core::session::Session;
use crate::core::types::{RequestKind, Signature};
use crate::db::Entity;
use crate::util::context::Context;

fn check_kind(expected: RequestKind, request: &Requester) -> Result<()> {
    if request.kind() != expected {
        return Err(Error::UnsupportedType(format!(
            "{} cannot be stored as {}",
            request.kind(),
            expected
        )));
    }
    Ok(())
}

impl Storage {
    #[tracing::instrument(skip(self, ctx, signature, request), fields(request_id = %request.id))]
    pub(crate) async fn create_request(
        &self,
        ctx: &Context,
        kind: RequestKind,
        signature: &Signature,
        request: &mut Requester,
    ) -> Result<()> {
        check_kind(kind, request)?;
        let entity = Entity::from_record(request.key(signature), request)?;
        self.store.insert(ctx, entity).await?;
        event!(Level::DEBUG, "Stored request");
        Ok(())
    }

    /// Loads an active request, restoring its session and attaching its client.
    #[tracing::instrument(skip(self, ctx, signature, session))]
    pub(crate) async fn get_request(
        &self,
        ctx: &Context,
        kind: RequestKind,
        signature: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        let entity = self
            .store
            .get(ctx, &request_key(kind, signature))
            .await?
            .ok_or(Error::NotFound)?;
        let mut request: Requester = entity.into_record()?;
        self.hydrate(ctx, &mut request, session).await?;

        if !request.is_active() {
            event!(Level::DEBUG, request_id = %request.id, "Request is inactive");
            return Err(Error::Inactive(Box::new(request)));
        }
        Ok(request)
    }

    async fn hydrate<R>(&self, ctx: &Context, request: &mut R, session: Box<dyn Session>) -> Result<()>
    where
        R: ClientBinding + SessionRestore + Send,
    {
        request.restore_session(session)?;
        let client_id = request.client_id().clone();
        if !client_id.is_empty() {
            let client = self.get_client(ctx, &client_id).await?;
            request.set_client(client);
        }
        Ok(())
    }
}

#[async_trait]
impl AuthorizeCodeStorage for Storage {
    async fn create_authorize_code_session(
        &self,
        ctx: &Context,
        code: &Signature,
        request: &mut Requester,
    ) -> Result<()> {
        self.create_request(ctx, RequestKind::AuthorizeCode, code, request)
            .await
    }

    async fn get_authorize_code_session(
        &self,
        ctx: &Context,
        code: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        self.get_request(ctx, RequestKind::AuthorizeCode, code, session)
            .await
    }

    async fn invalidate_authorize_code_session(
        &self,
        ctx: &Context,
        code: &Signature,
    ) -> Result<()> {
        self.transactions().invalidate_authorize_code(ctx, code).await
    }
}

#[async_trait]
impl AccessTokenStorage for Storage {
    async fn create_access_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        request: &mut Requester,
    ) -> Result<()> {
        self.create_request(ctx, RequestKind::AccessToken, signature, request)
            .await
    }

    async fn get_access_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        self.get_request(ctx, RequestKind::AccessToken, signature, session)
            .await
    }

    async fn revoke_access_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
    ) -> Result<()> {
        self.revocations()
            .revoke_by_signature(ctx, RequestKind::AccessToken, signature)
            .await
    }
}

#[async_trait]
impl RefreshTokenStorage for Storage {
    async fn create_refresh_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        request: &mut Requester,
    ) -> Result<()> {
        self.create_request(ctx, RequestKind::RefreshToken, signature, request)
            .await
    }

    async fn get_refresh_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        self.get_request(ctx, RequestKind::RefreshToken, signature, session)
            .await
    }

    async fn revoke_refresh_token_session(
        &self,
        ctx: &Context,
        signature: &Signature,
    ) -> Result<()> {
        self.revocations()
            .revoke_by_signature(ctx, RequestKind::RefreshToken, signature)
            .await
    }
}

#[async_trait]
impl OpenIdConnectRequestStorage for Storage {
    async fn create_open_id_connect_session(
        &self,
        ctx: &Context,
        code: &Signature,
        request: &mut Requester,
    ) -> Result<()> {
        self.create_request(ctx, RequestKind::OpenIdConnect, code, request)
            .await
    }

    async fn get_open_id_connect_session(
        &self,
        ctx: &Context,
        code: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        self.get_request(ctx, RequestKind::OpenIdConnect, code, session)
            .await
    }

    async fn delete_open_id_connect_session(
        &self,
        ctx: &Context,
        code: &Signature,
    ) -> Result<()> {
        self.revocations()
            .revoke_by_signature(ctx, RequestKind::OpenIdConnect, code)
            .await
    }
}

#[async_trait]
impl PkceRequestStorage for Storage {
    async fn create_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        request: &mut Requester,
    ) -> Result<()> {
        self.create_request(ctx, RequestKind::Pkce, signature, request)
            .await
    }

    async fn get_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &Signature,
        session: Box<dyn Session>,
    ) -> Result<Requester> {
        self.get_request(ctx, RequestKind::Pkce, signature, session)
            .await
    }

    async fn delete_pkce_request_session(
        &self,
        ctx: &Context,
        signature: &Signature,
    ) -> Result<()> {
        self.revocations()
            .revoke_by_signature(ctx, RequestKind::Pkce, signature)
            .await
    }
}

#[async_trait]
impl ResourceOwnerPasswordCredentialsStorage for Storage {
    #[tracing::instrument(skip(self, ctx, secret))]
    async fn authenticate(&self, ctx: &Context, username: &str, secret: &str) -> Result<()> {
        ctx.check()?;
        self.users.authenticate(ctx, username, secret).await
    }
}
