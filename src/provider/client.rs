use async_trait::async_trait;
use tracing::{event, Level};

use super::{ClientManager, Error, Result, Storage};
use crate::core::client::{client_key, Client};
use crate::core::types::{ClientId, ClientSecret};
use crate::db::Entity;
use crate::util::context::Context;

#[async_trait]
impl ClientManager for Storage {
    #[tracing::instrument(skip(self, ctx), fields(client_id = %id))]
    async fn get_client(&self, ctx: &Context, id: &ClientId) -> Result<Client> {
        let entity = self
            .store
            .get(ctx, &client_key(id))
            .await?
            .ok_or(Error::NotFound)?;
        entity.into_record()
    }

    #[tracing::instrument(skip_all, fields(client_id = %client.id))]
    async fn create_client(&self, ctx: &Context, client: &mut Client) -> Result<()> {
        let entity = Entity::from_record(client.key(), client)?;
        self.store.insert(ctx, entity).await?;
        event!(Level::INFO, "Created client");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(client_id = %client.id))]
    async fn update_client(&self, ctx: &Context, client: &mut Client) -> Result<()> {
        let entity = Entity::from_record(client.key(), client)?;
        self.store.update(ctx, entity).await?;
        event!(Level::DEBUG, "Updated client");
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx, secret), fields(client_id = %id))]
    async fn authenticate_client(
        &self,
        ctx: &Context,
        id: &ClientId,
        secret: &ClientSecret,
    ) -> Result<Client> {
        let client = match self.get_client(ctx, id).await {
            Ok(client) => Some(client),
            Err(Error::NotFound) => None,
            Err(e) => return Err(e),
        };

        let hashed = client
            .as_ref()
            .map(Client::hashed_secret)
            .unwrap_or(&self.decoy);
        let verified = match self.hasher.verify(secret, hashed) {
            Ok(verified) => verified,
            Err(e) => {
                event!(Level::WARN, error = %e, "Stored secret could not be verified");
                false
            }
        };

        match client {
            Some(client) if verified => Ok(client),
            _ => {
                event!(Level::DEBUG, "Bad authentication");
                Err(Error::NotFound)
            }
        }
    }
}
