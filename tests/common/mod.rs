#![allow(dead_code)]

use std::sync::Arc;

use authstore::core::client::Client;
use authstore::core::types::{ClientId, ClientSecret};
use authstore::db::MemoryStore;
use authstore::provider::{ClientManager, FnAuthenticator, Storage, StorageConfig};
use authstore::util::context::Context;
use authstore::util::hash::HashingService;

pub fn storage() -> Storage {
    Storage::new(StorageConfig {
        datastore: Arc::new(MemoryStore::new()),
        hasher: HashingService::with_secret_key("test-pepper".to_string()),
        authenticate_user: Arc::new(FnAuthenticator(|name: &str, secret: &str| {
            name == "vvakame" && secret == "foobar"
        })),
    })
    .expect("storage")
}

/// Registers `my-client` with secret `foobar`.
pub async fn register_client(storage: &Storage, ctx: &Context) -> Client {
    let secret = storage
        .hash_secret(&ClientSecret("foobar".to_string()))
        .expect("hash");
    let mut client = Client::new(ClientId::from("my-client"), secret);
    client.redirect_uris = vec!["https://host/callback".to_string()];
    client.grant_types = "authorization_code refresh_token"
        .split(' ')
        .collect();
    client.scopes = "openid photos offline".split(' ').collect();
    storage
        .create_client(ctx, &mut client)
        .await
        .expect("create client");
    client
}
