//! Runs against a live PostgreSQL database named by `DATABASE_URL`:
//! `cargo test --test postgres -- --ignored`

use std::sync::Arc;

use authstore::core::client::Client;
use authstore::core::requester::Requester;
use authstore::core::session::OpenIdSession;
use authstore::core::types::{ClientId, ClientSecret, RequestKind, Signature};
use authstore::db::{Datastore, DbStore, Query};
use authstore::provider::transaction::Issue;
use authstore::provider::{
    AccessTokenStorage, AuthorizeCodeStorage, ClientManager, Error, FnAuthenticator, Storage,
    StorageConfig, TokenRevocationStorage,
};
use authstore::util::context::Context;
use authstore::util::hash::HashingService;
use authstore::util::random::random_string;

fn storage() -> Arc<Storage> {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
    let store = DbStore::acquire(&url, 8).expect("pool");
    store.migrate().expect("migrations");
    let storage = Storage::new(StorageConfig {
        datastore: Arc::new(store),
        hasher: HashingService::with_secret_key("test-pepper".to_string()),
        authenticate_user: Arc::new(FnAuthenticator(|_: &str, _: &str| false)),
    })
    .expect("storage");
    Arc::new(storage)
}

#[tokio::test]
#[ignore]
async fn client_round_trip() {
    let storage = storage();
    let ctx = Context::background();
    let id = ClientId(format!("client-{}", random_string(8)));

    let secret = storage
        .hash_secret(&ClientSecret("foobar".to_string()))
        .unwrap();
    let mut client = Client::new(id.clone(), secret);
    client.redirect_uris = vec!["https://host/callback".to_string()];
    storage.create_client(&ctx, &mut client).await.unwrap();

    let err = storage.create_client(&ctx, &mut client).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let loaded = storage.get_client(&ctx, &id).await.unwrap();
    assert_eq!(loaded, client);
    storage
        .authenticate_client(&ctx, &id, &ClientSecret("foobar".to_string()))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn concurrent_exchanges_issue_one_token() {
    let storage = storage();
    let ctx = Context::background();
    let request_id = format!("req-{}", random_string(8));
    let code = Signature(format!("code-{}", request_id));

    let mut request = Requester::new(RequestKind::AuthorizeCode, request_id.as_str());
    storage
        .create_authorize_code_session(&ctx, &code, &mut request)
        .await
        .unwrap();

    let attempts: Vec<_> = (0..4)
        .map(|i| {
            let storage = Arc::clone(&storage);
            let ctx = ctx.clone();
            let code = code.clone();
            let request_id = request_id.clone();
            tokio::spawn(async move {
                let sig = Signature(format!("access-{}-{}", request_id, i));
                let mut access = Requester::new(RequestKind::AccessToken, request_id);
                storage
                    .transactions()
                    .exchange_authorize_code(&ctx, &code, Issue::new(&sig, &mut access), None)
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(Error::TransactionAborted(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(succeeded, 1);

    let tokens = storage
        .datastore()
        .query(
            &ctx,
            Query::kind(RequestKind::AccessToken.entity_kind()).filter_eq("ID", request_id.as_str()),
        )
        .await
        .unwrap();
    assert_eq!(tokens.len(), 1);

    assert_eq!(
        storage
            .revoke_access_token(&ctx, &request_id)
            .await
            .unwrap(),
        1
    );
    let err = storage
        .get_access_token_session(
            &ctx,
            &Signature::from(tokens[0].key.name()),
            Box::new(OpenIdSession::default()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inactive(_)));
}
