use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::core::client::Client;
use crate::core::types::{Arguments, ClientId, ClientSecret};
use crate::db::DbStore;
use crate::provider::{
    ClientManager, Error, FnAuthenticator, Storage, StorageConfig, TokenRevocationStorage,
};
use crate::util::context::Context;
use crate::util::hash::HashingService;

#[derive(Parser)]
#[clap(
    name = "authstore-util",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
pub struct Options {
    #[clap(long, env = "DATABASE_URL")]
    database_url: String,
    #[clap(long, env = "HASH_SECRET", hide_env_values = true)]
    hash_secret: String,
    #[clap(long, env = "POOL_SIZE", default_value = "4")]
    pool_size: u32,
    /// Seconds before a storage call is abandoned.
    #[clap(long, env = "OPERATION_TIMEOUT_SECS", default_value = "10")]
    timeout: u64,
    #[clap(subcommand)]
    command: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Create or upgrade the database schema.
    Migrate,
    CreateClient(CreateClient),
    ShowClient(ShowClient),
    /// Check a client's credentials.
    CheckClient(CheckClient),
    /// Revoke every active request made by a client.
    RevokeClient(ShowClient),
}

#[derive(Parser)]
struct CreateClient {
    #[clap(short, long)]
    id: String,
    #[clap(short, long)]
    secret: String,
    #[clap(long = "redirect-uri")]
    redirect_uris: Vec<String>,
    /// Space-delimited grant types.
    #[clap(long, default_value = "")]
    grant_types: String,
    /// Space-delimited response types.
    #[clap(long, default_value = "")]
    response_types: String,
    /// Space-delimited scopes.
    #[clap(long, default_value = "")]
    scopes: String,
    /// Space-delimited audience.
    #[clap(long, default_value = "")]
    audience: String,
    #[clap(long)]
    public: bool,
    #[clap(long, default_value = "client_secret_basic")]
    token_endpoint_auth_method: String,
}

#[derive(Parser)]
struct ShowClient {
    #[clap(short, long)]
    id: String,
}

#[derive(Parser)]
struct CheckClient {
    #[clap(short, long)]
    id: String,
    #[clap(short, long)]
    secret: String,
}

async fn create_client(c: &CreateClient, storage: &Storage, ctx: &Context) -> Result<(), Error> {
    let secret = storage.hash_secret(&ClientSecret(c.secret.to_string()))?;
    let mut client = Client::new(ClientId(c.id.to_string()), secret);
    client.redirect_uris = c.redirect_uris.clone();
    client.grant_types = Arguments::from_delimited_parts(&c.grant_types);
    client.response_types = Arguments::from_delimited_parts(&c.response_types);
    client.scopes = Arguments::from_delimited_parts(&c.scopes);
    client.audience = Arguments::from_delimited_parts(&c.audience);
    client.public = c.public;
    client.token_endpoint_auth_method = c.token_endpoint_auth_method.to_string();

    storage.create_client(ctx, &mut client).await
}

async fn show_client(c: &ShowClient, storage: &Storage, ctx: &Context) -> Result<(), Error> {
    let client = storage.get_client(ctx, &ClientId(c.id.to_string())).await?;

    println!("{}", client.id);
    for uri in &client.redirect_uris {
        println!("  redirect_uri: {}", uri);
    }
    println!("  grant_types: {}", client.grant_types().as_joined());
    println!("  response_types: {}", client.response_types().as_joined());
    println!("  scopes: {}", client.scopes().as_joined());
    println!("  audience: {}", client.audience.as_joined());
    println!("  public: {}", client.public);
    println!(
        "  token_endpoint_auth_method: {}",
        client.token_endpoint_auth_method
    );
    if let Some(jwks) = &client.jwks {
        println!("  keys: {}", jwks.keys.len());
    }
    Ok(())
}

async fn check_client(c: &CheckClient, storage: &Storage, ctx: &Context) -> Result<(), Error> {
    storage
        .authenticate_client(
            ctx,
            &ClientId(c.id.to_string()),
            &ClientSecret(c.secret.to_string()),
        )
        .await?;
    println!("{}: credentials accepted", c.id);
    Ok(())
}

async fn revoke_client(c: &ShowClient, storage: &Storage, ctx: &Context) -> Result<(), Error> {
    let revoked = storage
        .revoke_client_tokens(ctx, &ClientId(c.id.to_string()))
        .await?;
    println!("{}: {} requests revoked", c.id, revoked);
    Ok(())
}

pub async fn run_cli_action(opts: Options) -> Result<(), Error> {
    use SubCommand::*;

    let store = DbStore::acquire(&opts.database_url, opts.pool_size)?;
    if let Migrate = &opts.command {
        return store.migrate();
    }

    let storage = Storage::new(StorageConfig {
        datastore: Arc::new(store),
        hasher: HashingService::with_secret_key(opts.hash_secret.to_string()),
        authenticate_user: Arc::new(FnAuthenticator(|_: &str, _: &str| false)),
    })?;
    let ctx = Context::background().with_timeout(Duration::from_secs(opts.timeout));

    match &opts.command {
        Migrate => Ok(()),
        CreateClient(c) => create_client(c, &storage, &ctx).await,
        ShowClient(c) => show_client(c, &storage, &ctx).await,
        CheckClient(c) => check_client(c, &storage, &ctx).await,
        RevokeClient(c) => revoke_client(c, &storage, &ctx).await,
    }
}
