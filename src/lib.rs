#[macro_use]
extern crate diesel;

#[macro_use]
extern crate diesel_migrations;

pub mod core;
pub mod db;
pub mod provider;
pub mod util;

pub use crate::core::client::{Client, JsonWebKey, JsonWebKeySet};
pub use crate::core::requester::{ActiveState, ClientBinding, Requester, SessionRestore};
pub use crate::core::session::{OpenIdSession, Restore, Session};
pub use crate::core::types::{ClientId, ClientSecret, RequestKind, Signature};
pub use crate::provider::{Error, Storage, StorageConfig};
pub use crate::util::context::Context;
