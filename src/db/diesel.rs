use std::collections::HashSet;
use std::fmt::Debug;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Jsonb, Text};
use tracing::{event, Level};

use super::models::EntityRow;
use super::schema::entities::dsl::{self, entities};
use super::{Datastore, Entity, Key, Mutation, Properties, Property, Query, Transaction};
use crate::provider::error::Error;
use crate::util::context::Context;

diesel_migrations::embed_migrations!("migrations");

type PgPool = Pool<ConnectionManager<PgConnection>>;

/// PostgreSQL-backed document store. Every entity is one row of the `entities` table, its
/// property bag kept as JSONB so equality queries can use containment.
pub struct DbStore {
    pool: PgPool,
}

impl DbStore {
    pub fn acquire(uri: &str, max_size: u32) -> Result<Self, Error> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(ConnectionManager::new(uri))?;
        Ok(Self { pool })
    }

    pub fn migrate(&self) -> Result<(), Error> {
        let conn = self.pool.get()?;
        embedded_migrations::run_with_output(&*conn, &mut std::io::stderr())?;
        event!(Level::INFO, "Ran migrations");
        Ok(())
    }

    /// Runs `f` on the blocking pool with a pooled connection, racing it against `ctx`.
    async fn blocking<T, F>(&self, ctx: &Context, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&PgConnection, &Context) -> Result<T, Error> + Send + 'static,
    {
        let pool = self.pool.clone();
        let task_ctx = ctx.clone();
        ctx.run(async move {
            tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                f(&*conn, &task_ctx)
            })
            .await?
        })
        .await
    }
}

impl Debug for DbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbStore").finish()
    }
}

fn to_json(properties: &Properties) -> Result<serde_json::Value, Error> {
    serde_json::to_value(properties).map_err(|e| Error::malformed("properties", e))
}

fn to_row(entity: &Entity) -> Result<EntityRow, Error> {
    Ok(EntityRow {
        kind: entity.key.kind().to_string(),
        name: entity.key.name().to_string(),
        properties: to_json(&entity.properties)?,
    })
}

fn from_row(row: EntityRow) -> Result<Entity, Error> {
    let properties: Properties =
        serde_json::from_value(row.properties).map_err(|e| Error::malformed("properties", e))?;
    Ok(Entity::new(Key::new(row.kind, row.name), properties))
}

/// Reads the current properties under `key`, holding a row lock until the transaction ends.
fn lock(conn: &PgConnection, key: &Key) -> Result<Option<Properties>, Error> {
    let row = entities
        .find((key.kind(), key.name()))
        .for_update()
        .get_result::<EntityRow>(conn)
        .optional()?;
    Ok(row.map(from_row).transpose()?.map(|e| e.properties))
}

#[async_trait]
impl Datastore for DbStore {
    async fn get(&self, ctx: &Context, key: &Key) -> Result<Option<Entity>, Error> {
        let key = key.clone();
        self.blocking(ctx, move |conn, _| {
            let row = entities
                .find((key.kind(), key.name()))
                .first::<EntityRow>(conn)
                .optional()?;
            row.map(from_row).transpose()
        })
        .await
    }

    async fn insert(&self, ctx: &Context, entity: Entity) -> Result<(), Error> {
        entity.properties.validate()?;
        let row = to_row(&entity)?;
        let key = entity.key;
        self.blocking(ctx, move |conn, _| {
            match diesel::insert_into(entities).values(&row).execute(conn) {
                Ok(_) => Ok(()),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    Err(Error::Conflict(key))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update(&self, ctx: &Context, entity: Entity) -> Result<(), Error> {
        entity.properties.validate()?;
        let row = to_row(&entity)?;
        self.blocking(ctx, move |conn, _| {
            let updated = diesel::update(entities.find((row.kind.as_str(), row.name.as_str())))
                .set(dsl::properties.eq(&row.properties))
                .execute(conn)?;
            if updated == 0 {
                return Err(Error::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn query(&self, ctx: &Context, query: Query) -> Result<Vec<Entity>, Error> {
        let filter = query
            .filters
            .iter()
            .map(|(name, value)| {
                serde_json::to_value(Property {
                    name: name.clone(),
                    value: value.clone(),
                    indexed: true,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::malformed("query", e))?;
        let filter = serde_json::Value::Array(filter);

        self.blocking(ctx, move |conn, _| {
            let rows = diesel::sql_query(
                "SELECT kind, name, properties FROM entities WHERE kind = $1 AND properties @> $2",
            )
            .bind::<Text, _>(&query.kind)
            .bind::<Jsonb, _>(&filter)
            .load::<EntityRow>(conn)?;
            rows.into_iter().map(from_row).collect()
        })
        .await
    }

    async fn commit(&self, ctx: &Context, tx: Transaction) -> Result<(), Error> {
        tx.validate()?;
        let absent: HashSet<Key> = tx.absent_keys().cloned().collect();

        let result = self
            .blocking(ctx, move |conn, ctx| {
                conn.transaction::<_, Error, _>(|| {
                    for precondition in &tx.preconditions {
                        let current = lock(conn, precondition.key())?;
                        precondition.check(current.as_ref())?;
                    }

                    for mutation in &tx.mutations {
                        match mutation {
                            Mutation::Put(entity) if absent.contains(&entity.key) => {
                                let row = to_row(entity)?;
                                diesel::insert_into(entities)
                                    .values(&row)
                                    .execute(conn)
                                    .map_err(|e| match e {
                                        DieselError::DatabaseError(
                                            DatabaseErrorKind::UniqueViolation,
                                            _,
                                        ) => Error::TransactionAborted(format!(
                                            "{} already exists",
                                            entity.key
                                        )),
                                        e => e.into(),
                                    })?;
                            }
                            Mutation::Put(entity) => {
                                let row = to_row(entity)?;
                                diesel::insert_into(entities)
                                    .values(&row)
                                    .on_conflict((dsl::kind, dsl::name))
                                    .do_update()
                                    .set(dsl::properties.eq(&row.properties))
                                    .execute(conn)?;
                            }
                            Mutation::Patch { key, properties } => {
                                let mut current = lock(conn, key)?.ok_or(Error::NotFound)?;
                                current.apply(properties);
                                let json = to_json(&current)?;
                                diesel::update(entities.find((key.kind(), key.name())))
                                    .set(dsl::properties.eq(&json))
                                    .execute(conn)?;
                            }
                        }
                    }

                    // Roll back rather than commit on behalf of a caller that gave up.
                    ctx.check()
                })
            })
            .await;

        if let Err(Error::TransactionAborted(reason)) = &result {
            event!(Level::DEBUG, %reason, "Transaction aborted");
        }
        result
    }
}
