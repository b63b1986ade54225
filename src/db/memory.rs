use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Datastore, Entity, Key, Mutation, Properties, Query, Transaction};
use crate::provider::error::Error;
use crate::util::context::Context;

/// In-process store. Transactions take the write lock for their whole check-and-apply
/// phase, which gives them serializable isolation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<BTreeMap<Key, Properties>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get(&self, ctx: &Context, key: &Key) -> Result<Option<Entity>, Error> {
        ctx.run(async {
            let entities = self.entities.read().await;
            Ok(entities
                .get(key)
                .map(|props| Entity::new(key.clone(), props.clone())))
        })
        .await
    }

    async fn insert(&self, ctx: &Context, entity: Entity) -> Result<(), Error> {
        entity.properties.validate()?;
        ctx.run(async {
            let mut entities = self.entities.write().await;
            if entities.contains_key(&entity.key) {
                return Err(Error::Conflict(entity.key));
            }
            entities.insert(entity.key, entity.properties);
            Ok(())
        })
        .await
    }

    async fn update(&self, ctx: &Context, entity: Entity) -> Result<(), Error> {
        entity.properties.validate()?;
        ctx.run(async {
            let mut entities = self.entities.write().await;
            match entities.get_mut(&entity.key) {
                Some(props) => {
                    *props = entity.properties;
                    Ok(())
                }
                None => Err(Error::NotFound),
            }
        })
        .await
    }

    async fn query(&self, ctx: &Context, query: Query) -> Result<Vec<Entity>, Error> {
        ctx.run(async {
            let entities = self.entities.read().await;
            Ok(entities
                .iter()
                .map(|(key, props)| Entity::new(key.clone(), props.clone()))
                .filter(|entity| query.matches(entity))
                .collect())
        })
        .await
    }

    async fn commit(&self, ctx: &Context, tx: Transaction) -> Result<(), Error> {
        tx.validate()?;
        ctx.run(async {
            let mut entities = self.entities.write().await;

            for precondition in &tx.preconditions {
                precondition.check(entities.get(precondition.key()))?;
            }
            for mutation in &tx.mutations {
                if let Mutation::Patch { key, .. } = mutation {
                    if !entities.contains_key(key) {
                        return Err(Error::NotFound);
                    }
                }
            }
            // Nothing has been written yet, so a late cancellation still leaves the
            // store untouched.
            ctx.check()?;

            for mutation in tx.mutations {
                match mutation {
                    Mutation::Put(entity) => {
                        entities.insert(entity.key, entity.properties);
                    }
                    Mutation::Patch { key, properties } => {
                        if let Some(current) = entities.get_mut(&key) {
                            current.apply(&properties);
                        }
                    }
                }
            }
            Ok(())
        })
        .await
    }
}
