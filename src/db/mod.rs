//! Schemaless document store abstraction.
//!
//! Entities are flat property bags addressed by a `(kind, name)` key. Multi-record writes go
//! through [`Transaction`], which the backend commits atomically after checking every
//! [`Precondition`] against the current state of the store.

use std::fmt;

use async_trait::async_trait;

use crate::provider::error::Error;
use crate::util::context::Context;

pub mod diesel;
pub mod memory;
pub mod models;
pub mod property;
pub mod schema;

pub use self::diesel::DbStore;
pub use memory::MemoryStore;
pub use property::{Properties, Property, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    kind: String,
    name: String,
}

impl Key {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: Key,
    pub properties: Properties,
}

impl Entity {
    pub fn new(key: Key, properties: Properties) -> Self {
        Self { key, properties }
    }

    pub fn from_record<R: Record>(key: Key, record: &mut R) -> Result<Self, Error> {
        let properties = record.save()?;
        Ok(Self { key, properties })
    }

    pub fn into_record<R: Record>(self) -> Result<R, Error> {
        R::load(&self.key, self.properties)
    }
}

/// Conversion between a domain object and its flat property bag.
pub trait Record: Sized {
    /// Produces the properties to persist. May update bookkeeping fields such as timestamps.
    fn save(&mut self) -> Result<Properties, Error>;
    fn load(key: &Key, properties: Properties) -> Result<Self, Error>;
}

/// Equality query over indexed properties of one kind.
#[derive(Debug, Clone)]
pub struct Query {
    pub kind: String,
    pub filters: Vec<(String, Value)>,
}

impl Query {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
        }
    }

    pub fn filter_eq(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.filters.push((name.to_string(), value.into()));
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        entity.key.kind() == self.kind
            && self
                .filters
                .iter()
                .all(|(name, value)| entity.properties.matches(name, value))
    }
}

#[derive(Debug, Clone)]
pub enum Precondition {
    /// The entity exists and its property `name` currently equals `value`. A missing entity
    /// fails the commit with `Error::NotFound`.
    Equals { key: Key, name: String, value: Value },
    /// No entity is stored under the key.
    Absent(Key),
}

impl Precondition {
    pub fn key(&self) -> &Key {
        match self {
            Precondition::Equals { key, .. } | Precondition::Absent(key) => key,
        }
    }

    pub fn check(&self, current: Option<&Properties>) -> Result<(), Error> {
        match (self, current) {
            (Precondition::Equals { name, value, .. }, Some(props))
                if props.get(name) == Some(value) =>
            {
                Ok(())
            }
            (Precondition::Equals { .. }, None) => Err(Error::NotFound),
            (Precondition::Equals { key, name, .. }, Some(_)) => Err(Error::TransactionAborted(
                format!("{} changed: {} no longer matches", key, name),
            )),
            (Precondition::Absent(_), None) => Ok(()),
            (Precondition::Absent(key), Some(_)) => {
                Err(Error::TransactionAborted(format!("{} already exists", key)))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Mutation {
    /// Stores the entity, replacing any previous version.
    Put(Entity),
    /// Overwrites the named properties of an existing entity. Fails with `NotFound` if the
    /// entity is absent.
    Patch { key: Key, properties: Properties },
}

impl Mutation {
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Put(entity) => &entity.key,
            Mutation::Patch { key, .. } => key,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            Mutation::Put(entity) => entity.properties.validate(),
            Mutation::Patch { properties, .. } => properties.validate(),
        }
    }
}

/// A set of checks and writes committed as one unit.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub preconditions: Vec<Precondition>,
    pub mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_equals(mut self, key: Key, name: &str, value: impl Into<Value>) -> Self {
        self.preconditions.push(Precondition::Equals {
            key,
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn put(mut self, entity: Entity) -> Self {
        self.mutations.push(Mutation::Put(entity));
        self
    }

    /// Stores a new entity; the commit aborts if one already exists under its key.
    pub fn insert(mut self, entity: Entity) -> Self {
        self.preconditions
            .push(Precondition::Absent(entity.key.clone()));
        self.mutations.push(Mutation::Put(entity));
        self
    }

    pub fn patch(mut self, key: Key, properties: Properties) -> Self {
        self.mutations.push(Mutation::Patch { key, properties });
        self
    }

    /// Keys that must not exist at commit time. Backends write these with a plain insert so
    /// that a concurrent creator is detected rather than overwritten.
    pub fn absent_keys(&self) -> impl Iterator<Item = &Key> {
        self.preconditions.iter().filter_map(|p| match p {
            Precondition::Absent(key) => Some(key),
            _ => None,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.mutations.iter().try_for_each(Mutation::validate)
    }
}

#[async_trait]
pub trait Datastore: fmt::Debug + Send + Sync {
    async fn get(&self, ctx: &Context, key: &Key) -> Result<Option<Entity>, Error>;
    /// Stores a new entity, failing with `Error::Conflict` if the key is taken.
    async fn insert(&self, ctx: &Context, entity: Entity) -> Result<(), Error>;
    /// Replaces an existing entity, failing with `Error::NotFound` if there is none.
    async fn update(&self, ctx: &Context, entity: Entity) -> Result<(), Error>;
    async fn query(&self, ctx: &Context, query: Query) -> Result<Vec<Entity>, Error>;
    /// Applies the transaction atomically or not at all. A failed precondition yields
    /// `Error::TransactionAborted`.
    async fn commit(&self, ctx: &Context, tx: Transaction) -> Result<(), Error>;
}
