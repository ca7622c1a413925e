//! Mapper traits - how one entity type is read and written on each side

use crate::context::Context;
use crate::types::{ChangeKind, EntityId, Side};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Create, read, update and delete against one side
///
/// Every method takes a batch and returns the entities as the side now holds
/// them, including anything the side assigned (row ids, provider ids).
#[async_trait]
pub trait Crud<D, E>: Send + Sync
where
    D: Send + Sync + 'static,
    E: Send + 'static,
{
    async fn create(&self, ctx: &Context<D>, entities: Vec<E>) -> Result<Vec<E>>;

    async fn read(&self, ctx: &Context<D>) -> Result<Vec<E>>;

    async fn update(&self, ctx: &Context<D>, entities: Vec<E>) -> Result<Vec<E>>;

    async fn delete(&self, ctx: &Context<D>, entities: Vec<E>) -> Result<()>;
}

/// The cloud side, which also decides how a drifted entity is fixed
#[async_trait]
pub trait CloudCrud<D, E>: Crud<D, E>
where
    D: Send + Sync + 'static,
    E: Send + 'static,
{
    /// Whether `cloud` can be mutated into `db` or has to be recreated
    fn update_or_replace(&self, _cloud: &E, _db: &E) -> ChangeKind {
        ChangeKind::Update
    }

    /// Destroy `cloud` and create `db` in its place
    async fn replace(&self, ctx: &Context<D>, cloud: E, db: E) -> Result<Vec<E>> {
        self.delete(ctx, vec![cloud]).await?;
        self.create(ctx, vec![db]).await
    }
}

/// Bridges one entity type between its table and the provider
#[async_trait]
pub trait Mapper<D>: Send + Sync + 'static
where
    D: Send + Sync + 'static,
{
    type Entity: Clone + fmt::Debug + Send + Sync + 'static;

    /// Table holding this entity type; also the key in context snapshots
    fn table(&self) -> &'static str;

    fn entity_id(&self, entity: &Self::Entity) -> EntityId;

    /// Whether the two views describe the same state
    fn equals(&self, a: &Self::Entity, b: &Self::Entity) -> bool;

    /// Database row id shown in plan reports
    fn row_id(&self, _entity: &Self::Entity) -> Option<String> {
        None
    }

    /// Copy database row identity from `from` onto a provider-sourced `onto`
    fn carry_row(&self, _from: &Self::Entity, onto: Self::Entity) -> Self::Entity {
        onto
    }

    fn db(&self) -> &dyn Crud<D, Self::Entity>;

    fn cloud(&self) -> &dyn CloudCrud<D, Self::Entity>;

    /// Single-entity read: the pass snapshot first, then a full read of `side`
    async fn find(
        &self,
        ctx: &Context<D>,
        side: Side,
        id: &str,
    ) -> Result<Option<Self::Entity>> {
        if let Some(found) = ctx.memo(side).get::<Self::Entity>(self.table(), id) {
            return Ok(Some(found));
        }
        let all = match side {
            Side::Db => self.db().read(ctx).await?,
            Side::Cloud => self.cloud().read(ctx).await?,
        };
        Ok(all.into_iter().find(|e| self.entity_id(e) == id))
    }
}
