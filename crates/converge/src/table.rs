//! Type-erased per-table synchronisation
//!
//! A [`Mapper`] is generic over its entity type; the engine needs to drive a
//! heterogeneous list of them. [`bind`] wraps a mapper into a [`TableSync`]
//! object that loads snapshots, diffs them and hands back ready-to-run
//! [`Operation`]s.

use crate::context::Context;
use crate::diff::{Changed, DiffCounts, EntityDiff, find_diff};
use crate::executor::Operation;
use crate::mapper::Mapper;
use crate::plan::{Action, Plan};
use crate::types::{ChangeKind, Direction, EntityId, Side};
use log::warn;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// Provider results still waiting to be written to the database
///
/// A retried operation finds them here and skips the provider call.
type Pending<E> = Arc<Mutex<Option<Vec<E>>>>;

/// What one table needs to converge in the current iteration
#[derive(Debug)]
pub struct TableDelta {
    pub table: &'static str,
    pub counts: DiffCounts,
    pub plan: Plan,
    /// Creates, updates and replaces; run in table order
    pub forward: Vec<Operation>,
    /// Deletes; run in reverse table order
    pub reverse: Vec<Operation>,
}

impl TableDelta {
    fn new(table: &'static str, counts: DiffCounts) -> Self {
        Self {
            table,
            counts,
            plan: Plan::new(),
            forward: Vec::new(),
            reverse: Vec::new(),
        }
    }
}

/// Object-safe view of a mapper
pub trait TableSync<D>: Send + Sync {
    fn table(&self) -> &'static str;

    /// Read one side of the table into the pass snapshot
    fn load(&self, ctx: &Arc<Context<D>>, side: Side) -> Operation;

    /// Diff the loaded snapshots and plan the operations that fix the drift
    fn reconcile(&self, ctx: &Arc<Context<D>>, direction: Direction) -> TableDelta;

    /// Copy every cloud entity into the database (first install)
    fn populate(&self, ctx: &Arc<Context<D>>) -> Operation;
}

/// Erase a mapper's entity type
pub fn bind<D, M>(mapper: M) -> Arc<dyn TableSync<D>>
where
    D: Send + Sync + 'static,
    M: Mapper<D>,
{
    Arc::new(Bound {
        mapper: Arc::new(mapper),
    })
}

struct Bound<M> {
    mapper: Arc<M>,
}

impl<M> Bound<M> {
    /// Build an operation that gets fresh handles on every attempt
    fn operation<D, F, Fut>(&self, ctx: &Arc<Context<D>>, label: String, work: F) -> Operation
    where
        D: Send + Sync + 'static,
        M: Mapper<D>,
        F: Fn(Arc<M>, Arc<Context<D>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mapper = Arc::clone(&self.mapper);
        let ctx = Arc::clone(ctx);
        Operation::new(label, move || work(Arc::clone(&mapper), Arc::clone(&ctx)))
    }
}

impl<D, M> TableSync<D> for Bound<M>
where
    D: Send + Sync + 'static,
    M: Mapper<D>,
{
    fn table(&self) -> &'static str {
        self.mapper.table()
    }

    fn load(&self, ctx: &Arc<Context<D>>, side: Side) -> Operation {
        let label = format!("read {} from {side}", self.mapper.table());
        self.operation(ctx, label, move |mapper, ctx| async move {
            let entities = match side {
                Side::Db => mapper.db().read(&ctx).await?,
                Side::Cloud => mapper.cloud().read(&ctx).await?,
            };
            let read = entities.len();
            let indexed: BTreeMap<EntityId, M::Entity> = entities
                .into_iter()
                .map(|e| (mapper.entity_id(&e), e))
                .collect();
            if indexed.len() < read {
                warn!(
                    "{} read from {side} returned duplicate ids; keeping the last of each",
                    mapper.table()
                );
            }
            ctx.memo(side).load(mapper.table(), indexed);
            Ok(())
        })
    }

    fn reconcile(&self, ctx: &Arc<Context<D>>, direction: Direction) -> TableDelta {
        let mapper = &self.mapper;
        let table = mapper.table();
        let db = ctx
            .memo(Side::Db)
            .entities::<M::Entity>(table)
            .unwrap_or_default();
        let cloud = ctx
            .memo(Side::Cloud)
            .entities::<M::Entity>(table)
            .unwrap_or_default();

        let diff = find_diff(db, cloud, |e| mapper.entity_id(e), |a, b| mapper.equals(a, b));
        let mut delta = TableDelta::new(table, diff.counts());
        match direction {
            Direction::Apply => self.plan_apply(ctx, diff, &mut delta),
            Direction::Sync => self.plan_sync(ctx, diff, &mut delta),
        }
        delta
    }

    fn populate(&self, ctx: &Arc<Context<D>>) -> Operation {
        let label = format!("populate {}", self.mapper.table());
        self.operation(ctx, label, |mapper, ctx| async move {
            let entities = mapper.cloud().read(&ctx).await?;
            if entities.is_empty() {
                warn!("no cloud records found for {}", mapper.table());
                return Ok(());
            }
            mapper.db().create(&ctx, entities).await?;
            Ok(())
        })
    }
}

impl<M> Bound<M> {
    fn record<D>(&self, plan: &mut Plan, action: Action, entity: &M::Entity)
    where
        D: Send + Sync + 'static,
        M: Mapper<D>,
    {
        plan.record(
            action,
            self.mapper.table(),
            self.mapper.row_id(entity).unwrap_or_default(),
            self.mapper.entity_id(entity),
        );
    }

    /// The database is the source of truth: mutate the cloud
    fn plan_apply<D>(
        &self,
        ctx: &Arc<Context<D>>,
        diff: EntityDiff<M::Entity>,
        delta: &mut TableDelta,
    ) where
        D: Send + Sync + 'static,
        M: Mapper<D>,
    {
        let table = self.mapper.table();

        for entity in diff.db_only {
            self.record::<D>(&mut delta.plan, Action::Create, &entity);
            let id = self.mapper.entity_id(&entity);
            let label = format!("create {table} {id}");
            let pending: Pending<M::Entity> = Arc::default();
            delta.forward.push(self.operation(ctx, label, move |mapper, ctx| {
                let entity = entity.clone();
                let id = id.clone();
                let pending = Arc::clone(&pending);
                async move {
                    let created = match take_pending(&pending) {
                        Some(created) => created,
                        None => mapper.cloud().create(&ctx, vec![entity.clone()]).await?,
                    };
                    persist_from_cloud(&*mapper, &ctx, &entity, &id, created, &pending).await
                }
            }));
        }

        for Changed { db, cloud } in diff.changed {
            let id = self.mapper.entity_id(&db);
            match self.mapper.cloud().update_or_replace(&cloud, &db) {
                ChangeKind::Update => {
                    self.record::<D>(&mut delta.plan, Action::Update, &db);
                    let label = format!("update {table} {id}");
                    let pending: Pending<M::Entity> = Arc::default();
                    delta.forward.push(self.operation(ctx, label, move |mapper, ctx| {
                        let db = db.clone();
                        let id = id.clone();
                        let pending = Arc::clone(&pending);
                        async move {
                            let updated = match take_pending(&pending) {
                                Some(updated) => updated,
                                None => mapper.cloud().update(&ctx, vec![db.clone()]).await?,
                            };
                            persist_from_cloud(&*mapper, &ctx, &db, &id, updated, &pending).await
                        }
                    }));
                }
                ChangeKind::Replace => {
                    self.record::<D>(&mut delta.plan, Action::Replace, &db);
                    let label = format!("replace {table} {id}");
                    let pending: Pending<M::Entity> = Arc::default();
                    delta.forward.push(self.operation(ctx, label, move |mapper, ctx| {
                        let db = db.clone();
                        let cloud = cloud.clone();
                        let id = id.clone();
                        let pending = Arc::clone(&pending);
                        async move {
                            let replaced = match take_pending(&pending) {
                                Some(replaced) => replaced,
                                None => mapper.cloud().replace(&ctx, cloud, db.clone()).await?,
                            };
                            persist_from_cloud(&*mapper, &ctx, &db, &id, replaced, &pending).await
                        }
                    }));
                }
            }
        }

        for entity in diff.cloud_only {
            self.record::<D>(&mut delta.plan, Action::Delete, &entity);
            let label = format!("delete {table} {}", self.mapper.entity_id(&entity));
            delta.reverse.push(self.operation(ctx, label, move |mapper, ctx| {
                let entity = entity.clone();
                async move { mapper.cloud().delete(&ctx, vec![entity]).await }
            }));
        }
    }

    /// The cloud is the source of truth: mutate the database
    fn plan_sync<D>(
        &self,
        ctx: &Arc<Context<D>>,
        diff: EntityDiff<M::Entity>,
        delta: &mut TableDelta,
    ) where
        D: Send + Sync + 'static,
        M: Mapper<D>,
    {
        let table = self.mapper.table();

        for entity in diff.cloud_only {
            self.record::<D>(&mut delta.plan, Action::Create, &entity);
            let id = self.mapper.entity_id(&entity);
            let label = format!("record {table} {id}");
            delta.forward.push(self.operation(ctx, label, move |mapper, ctx| {
                let entity = entity.clone();
                let id = id.clone();
                async move {
                    let saved = mapper.db().create(&ctx, vec![entity]).await?;
                    remember(&*mapper, &ctx, Side::Cloud, &id, saved);
                    Ok(())
                }
            }));
        }

        for Changed { db, cloud } in diff.changed {
            let merged = self.mapper.carry_row(&db, cloud);
            self.record::<D>(&mut delta.plan, Action::Update, &merged);
            let id = self.mapper.entity_id(&merged);
            let label = format!("refresh {table} {id}");
            delta.forward.push(self.operation(ctx, label, move |mapper, ctx| {
                let merged = merged.clone();
                let id = id.clone();
                async move {
                    let saved = mapper.db().update(&ctx, vec![merged]).await?;
                    remember(&*mapper, &ctx, Side::Cloud, &id, saved);
                    Ok(())
                }
            }));
        }

        for entity in diff.db_only {
            self.record::<D>(&mut delta.plan, Action::Delete, &entity);
            let label = format!("forget {table} {}", self.mapper.entity_id(&entity));
            delta.reverse.push(self.operation(ctx, label, move |mapper, ctx| {
                let entity = entity.clone();
                async move { mapper.db().delete(&ctx, vec![entity]).await }
            }));
        }
    }
}

fn take_pending<E>(pending: &Mutex<Option<Vec<E>>>) -> Option<Vec<E>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Persist what the provider returned and swap it into the database snapshot
///
/// When the database write fails, `returned` is parked in `pending` so the
/// next attempt writes it without repeating the provider call.
async fn persist_from_cloud<D, M>(
    mapper: &M,
    ctx: &Context<D>,
    origin: &M::Entity,
    id: &str,
    returned: Vec<M::Entity>,
    pending: &Mutex<Option<Vec<M::Entity>>>,
) -> anyhow::Result<()>
where
    D: Send + Sync + 'static,
    M: Mapper<D>,
{
    let merged: Vec<M::Entity> = returned
        .iter()
        .cloned()
        .map(|e| mapper.carry_row(origin, e))
        .collect();
    if merged.is_empty() {
        return Ok(());
    }
    match mapper.db().update(ctx, merged).await {
        Ok(saved) => {
            remember(mapper, ctx, Side::Db, id, saved);
            Ok(())
        }
        Err(err) => {
            warn!("{} {id} changed in the cloud but not yet in the database", mapper.table());
            *pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(returned);
            Err(err)
        }
    }
}

fn remember<D, M>(mapper: &M, ctx: &Context<D>, side: Side, previous: &str, saved: Vec<M::Entity>)
where
    D: Send + Sync + 'static,
    M: Mapper<D>,
{
    let entries = saved
        .into_iter()
        .map(|e| (mapper.entity_id(&e), e))
        .collect();
    ctx.memo(side).replace(mapper.table(), previous, entries);
}
