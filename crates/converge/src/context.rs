//! Pass-scoped execution context
//!
//! A [`Context`] is built fresh for every pass. It carries the database
//! handle, the per-pass snapshots of both sides, and whatever the installed
//! modules contribute (provider clients, shared settings).

use crate::module::{ContextValue, Module};
use crate::types::{EntityId, Side};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Tables = HashMap<String, Box<dyn Any + Send + Sync>>;

/// Entities of one side, keyed by table and then entity id
///
/// Each table holds a `BTreeMap<EntityId, E>` for the table's entity type, so
/// iteration order is stable across runs.
#[derive(Default)]
pub struct Snapshot {
    tables: RwLock<Tables>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace everything known about a table
    pub fn load<E>(&self, table: &str, entities: BTreeMap<EntityId, E>)
    where
        E: Send + Sync + 'static,
    {
        self.write().insert(table.to_string(), Box::new(entities));
    }

    /// All entities of a table, `None` when the table was never loaded
    pub fn entities<E>(&self, table: &str) -> Option<Vec<E>>
    where
        E: Clone + 'static,
    {
        self.read()
            .get(table)?
            .downcast_ref::<BTreeMap<EntityId, E>>()
            .map(|entries| entries.values().cloned().collect())
    }

    pub fn get<E>(&self, table: &str, id: &str) -> Option<E>
    where
        E: Clone + 'static,
    {
        self.read()
            .get(table)?
            .downcast_ref::<BTreeMap<EntityId, E>>()?
            .get(id)
            .cloned()
    }

    /// Insert or overwrite one entity
    pub fn upsert<E>(&self, table: &str, id: EntityId, entity: E)
    where
        E: Send + Sync + 'static,
    {
        self.replace(table, &id.clone(), vec![(id, entity)]);
    }

    /// Swap the slot `previous` for `entities`
    ///
    /// An empty `entities` leaves the slot untouched: a write that returned
    /// nothing must not make the entity look deleted.
    pub fn replace<E>(&self, table: &str, previous: &str, entities: Vec<(EntityId, E)>)
    where
        E: Send + Sync + 'static,
    {
        if entities.is_empty() {
            return;
        }
        let mut tables = self.write();
        let slot = tables
            .entry(table.to_string())
            .or_insert_with(|| {
                Box::new(BTreeMap::<EntityId, E>::new()) as Box<dyn Any + Send + Sync>
            });
        if let Some(entries) = slot.downcast_mut::<BTreeMap<EntityId, E>>() {
            entries.remove(previous);
            entries.extend(entities);
        }
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

/// Both sides of the current pass
#[derive(Default)]
pub struct Memo {
    pub db: Snapshot,
    pub cloud: Snapshot,
}

impl Memo {
    pub fn side(&self, side: Side) -> &Snapshot {
        match side {
            Side::Db => &self.db,
            Side::Cloud => &self.cloud,
        }
    }
}

/// Everything a mapper can reach during one pass
pub struct Context<D> {
    database: D,
    pub memo: Memo,
    extensions: BTreeMap<String, ContextValue>,
}

impl<D> Context<D> {
    pub fn new(database: D) -> Self {
        Self {
            database,
            memo: Memo::default(),
            extensions: BTreeMap::new(),
        }
    }

    /// Merge the context contributions of `modules`; later modules win on key clashes
    pub fn with_modules(mut self, modules: &[Arc<Module<D>>]) -> Self {
        for module in modules {
            for (key, value) in module.context() {
                self.extensions.insert(key.clone(), Arc::clone(value));
            }
        }
        self
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn memo(&self, side: Side) -> &Snapshot {
        self.memo.side(side)
    }

    /// Look up a module contribution by key and type
    pub fn extension<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = Arc::clone(self.extensions.get(key)?);
        value.downcast::<T>().ok()
    }

    /// Like [`Context::extension`] but an error when absent
    pub fn require_extension<T>(&self, key: &str) -> anyhow::Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.extension(key).ok_or_else(|| {
            anyhow::anyhow!(
                "context value '{key}' of type {} is not provided by any installed module",
                std::any::type_name::<T>()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        value: u32,
    }

    fn loaded() -> Snapshot {
        let snapshot = Snapshot::new();
        let mut rows = BTreeMap::new();
        rows.insert("b".to_string(), Row { value: 2 });
        rows.insert("a".to_string(), Row { value: 1 });
        snapshot.load("rows", rows);
        snapshot
    }

    #[test]
    fn test_entities_sorted_by_id() {
        let snapshot = loaded();
        let values: Vec<_> = snapshot
            .entities::<Row>("rows")
            .unwrap()
            .into_iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_unloaded_and_mistyped_tables() {
        let snapshot = loaded();
        assert!(snapshot.entities::<Row>("missing").is_none());
        assert!(snapshot.entities::<String>("rows").is_none());
    }

    #[test]
    fn test_replace_swaps_slot() {
        let snapshot = loaded();
        snapshot.replace("rows", "a", vec![("a2".to_string(), Row { value: 10 })]);
        assert!(snapshot.get::<Row>("rows", "a").is_none());
        assert_eq!(snapshot.get::<Row>("rows", "a2"), Some(Row { value: 10 }));
    }

    #[test]
    fn test_replace_with_nothing_keeps_slot() {
        let snapshot = loaded();
        snapshot.replace::<Row>("rows", "a", Vec::new());
        assert_eq!(snapshot.get::<Row>("rows", "a"), Some(Row { value: 1 }));
    }

    #[test]
    fn test_upsert_creates_table() {
        let snapshot = Snapshot::new();
        snapshot.upsert("fresh", "x".to_string(), Row { value: 7 });
        assert_eq!(snapshot.get::<Row>("fresh", "x"), Some(Row { value: 7 }));
        snapshot.upsert("fresh", "x".to_string(), Row { value: 8 });
        assert_eq!(snapshot.entities::<Row>("fresh"), Some(vec![Row { value: 8 }]));
        snapshot.clear();
        assert!(snapshot.entities::<Row>("fresh").is_none());
    }

    #[test]
    fn test_extensions() {
        let modules = vec![
            Arc::new(Module::new("first", "1.0").provide("region", Arc::new("old".to_string()))),
            Arc::new(
                Module::new("second", "1.0").provide("region", Arc::new("sandbox-1".to_string())),
            ),
        ];
        // later modules win on key clashes
        let ctx = Context::new(()).with_modules(&modules);

        let region = ctx.extension::<String>("region").unwrap();
        assert_eq!(region.as_str(), "sandbox-1");
        assert!(ctx.extension::<u32>("region").is_none());
        assert!(ctx.require_extension::<String>("missing").is_err());
    }
}
