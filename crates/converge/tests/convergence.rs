//! End-to-end passes against an in-memory store and provider

use async_trait::async_trait;
use converge::{
    Action, ChangeKind, CloudCrud, ConvergeOptions, Context, Crud, Error, Mapper, Module,
    ModuleRegistry, ModuleStore, ModuleTransaction, Reconciler, TransactionWork,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fake store
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Item {
    row: Option<u64>,
    name: String,
    size: u32,
    parent: Option<String>,
    cloud_id: Option<String>,
}

fn item(name: &str, size: u32) -> Item {
    Item {
        row: None,
        name: name.to_string(),
        size,
        parent: None,
        cloud_id: None,
    }
}

fn child(name: &str, parent: &str) -> Item {
    Item {
        parent: Some(parent.to_string()),
        ..item(name, 1)
    }
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    installed: Vec<String>,
    tables: BTreeMap<String, BTreeMap<String, Item>>,
    change_logs: Vec<String>,
    next_row: u64,
}

#[derive(Clone, Default)]
struct FakeStore {
    state: Arc<Mutex<StoreState>>,
    /// Number of upcoming row updates that fail
    failing_updates: Arc<AtomicUsize>,
}

impl FakeStore {
    fn put(&self, table: &str, mut entity: Item) {
        let mut state = self.state.lock().unwrap();
        state.next_row += 1;
        entity.row = Some(state.next_row);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(entity.name.clone(), entity);
    }

    fn rows(&self, table: &str) -> Vec<Item> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn snapshot(&self) -> StoreState {
        self.state.lock().unwrap().clone()
    }
}

impl ModuleStore for FakeStore {
    fn installed_modules(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.state.lock().unwrap().installed.clone())
    }

    fn table_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.state.lock().unwrap().tables.keys().cloned().collect())
    }

    fn transaction(&self, work: &mut TransactionWork<'_>) -> anyhow::Result<()> {
        let mut tx = FakeTx {
            state: self.snapshot(),
        };
        work(&mut tx)?;
        *self.state.lock().unwrap() = tx.state;
        Ok(())
    }
}

struct FakeTx {
    state: StoreState,
}

impl ModuleTransaction for FakeTx {
    fn execute(&mut self, sql: &str) -> anyhow::Result<()> {
        if let Some(table) = sql.strip_prefix("CREATE TABLE ") {
            self.state.tables.insert(table.to_string(), BTreeMap::new());
        } else if let Some(table) = sql.strip_prefix("DROP TABLE ") {
            self.state.tables.remove(table);
        } else {
            anyhow::bail!("unsupported statement: {sql}");
        }
        Ok(())
    }

    fn register_module(
        &mut self,
        module: &str,
        _dependencies: &[String],
        _tables: &[String],
    ) -> anyhow::Result<()> {
        self.state.installed.push(module.to_string());
        Ok(())
    }

    fn deregister_module(&mut self, module: &str) -> anyhow::Result<()> {
        self.state.installed.retain(|m| m != module);
        Ok(())
    }

    fn attach_change_log(&mut self, table: &str) -> anyhow::Result<()> {
        self.state.change_logs.push(table.to_string());
        Ok(())
    }

    fn detach_change_log(&mut self, table: &str) -> anyhow::Result<()> {
        self.state.change_logs.retain(|t| t != table);
        Ok(())
    }
}

// ============================================================================
// Fake provider
// ============================================================================

#[derive(Default)]
struct FakeCloud {
    items: Mutex<BTreeMap<(String, String), Item>>,
    log: Mutex<Vec<String>>,
    next_id: AtomicU64,
    /// Reads report a size the provider never accepts
    drift: AtomicBool,
}

impl FakeCloud {
    fn seed(&self, table: &str, mut entity: Item) {
        entity.row = None;
        entity.cloud_id = Some(format!("seed-{}", entity.name));
        self.items
            .lock()
            .unwrap()
            .insert((table.to_string(), entity.name.clone()), entity);
    }

    fn get(&self, table: &str, name: &str) -> Option<Item> {
        self.items
            .lock()
            .unwrap()
            .get(&(table.to_string(), name.to_string()))
            .cloned()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

const CLOUD: &str = "cloud";

struct ItemRows {
    table: &'static str,
}

#[async_trait]
impl Crud<FakeStore, Item> for ItemRows {
    async fn create(
        &self,
        ctx: &Context<FakeStore>,
        entities: Vec<Item>,
    ) -> anyhow::Result<Vec<Item>> {
        let mut saved = Vec::new();
        for entity in entities {
            ctx.database().put(self.table, entity.clone());
            saved.extend(
                ctx.database()
                    .rows(self.table)
                    .into_iter()
                    .filter(|r| r.name == entity.name),
            );
        }
        Ok(saved)
    }

    async fn read(&self, ctx: &Context<FakeStore>) -> anyhow::Result<Vec<Item>> {
        Ok(ctx.database().rows(self.table))
    }

    async fn update(
        &self,
        ctx: &Context<FakeStore>,
        entities: Vec<Item>,
    ) -> anyhow::Result<Vec<Item>> {
        let failing = &ctx.database().failing_updates;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("database is locked");
        }
        let mut state = ctx.database().state.lock().unwrap();
        let rows = state.tables.entry(self.table.to_string()).or_default();
        for entity in &entities {
            rows.insert(entity.name.clone(), entity.clone());
        }
        Ok(entities)
    }

    async fn delete(&self, ctx: &Context<FakeStore>, entities: Vec<Item>) -> anyhow::Result<()> {
        let mut state = ctx.database().state.lock().unwrap();
        if let Some(rows) = state.tables.get_mut(self.table) {
            for entity in entities {
                rows.remove(&entity.name);
            }
        }
        Ok(())
    }
}

struct ItemCloud {
    table: &'static str,
    replace: bool,
}

#[async_trait]
impl Crud<FakeStore, Item> for ItemCloud {
    async fn create(
        &self,
        ctx: &Context<FakeStore>,
        entities: Vec<Item>,
    ) -> anyhow::Result<Vec<Item>> {
        let cloud = ctx.require_extension::<FakeCloud>(CLOUD)?;
        let mut out = Vec::new();
        for mut entity in entities {
            if let Some(parent) = &entity.parent
                && cloud.get("parent", parent).is_none()
            {
                anyhow::bail!("waiting for parent {parent}");
            }
            let id = cloud.next_id.fetch_add(1, Ordering::SeqCst);
            entity.row = None;
            entity.cloud_id = Some(format!("id-{id}"));
            cloud.items.lock().unwrap().insert(
                (self.table.to_string(), entity.name.clone()),
                entity.clone(),
            );
            cloud.record(format!("create {} {}", self.table, entity.name));
            out.push(entity);
        }
        Ok(out)
    }

    async fn read(&self, ctx: &Context<FakeStore>) -> anyhow::Result<Vec<Item>> {
        let cloud = ctx.require_extension::<FakeCloud>(CLOUD)?;
        let drift = cloud.drift.load(Ordering::SeqCst);
        let items = cloud.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|((table, _), _)| table == self.table)
            .map(|(_, entity)| {
                let mut entity = entity.clone();
                if drift {
                    entity.size += 1000;
                }
                entity
            })
            .collect())
    }

    async fn update(
        &self,
        ctx: &Context<FakeStore>,
        entities: Vec<Item>,
    ) -> anyhow::Result<Vec<Item>> {
        let cloud = ctx.require_extension::<FakeCloud>(CLOUD)?;
        for entity in &entities {
            let mut stored = entity.clone();
            stored.row = None;
            cloud
                .items
                .lock()
                .unwrap()
                .insert((self.table.to_string(), entity.name.clone()), stored);
            cloud.record(format!("update {} {}", self.table, entity.name));
        }
        Ok(entities)
    }

    async fn delete(&self, ctx: &Context<FakeStore>, entities: Vec<Item>) -> anyhow::Result<()> {
        let cloud = ctx.require_extension::<FakeCloud>(CLOUD)?;
        for entity in entities {
            let mut items = cloud.items.lock().unwrap();
            let in_use = items
                .iter()
                .any(|((table, _), c)| table == "child" && c.parent.as_ref() == Some(&entity.name));
            if self.table == "parent" && in_use {
                anyhow::bail!("parent {} still has children", entity.name);
            }
            items.remove(&(self.table.to_string(), entity.name.clone()));
            drop(items);
            cloud.record(format!("delete {} {}", self.table, entity.name));
        }
        Ok(())
    }
}

impl CloudCrud<FakeStore, Item> for ItemCloud {
    fn update_or_replace(&self, _cloud: &Item, _db: &Item) -> ChangeKind {
        if self.replace {
            ChangeKind::Replace
        } else {
            ChangeKind::Update
        }
    }
}

struct ItemMapper {
    db: ItemRows,
    cloud: ItemCloud,
}

impl ItemMapper {
    fn new(table: &'static str, replace: bool) -> Self {
        Self {
            db: ItemRows { table },
            cloud: ItemCloud { table, replace },
        }
    }
}

impl Mapper<FakeStore> for ItemMapper {
    type Entity = Item;

    fn table(&self) -> &'static str {
        self.db.table
    }

    fn entity_id(&self, entity: &Item) -> String {
        entity.name.clone()
    }

    fn equals(&self, a: &Item, b: &Item) -> bool {
        a.size == b.size && a.parent == b.parent && a.cloud_id == b.cloud_id
    }

    fn row_id(&self, entity: &Item) -> Option<String> {
        entity.row.map(|r| r.to_string())
    }

    fn carry_row(&self, from: &Item, mut onto: Item) -> Item {
        onto.row = from.row;
        onto
    }

    fn db(&self) -> &dyn Crud<FakeStore, Item> {
        &self.db
    }

    fn cloud(&self) -> &dyn CloudCrud<FakeStore, Item> {
        &self.cloud
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    store: FakeStore,
    cloud: Arc<FakeCloud>,
    reconciler: Reconciler<FakeStore>,
}

fn base(cloud: &Arc<FakeCloud>, replace: bool) -> Module<FakeStore> {
    Module::new("base", "1.0")
        .mapper(ItemMapper::new("parent", replace))
        .provide(CLOUD, Arc::clone(cloud))
        .on_install(|tx| tx.execute("CREATE TABLE parent"))
        .on_uninstall(|tx| tx.execute("DROP TABLE parent"))
}

fn leaf(cloud: &Arc<FakeCloud>) -> Module<FakeStore> {
    Module::new("leaf", "1.0")
        .depends_on("base@1.0")
        .mapper(ItemMapper::new("child", false))
        .provide(CLOUD, Arc::clone(cloud))
        .on_install(|tx| tx.execute("CREATE TABLE child"))
        .on_uninstall(|tx| tx.execute("DROP TABLE child"))
}

fn harness_with(build: impl FnOnce(&Arc<FakeCloud>) -> Vec<Module<FakeStore>>) -> Harness {
    let cloud = Arc::new(FakeCloud::default());
    let mut registry = ModuleRegistry::new("1.0");
    for module in build(&cloud) {
        registry.register(module).unwrap();
    }
    let store = FakeStore::default();
    let reconciler = Reconciler::new(registry, store.clone()).with_options(ConvergeOptions {
        jobs: 4,
        ..Default::default()
    });
    Harness {
        store,
        cloud,
        reconciler,
    }
}

fn harness() -> Harness {
    harness_with(|cloud| vec![base(cloud, false), leaf(cloud)])
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

// ============================================================================
// Apply
// ============================================================================

#[tokio::test]
async fn test_nothing_installed_is_an_empty_plan() {
    let h = harness();
    assert!(h.reconciler.apply(false).await.unwrap().is_empty());
    assert!(h.reconciler.sync(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_apply_creates_once_then_converges() {
    let h = harness();
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    h.store.put("parent", item("p1", 10));

    let plan = h.reconciler.apply(false).await.unwrap();
    assert_eq!(plan.count(Action::Create), 1);
    assert_eq!(plan.entries()[0].description, "p1");
    assert_eq!(plan.entries()[0].id, "1");
    assert_eq!(h.cloud.log(), vec!["create parent p1"]);

    // provider-assigned id was written back to the row
    let rows = h.store.rows("parent");
    assert_eq!(rows[0].cloud_id.as_deref(), Some("id-0"));
    assert_eq!(rows[0].row, Some(1));

    let second = h.reconciler.apply(false).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(h.cloud.log().len(), 1);
}

#[tokio::test]
async fn test_failed_write_back_does_not_create_twice() {
    let h = harness();
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    h.store.put("parent", item("p1", 10));
    h.store.failing_updates.store(1, Ordering::SeqCst);

    let plan = h.reconciler.apply(false).await.unwrap();
    assert_eq!(plan.count(Action::Create), 1);
    assert_eq!(h.cloud.log(), vec!["create parent p1"]);
    assert_eq!(h.store.failing_updates.load(Ordering::SeqCst), 0);

    let rows = h.store.rows("parent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cloud_id.as_deref(), Some("id-0"));
    assert!(h.reconciler.apply(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = harness();
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    h.store.put("parent", item("p1", 10));

    let plan = h.reconciler.apply(true).await.unwrap();
    assert_eq!(plan.count(Action::Create), 1);
    assert!(h.cloud.log().is_empty());
    assert!(h.cloud.get("parent", "p1").is_none());

    let report = plan.report();
    assert_eq!(report.plan_version, 3);
    assert_eq!(report.rows[0].table_name, "parent");
}

#[tokio::test]
async fn test_changed_entity_is_updated_in_place() {
    let h = harness();
    h.cloud.seed("parent", item("p1", 1));
    h.reconciler.install(&names(&["base"]), false).await.unwrap();

    let mut row = h.store.rows("parent").remove(0);
    row.size = 2;
    h.store.put("parent", row);

    let plan = h.reconciler.apply(false).await.unwrap();
    assert_eq!(plan.count(Action::Update), 1);
    assert_eq!(h.cloud.log(), vec!["update parent p1"]);
    assert_eq!(h.cloud.get("parent", "p1").unwrap().size, 2);
}

#[tokio::test]
async fn test_replace_deletes_before_creating() {
    let h = harness_with(|cloud| vec![base(cloud, true)]);
    h.cloud.seed("parent", item("p1", 1));
    h.reconciler.install(&names(&["base"]), false).await.unwrap();

    let mut row = h.store.rows("parent").remove(0);
    row.size = 2;
    h.store.put("parent", row);

    let plan = h.reconciler.apply(false).await.unwrap();
    assert_eq!(plan.count(Action::Replace), 1);
    assert_eq!(h.cloud.log(), vec!["delete parent p1", "create parent p1"]);

    // the replacement's new provider id landed in the database
    let rows = h.store.rows("parent");
    assert_eq!(rows[0].cloud_id.as_deref(), Some("id-0"));
    assert!(h.reconciler.apply(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deletes_run_leaf_first() {
    let h = harness();
    h.reconciler.install(&names(&["leaf"]), false).await.unwrap();
    h.cloud.seed("parent", item("p1", 1));
    h.cloud.seed("child", child("c1", "p1"));

    let plan = h.reconciler.apply(false).await.unwrap();
    assert_eq!(plan.count(Action::Delete), 2);
    assert_eq!(h.cloud.log(), vec!["delete child c1", "delete parent p1"]);
}

#[tokio::test]
async fn test_dependent_create_is_retried_until_parent_exists() {
    // child mapper declared before parent, so the first attempt must fail
    let h = harness_with(|cloud| {
        vec![
            Module::new("mixed", "1.0")
                .mapper(ItemMapper::new("child", false))
                .mapper(ItemMapper::new("parent", false))
                .provide(CLOUD, Arc::clone(cloud))
                .on_install(|tx| {
                    tx.execute("CREATE TABLE child")?;
                    tx.execute("CREATE TABLE parent")
                }),
        ]
    });
    h.reconciler.install(&names(&["mixed"]), false).await.unwrap();
    h.store.put("child", child("c1", "p1"));
    h.store.put("parent", item("p1", 1));

    let plan = h.reconciler.apply(false).await.unwrap();
    assert_eq!(plan.count(Action::Create), 2);
    assert_eq!(h.cloud.log(), vec!["create parent p1", "create child c1"]);
}

#[tokio::test]
async fn test_unsatisfiable_create_halts() {
    let h = harness();
    h.reconciler.install(&names(&["leaf"]), false).await.unwrap();
    h.store.put("child", child("orphan", "nowhere"));

    let err = h.reconciler.apply(false).await.unwrap_err();
    assert!(err.is_progress_halted());
    match err {
        Error::OperationsStalled { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].label, "create child orphan");
            assert!(failures[0].error.contains("waiting for parent nowhere"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_drift_that_never_settles_halts_the_loop() {
    let h = harness();
    h.cloud.seed("parent", item("p1", 1));
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    h.cloud.drift.store(true, Ordering::SeqCst);

    match h.reconciler.apply(false).await.unwrap_err() {
        Error::ConvergenceStalled { iterations, plan } => {
            assert_eq!(iterations, 5);
            assert_eq!(plan.count(Action::Update), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn test_sync_mirrors_cloud_into_database() {
    let h = harness();
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    h.cloud.seed("parent", item("fresh", 3));
    h.store.put("parent", item("stale", 9));

    let plan = h.reconciler.sync(false).await.unwrap();
    assert_eq!(plan.count(Action::Create), 1);
    assert_eq!(plan.count(Action::Delete), 1);

    let rows = h.store.rows("parent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "fresh");
    assert_eq!(rows[0].cloud_id.as_deref(), Some("seed-fresh"));
    // sync never touches the provider
    assert!(h.cloud.log().is_empty());
}

#[tokio::test]
async fn test_sync_update_keeps_row_identity() {
    let h = harness();
    h.cloud.seed("parent", item("p1", 1));
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    let row = h.store.rows("parent")[0].row;

    h.cloud.seed("parent", item("p1", 5));
    let plan = h.reconciler.sync(false).await.unwrap();
    assert_eq!(plan.count(Action::Update), 1);

    let rows = h.store.rows("parent");
    assert_eq!(rows[0].size, 5);
    assert_eq!(rows[0].row, row);
    assert!(h.reconciler.sync(false).await.unwrap().is_empty());
}

// ============================================================================
// Install / uninstall
// ============================================================================

#[tokio::test]
async fn test_install_attaches_missing_dependencies() {
    let h = harness();
    let report = h.reconciler.install(&names(&["leaf"]), false).await.unwrap();

    assert_eq!(report.installed, vec!["base@1.0", "leaf@1.0"]);
    assert_eq!(report.auto_added, vec!["base@1.0"]);

    let state = h.store.snapshot();
    assert_eq!(state.installed, vec!["base@1.0", "leaf@1.0"]);
    assert_eq!(state.change_logs, vec!["parent", "child"]);
}

#[tokio::test]
async fn test_install_populates_from_cloud() {
    let h = harness();
    h.cloud.seed("parent", item("p1", 4));
    h.reconciler.install(&names(&["base"]), false).await.unwrap();

    let rows = h.store.rows("parent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].size, 4);
}

#[tokio::test]
async fn test_install_twice_is_a_noop() {
    let h = harness();
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    let report = h.reconciler.install(&names(&["base"]), false).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(report.skipped, vec!["base@1.0"]);
}

#[tokio::test]
async fn test_install_all() {
    let h = harness();
    let report = h.reconciler.install(&[], true).await.unwrap();
    assert_eq!(report.installed, vec!["base@1.0", "leaf@1.0"]);
    assert_eq!(h.reconciler.modules(true).unwrap().len(), 2);
}

#[tokio::test]
async fn test_install_unknown_module() {
    let h = harness();
    match h.reconciler.install(&names(&["baes"]), false).await.unwrap_err() {
        Error::ModuleNotFound { suggestions, .. } => assert_eq!(suggestions, vec!["base@1.0"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_install_refuses_existing_tables() {
    let h = harness();
    h.store.put("parent", item("squatter", 1));

    let err = h.reconciler.install(&names(&["base"]), false).await.unwrap_err();
    assert!(matches!(err, Error::TableCollision { .. }));
    assert!(h.store.snapshot().installed.is_empty());
}

#[tokio::test]
async fn test_failed_migration_rolls_back() {
    let h = harness_with(|cloud| {
        vec![
            base(cloud, false),
            Module::new("broken", "1.0")
                .depends_on("base@1.0")
                .table("broken")
                .on_install(|tx| tx.execute("ALTER nonsense")),
        ]
    });

    let err = h.reconciler.install(&names(&["broken"]), false).await.unwrap_err();
    assert!(matches!(err, Error::Transaction(_)));

    // base was part of the same transaction
    let state = h.store.snapshot();
    assert!(state.installed.is_empty());
    assert!(state.tables.is_empty());
    assert!(state.change_logs.is_empty());
}

#[tokio::test]
async fn test_cyclic_install_leaves_store_untouched() {
    let h = harness_with(|cloud| {
        vec![
            base(cloud, false),
            Module::new("ping", "1.0")
                .depends_on("pong@1.0")
                .table("ping")
                .on_install(|tx| tx.execute("CREATE TABLE ping")),
            Module::new("pong", "1.0")
                .depends_on("ping@1.0")
                .table("pong")
                .on_install(|tx| tx.execute("CREATE TABLE pong")),
        ]
    });
    h.reconciler.install(&names(&["base"]), false).await.unwrap();
    // a sync would delete this row, since the cloud has no such item
    h.store.put("parent", item("pending", 1));
    let before = h.store.snapshot();

    match h.reconciler.install(&names(&["ping"]), false).await.unwrap_err() {
        Error::DependencyCycle { modules } => {
            assert!(modules.contains(&"ping@1.0".to_string()));
            assert!(modules.contains(&"pong@1.0".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }

    let after = h.store.snapshot();
    assert_eq!(after.installed, before.installed);
    assert_eq!(after.tables, before.tables);
    assert_eq!(after.change_logs, before.change_logs);
    assert!(h.cloud.log().is_empty());
}

#[tokio::test]
async fn test_uninstall_refuses_to_strand_dependents() {
    let h = harness();
    h.reconciler.install(&names(&["leaf"]), false).await.unwrap();

    match h.reconciler.uninstall(&names(&["base"])).await.unwrap_err() {
        Error::ModuleInUse { module, dependents } => {
            assert_eq!(module, "base@1.0");
            assert_eq!(dependents, vec!["leaf@1.0"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_uninstall_runs_leaf_to_root() {
    let h = harness();
    h.reconciler.install(&names(&["leaf"]), false).await.unwrap();

    let report = h
        .reconciler
        .uninstall(&names(&["base", "leaf"]))
        .await
        .unwrap();
    assert_eq!(report.uninstalled, vec!["leaf@1.0", "base@1.0"]);

    let state = h.store.snapshot();
    assert!(state.installed.is_empty());
    assert!(state.tables.is_empty());
    assert!(state.change_logs.is_empty());
}

#[tokio::test]
async fn test_uninstall_skips_modules_not_installed() {
    let h = harness();
    let report = h.reconciler.uninstall(&names(&["leaf"])).await.unwrap();
    assert!(report.uninstalled.is_empty());
    assert_eq!(report.skipped, vec!["leaf@1.0"]);
}
