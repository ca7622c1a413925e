//! Hosted zones and record sets
//!
//! Every zone is created with an SOA record and an apex NS record. Those
//! cannot be deleted on their own, so the engine treats them as rows the
//! provider owns: they are written to the database as soon as the zone
//! exists, and a row removed by hand is put back instead of deleted.

use super::network;
use super::{SANDBOX, VERSION, provider, split_lines};
use anyhow::{Context as _, anyhow, bail};
use async_trait::async_trait;
use converge::{ChangeKind, CloudCrud, Context, Crud, Mapper, Module, Side, qualify};
use log::{debug, info};
use rowstore::Store;
use rusqlite::{Row, params};
use sandbox::{ChangeAction, HostedZone, RecordSet, Sandbox, normalize_domain};
use std::collections::HashMap;
use std::sync::Arc;

pub const NAME: &str = "sandbox_dns";

const INSTALL: &str = "
    CREATE TABLE hosted_zone (
        id INTEGER PRIMARY KEY,
        domain_name TEXT NOT NULL UNIQUE,
        network_name TEXT REFERENCES network(name) ON UPDATE CASCADE,
        zone_id TEXT UNIQUE
    );

    CREATE TABLE record_set (
        id INTEGER PRIMARY KEY,
        zone_name TEXT NOT NULL REFERENCES hosted_zone(domain_name) ON UPDATE CASCADE,
        name TEXT NOT NULL,
        record_type TEXT NOT NULL,
        ttl INTEGER,
        records TEXT NOT NULL,
        UNIQUE (zone_name, name, record_type)
    );
";

const UNINSTALL: &str = "
    DROP TABLE record_set;
    DROP TABLE hosted_zone;
";

/// The stored spelling of a zone name, with or without its trailing dot
const ZONE_NAME: &str = "COALESCE(
    (SELECT domain_name FROM hosted_zone WHERE rtrim(domain_name, '.') = rtrim(?2, '.')),
    ?2)";

pub fn module(cloud: &Arc<Sandbox>) -> Module<Store> {
    Module::new(NAME, VERSION)
        .depends_on(qualify(network::NAME, VERSION))
        .provide(SANDBOX, Arc::clone(cloud))
        .mapper(HostedZoneMapper)
        .mapper(RecordSetMapper)
        .on_install(|tx| tx.execute(INSTALL))
        .on_uninstall(|tx| tx.execute(UNINSTALL))
}

fn find_zone(cloud: &Sandbox, domain_name: &str) -> Option<HostedZone> {
    let domain_name = normalize_domain(domain_name);
    cloud
        .describe_hosted_zones()
        .into_iter()
        .find(|z| z.domain_name == domain_name)
}

fn network_id(cloud: &Sandbox, name: &str) -> anyhow::Result<String> {
    cloud
        .describe_networks()
        .into_iter()
        .find(|n| n.name == name)
        .map(|n| n.network_id)
        .ok_or_else(|| anyhow!("waiting for network {name}"))
}

// ============================================================================
// Hosted zone
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZoneRow {
    pub id: Option<i64>,
    pub domain_name: String,
    /// Set for private zones
    pub network_name: Option<String>,
    pub zone_id: Option<String>,
}

impl HostedZoneRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            domain_name: row.get(1)?,
            network_name: row.get(2)?,
            zone_id: row.get(3)?,
        })
    }

    fn from_cloud(zone: HostedZone, network_name: Option<String>) -> Self {
        Self {
            id: None,
            domain_name: zone.domain_name,
            network_name,
            zone_id: Some(zone.zone_id),
        }
    }
}

pub struct HostedZoneMapper;

impl Mapper<Store> for HostedZoneMapper {
    type Entity = HostedZoneRow;

    fn table(&self) -> &'static str {
        "hosted_zone"
    }

    fn entity_id(&self, entity: &HostedZoneRow) -> String {
        normalize_domain(&entity.domain_name)
    }

    fn equals(&self, a: &HostedZoneRow, b: &HostedZoneRow) -> bool {
        a.network_name == b.network_name && a.zone_id == b.zone_id
    }

    fn row_id(&self, entity: &HostedZoneRow) -> Option<String> {
        entity.id.map(|id| id.to_string())
    }

    /// Keeps the row's own spelling of the domain
    fn carry_row(&self, from: &HostedZoneRow, mut onto: HostedZoneRow) -> HostedZoneRow {
        onto.id = from.id;
        onto.domain_name.clone_from(&from.domain_name);
        onto
    }

    fn db(&self) -> &dyn Crud<Store, HostedZoneRow> {
        &HostedZoneRows
    }

    fn cloud(&self) -> &dyn CloudCrud<Store, HostedZoneRow> {
        &HostedZoneCloud
    }
}

struct HostedZoneRows;

#[async_trait]
impl Crud<Store, HostedZoneRow> for HostedZoneRows {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<HostedZoneRow>,
    ) -> anyhow::Result<Vec<HostedZoneRow>> {
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    e.id = Some(conn.query_row(
                        "INSERT INTO hosted_zone (domain_name, network_name, zone_id)
                         VALUES (?1, ?2, ?3) RETURNING id",
                        params![e.domain_name, e.network_name, e.zone_id],
                        |row| row.get(0),
                    )?);
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<HostedZoneRow>> {
        let rows = ctx.database().with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, domain_name, network_name, zone_id FROM hosted_zone ORDER BY id",
            )?;
            stmt.query_map([], HostedZoneRow::from_row)?.collect()
        })?;
        Ok(rows)
    }

    async fn update(
        &self,
        ctx: &Context<Store>,
        entities: Vec<HostedZoneRow>,
    ) -> anyhow::Result<Vec<HostedZoneRow>> {
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    e.id = Some(conn.query_row(
                        "INSERT INTO hosted_zone (id, domain_name, network_name, zone_id)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT DO UPDATE SET
                            domain_name = excluded.domain_name,
                            network_name = excluded.network_name,
                            zone_id = excluded.zone_id
                         RETURNING id",
                        params![e.id, e.domain_name, e.network_name, e.zone_id],
                        |row| row.get(0),
                    )?);
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn delete(
        &self,
        ctx: &Context<Store>,
        entities: Vec<HostedZoneRow>,
    ) -> anyhow::Result<()> {
        ctx.database().with_conn(|conn| {
            for e in &entities {
                conn.execute(
                    "DELETE FROM hosted_zone WHERE rtrim(domain_name, '.') = rtrim(?1, '.')",
                    [&e.domain_name],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

struct HostedZoneCloud;

impl HostedZoneCloud {
    fn create_one(cloud: &Sandbox, row: &HostedZoneRow) -> anyhow::Result<HostedZone> {
        let network_id = row
            .network_name
            .as_deref()
            .map(|name| network_id(cloud, name))
            .transpose()?;
        cloud
            .create_hosted_zone(&row.domain_name, network_id.as_deref())
            .with_context(|| format!("creating hosted zone {}", row.domain_name))
    }

    /// Write the zone's default records to the database and the pass snapshot
    async fn adopt_defaults(
        ctx: &Context<Store>,
        cloud: &Sandbox,
        zone: &HostedZone,
    ) -> anyhow::Result<()> {
        let defaults: Vec<RecordSetRow> = cloud
            .record_sets(&zone.zone_id)?
            .into_iter()
            .filter(|r| r.is_default_for(&zone.domain_name))
            .map(|r| RecordSetRow::from_cloud(r, &zone.domain_name))
            .collect();
        let saved = RecordSetRows.update(ctx, defaults).await?;
        for row in saved {
            ctx.memo(Side::Db)
                .upsert(RecordSetMapper.table(), RecordSetMapper.entity_id(&row), row);
        }
        Ok(())
    }
}

#[async_trait]
impl Crud<Store, HostedZoneRow> for HostedZoneCloud {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<HostedZoneRow>,
    ) -> anyhow::Result<Vec<HostedZoneRow>> {
        let cloud = provider(ctx)?;
        let mut created = Vec::with_capacity(entities.len());
        for e in entities {
            let zone = Self::create_one(&cloud, &e)?;
            Self::adopt_defaults(ctx, &cloud, &zone).await?;
            created.push(HostedZoneRow::from_cloud(zone, e.network_name));
        }
        Ok(created)
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<HostedZoneRow>> {
        let cloud = provider(ctx)?;
        let names: HashMap<String, String> = cloud
            .describe_networks()
            .into_iter()
            .map(|n| (n.network_id, n.name))
            .collect();
        Ok(cloud
            .describe_hosted_zones()
            .into_iter()
            .map(|z| {
                let network_name = z.network_id.as_ref().and_then(|id| names.get(id)).cloned();
                HostedZoneRow::from_cloud(z, network_name)
            })
            .collect())
    }

    async fn update(
        &self,
        _ctx: &Context<Store>,
        entities: Vec<HostedZoneRow>,
    ) -> anyhow::Result<Vec<HostedZoneRow>> {
        let names: Vec<&str> = entities.iter().map(|e| e.domain_name.as_str()).collect();
        bail!("hosted zones cannot be modified in place: {}", names.join(", "))
    }

    async fn delete(
        &self,
        ctx: &Context<Store>,
        entities: Vec<HostedZoneRow>,
    ) -> anyhow::Result<()> {
        let cloud = provider(ctx)?;
        for e in entities {
            let id = e
                .zone_id
                .as_deref()
                .ok_or_else(|| anyhow!("hosted zone {} has no provider id", e.domain_name))?;
            cloud.delete_hosted_zone(id)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CloudCrud<Store, HostedZoneRow> for HostedZoneCloud {
    fn update_or_replace(&self, _cloud: &HostedZoneRow, _db: &HostedZoneRow) -> ChangeKind {
        ChangeKind::Replace
    }

    /// Move the zone's records over to its replacement
    async fn replace(
        &self,
        ctx: &Context<Store>,
        cloud_row: HostedZoneRow,
        db_row: HostedZoneRow,
    ) -> anyhow::Result<Vec<HostedZoneRow>> {
        let cloud = provider(ctx)?;

        // already gone if an earlier attempt got past the delete
        let mut saved = Vec::new();
        if let Some(old) = find_zone(&cloud, &cloud_row.domain_name) {
            for record in cloud.record_sets(&old.zone_id)? {
                if record.is_default_for(&old.domain_name) {
                    continue;
                }
                cloud.change_record_set(ChangeAction::Delete, record.clone())?;
                saved.push(record);
            }
            cloud.delete_hosted_zone(&old.zone_id)?;
        }

        let zone = Self::create_one(&cloud, &db_row)?;
        for mut record in saved {
            record.zone_id.clone_from(&zone.zone_id);
            cloud.change_record_set(ChangeAction::Create, record)?;
        }
        Self::adopt_defaults(ctx, &cloud, &zone).await?;
        info!("replaced hosted zone {} with {}", cloud_row.domain_name, zone.zone_id);

        Ok(vec![HostedZoneRow::from_cloud(zone, db_row.network_name)])
    }
}

// ============================================================================
// Record set
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSetRow {
    pub id: Option<i64>,
    pub zone_name: String,
    pub name: String,
    pub record_type: String,
    pub ttl: Option<u32>,
    pub records: Vec<String>,
}

impl RecordSetRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let joined: String = row.get(5)?;
        Ok(Self {
            id: row.get(0)?,
            zone_name: row.get(1)?,
            name: row.get(2)?,
            record_type: row.get(3)?,
            ttl: row.get(4)?,
            records: split_lines(&joined),
        })
    }

    fn from_cloud(record: RecordSet, zone_name: &str) -> Self {
        Self {
            id: None,
            zone_name: zone_name.to_string(),
            name: record.name,
            record_type: record.record_type,
            ttl: record.ttl,
            records: record.records,
        }
    }

    fn to_cloud(&self, zone_id: &str) -> RecordSet {
        RecordSet {
            zone_id: zone_id.to_string(),
            name: self.name.clone(),
            record_type: self.record_type.clone(),
            ttl: self.ttl,
            records: self.records.clone(),
        }
    }

    /// SOA, or NS at the zone apex
    fn is_default(&self) -> bool {
        let kind = self.record_type.to_uppercase();
        kind == "SOA"
            || (kind == "NS" && normalize_domain(&self.name) == normalize_domain(&self.zone_name))
    }
}

pub struct RecordSetMapper;

impl Mapper<Store> for RecordSetMapper {
    type Entity = RecordSetRow;

    fn table(&self) -> &'static str {
        "record_set"
    }

    fn entity_id(&self, entity: &RecordSetRow) -> String {
        format!(
            "{}|{}|{}",
            normalize_domain(&entity.zone_name),
            normalize_domain(&entity.name),
            entity.record_type.to_uppercase()
        )
    }

    fn equals(&self, a: &RecordSetRow, b: &RecordSetRow) -> bool {
        a.ttl == b.ttl && a.records == b.records
    }

    fn row_id(&self, entity: &RecordSetRow) -> Option<String> {
        entity.id.map(|id| id.to_string())
    }

    fn carry_row(&self, from: &RecordSetRow, mut onto: RecordSetRow) -> RecordSetRow {
        onto.id = from.id;
        onto.zone_name.clone_from(&from.zone_name);
        onto.name.clone_from(&from.name);
        onto
    }

    fn db(&self) -> &dyn Crud<Store, RecordSetRow> {
        &RecordSetRows
    }

    fn cloud(&self) -> &dyn CloudCrud<Store, RecordSetRow> {
        &RecordSetCloud
    }
}

struct RecordSetRows;

#[async_trait]
impl Crud<Store, RecordSetRow> for RecordSetRows {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<RecordSetRow>,
    ) -> anyhow::Result<Vec<RecordSetRow>> {
        let sql = format!(
            "INSERT INTO record_set (id, zone_name, name, record_type, ttl, records)
             VALUES (?1, {ZONE_NAME}, ?3, ?4, ?5, ?6)
             RETURNING id, zone_name"
        );
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    let (id, zone_name) = conn.query_row(
                        &sql,
                        params![
                            Option::<i64>::None,
                            e.zone_name,
                            e.name,
                            e.record_type,
                            e.ttl,
                            e.records.join("\n")
                        ],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    e.id = Some(id);
                    e.zone_name = zone_name;
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<RecordSetRow>> {
        let rows = ctx.database().with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, zone_name, name, record_type, ttl, records
                 FROM record_set ORDER BY id",
            )?;
            stmt.query_map([], RecordSetRow::from_row)?.collect()
        })?;
        Ok(rows)
    }

    /// Upsert; rows without an id land on their natural key
    async fn update(
        &self,
        ctx: &Context<Store>,
        entities: Vec<RecordSetRow>,
    ) -> anyhow::Result<Vec<RecordSetRow>> {
        let sql = format!(
            "INSERT INTO record_set (id, zone_name, name, record_type, ttl, records)
             VALUES (?1, {ZONE_NAME}, ?3, ?4, ?5, ?6)
             ON CONFLICT DO UPDATE SET
                zone_name = excluded.zone_name,
                name = excluded.name,
                record_type = excluded.record_type,
                ttl = excluded.ttl,
                records = excluded.records
             RETURNING id, zone_name"
        );
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    let (id, zone_name) = conn.query_row(
                        &sql,
                        params![
                            e.id,
                            e.zone_name,
                            e.name,
                            e.record_type,
                            e.ttl,
                            e.records.join("\n")
                        ],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    e.id = Some(id);
                    e.zone_name = zone_name;
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn delete(
        &self,
        ctx: &Context<Store>,
        entities: Vec<RecordSetRow>,
    ) -> anyhow::Result<()> {
        ctx.database().with_conn(|conn| {
            for e in &entities {
                conn.execute(
                    "DELETE FROM record_set
                     WHERE rtrim(zone_name, '.') = rtrim(?1, '.')
                       AND rtrim(name, '.') = rtrim(?2, '.')
                       AND upper(record_type) = upper(?3)",
                    params![e.zone_name, e.name, e.record_type],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

struct RecordSetCloud;

impl RecordSetCloud {
    async fn change(
        ctx: &Context<Store>,
        action: ChangeAction,
        entities: Vec<RecordSetRow>,
    ) -> anyhow::Result<Vec<RecordSetRow>> {
        let cloud = provider(ctx)?;
        let mut changed = Vec::with_capacity(entities.len());
        for e in entities {
            let zone = find_zone(&cloud, &e.zone_name)
                .ok_or_else(|| anyhow!("waiting for hosted zone {}", e.zone_name))?;
            let record = cloud
                .change_record_set(action, e.to_cloud(&zone.zone_id))
                .with_context(|| format!("changing record set {} {}", e.name, e.record_type))?;
            changed.push(RecordSetRow::from_cloud(record, &zone.domain_name));
        }
        Ok(changed)
    }

    /// A default record can't be deleted while its zone lives: put the row back
    async fn restore(ctx: &Context<Store>, e: RecordSetRow) -> anyhow::Result<()> {
        let zone_key = normalize_domain(&e.zone_name);
        if HostedZoneMapper.find(ctx, Side::Db, &zone_key).await?.is_none() {
            debug!("zone {zone_key} is going away; leaving {} {}", e.name, e.record_type);
            return Ok(());
        }
        let saved = RecordSetRows.update(ctx, vec![e]).await?;
        for row in saved {
            info!("restored default record {} {}", row.name, row.record_type);
            ctx.memo(Side::Db)
                .upsert(RecordSetMapper.table(), RecordSetMapper.entity_id(&row), row);
        }
        Ok(())
    }
}

#[async_trait]
impl Crud<Store, RecordSetRow> for RecordSetCloud {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<RecordSetRow>,
    ) -> anyhow::Result<Vec<RecordSetRow>> {
        Self::change(ctx, ChangeAction::Create, entities).await
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<RecordSetRow>> {
        let cloud = provider(ctx)?;
        let mut rows = Vec::new();
        for zone in cloud.describe_hosted_zones() {
            rows.extend(
                cloud
                    .record_sets(&zone.zone_id)?
                    .into_iter()
                    .map(|r| RecordSetRow::from_cloud(r, &zone.domain_name)),
            );
        }
        Ok(rows)
    }

    async fn update(
        &self,
        ctx: &Context<Store>,
        entities: Vec<RecordSetRow>,
    ) -> anyhow::Result<Vec<RecordSetRow>> {
        Self::change(ctx, ChangeAction::Upsert, entities).await
    }

    async fn delete(
        &self,
        ctx: &Context<Store>,
        entities: Vec<RecordSetRow>,
    ) -> anyhow::Result<()> {
        let cloud = provider(ctx)?;
        for e in entities {
            if e.is_default() {
                Self::restore(ctx, e).await?;
                continue;
            }
            let Some(zone) = find_zone(&cloud, &e.zone_name) else {
                continue;
            };
            match cloud.change_record_set(ChangeAction::Delete, e.to_cloud(&zone.zone_id)) {
                Ok(_) | Err(sandbox::Error::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl CloudCrud<Store, RecordSetRow> for RecordSetCloud {}
