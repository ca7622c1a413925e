//! Networks and subnets
//!
//! Neither can be changed in place on the provider: any drift is fixed by
//! deleting the cloud resource and creating it again from the row.

use super::{SANDBOX, VERSION, provider};
use anyhow::{Context as _, anyhow, bail};
use async_trait::async_trait;
use converge::{ChangeKind, CloudCrud, Context, Crud, Mapper, Module};
use log::debug;
use rowstore::Store;
use rusqlite::{Row, params};
use sandbox::Sandbox;
use std::collections::HashMap;
use std::sync::Arc;

pub const NAME: &str = "sandbox_network";

const INSTALL: &str = "
    CREATE TABLE network (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        cidr_block TEXT NOT NULL,
        network_id TEXT UNIQUE
    );

    CREATE TABLE subnet (
        id INTEGER PRIMARY KEY,
        network_name TEXT NOT NULL REFERENCES network(name) ON UPDATE CASCADE,
        cidr_block TEXT NOT NULL,
        availability_zone TEXT NOT NULL DEFAULT 'zone-a',
        subnet_id TEXT UNIQUE,
        available_ips INTEGER,
        UNIQUE (network_name, cidr_block)
    );
";

const UNINSTALL: &str = "
    DROP TABLE subnet;
    DROP TABLE network;
";

pub fn module(cloud: &Arc<Sandbox>) -> Module<Store> {
    Module::new(NAME, VERSION)
        .provide(SANDBOX, Arc::clone(cloud))
        .mapper(NetworkMapper)
        .mapper(SubnetMapper)
        .on_install(|tx| tx.execute(INSTALL))
        .on_uninstall(|tx| tx.execute(UNINSTALL))
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRow {
    pub id: Option<i64>,
    pub name: String,
    pub cidr_block: String,
    pub network_id: Option<String>,
}

impl NetworkRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            cidr_block: row.get(2)?,
            network_id: row.get(3)?,
        })
    }
}

impl From<sandbox::Network> for NetworkRow {
    fn from(network: sandbox::Network) -> Self {
        Self {
            id: None,
            name: network.name,
            cidr_block: network.cidr_block,
            network_id: Some(network.network_id),
        }
    }
}

pub struct NetworkMapper;

impl Mapper<Store> for NetworkMapper {
    type Entity = NetworkRow;

    fn table(&self) -> &'static str {
        "network"
    }

    fn entity_id(&self, entity: &NetworkRow) -> String {
        entity.name.clone()
    }

    fn equals(&self, a: &NetworkRow, b: &NetworkRow) -> bool {
        a.cidr_block == b.cidr_block && a.network_id == b.network_id
    }

    fn row_id(&self, entity: &NetworkRow) -> Option<String> {
        entity.id.map(|id| id.to_string())
    }

    fn carry_row(&self, from: &NetworkRow, mut onto: NetworkRow) -> NetworkRow {
        onto.id = from.id;
        onto
    }

    fn db(&self) -> &dyn Crud<Store, NetworkRow> {
        &NetworkRows
    }

    fn cloud(&self) -> &dyn CloudCrud<Store, NetworkRow> {
        &NetworkCloud
    }
}

struct NetworkRows;

#[async_trait]
impl Crud<Store, NetworkRow> for NetworkRows {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<NetworkRow>,
    ) -> anyhow::Result<Vec<NetworkRow>> {
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    e.id = Some(conn.query_row(
                        "INSERT INTO network (name, cidr_block, network_id)
                         VALUES (?1, ?2, ?3) RETURNING id",
                        params![e.name, e.cidr_block, e.network_id],
                        |row| row.get(0),
                    )?);
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<NetworkRow>> {
        let rows = ctx.database().with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, cidr_block, network_id FROM network ORDER BY id")?;
            stmt.query_map([], NetworkRow::from_row)?.collect()
        })?;
        Ok(rows)
    }

    async fn update(
        &self,
        ctx: &Context<Store>,
        entities: Vec<NetworkRow>,
    ) -> anyhow::Result<Vec<NetworkRow>> {
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    e.id = Some(conn.query_row(
                        "INSERT INTO network (id, name, cidr_block, network_id)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT DO UPDATE SET
                            name = excluded.name,
                            cidr_block = excluded.cidr_block,
                            network_id = excluded.network_id
                         RETURNING id",
                        params![e.id, e.name, e.cidr_block, e.network_id],
                        |row| row.get(0),
                    )?);
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn delete(&self, ctx: &Context<Store>, entities: Vec<NetworkRow>) -> anyhow::Result<()> {
        ctx.database().with_conn(|conn| {
            for e in &entities {
                conn.execute("DELETE FROM network WHERE name = ?1", [&e.name])?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

struct NetworkCloud;

#[async_trait]
impl Crud<Store, NetworkRow> for NetworkCloud {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<NetworkRow>,
    ) -> anyhow::Result<Vec<NetworkRow>> {
        let cloud = provider(ctx)?;
        entities
            .iter()
            .map(|e| {
                cloud
                    .create_network(&e.name, &e.cidr_block)
                    .map(NetworkRow::from)
                    .with_context(|| format!("creating network {}", e.name))
            })
            .collect()
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<NetworkRow>> {
        Ok(provider(ctx)?
            .describe_networks()
            .into_iter()
            .map(NetworkRow::from)
            .collect())
    }

    async fn update(
        &self,
        _ctx: &Context<Store>,
        entities: Vec<NetworkRow>,
    ) -> anyhow::Result<Vec<NetworkRow>> {
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        bail!("networks cannot be modified in place: {}", names.join(", "))
    }

    async fn delete(&self, ctx: &Context<Store>, entities: Vec<NetworkRow>) -> anyhow::Result<()> {
        let cloud = provider(ctx)?;
        for e in entities {
            let id = e
                .network_id
                .as_deref()
                .ok_or_else(|| anyhow!("network {} has no provider id", e.name))?;
            cloud.delete_network(id).map_err(|err| {
                if err.is_transient() {
                    debug!("network {id} not deletable yet: {err}");
                }
                err
            })?;
        }
        Ok(())
    }
}

impl CloudCrud<Store, NetworkRow> for NetworkCloud {
    fn update_or_replace(&self, _cloud: &NetworkRow, _db: &NetworkRow) -> ChangeKind {
        ChangeKind::Replace
    }
}

// ============================================================================
// Subnet
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRow {
    pub id: Option<i64>,
    pub network_name: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub subnet_id: Option<String>,
    pub available_ips: Option<i64>,
}

impl SubnetRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            network_name: row.get(1)?,
            cidr_block: row.get(2)?,
            availability_zone: row.get(3)?,
            subnet_id: row.get(4)?,
            available_ips: row.get(5)?,
        })
    }

    fn from_cloud(subnet: sandbox::Subnet, network_name: String) -> Self {
        Self {
            id: None,
            network_name,
            cidr_block: subnet.cidr_block,
            availability_zone: subnet.availability_zone,
            subnet_id: Some(subnet.subnet_id),
            available_ips: i64::try_from(subnet.available_ip_address_count).ok(),
        }
    }
}

pub struct SubnetMapper;

impl Mapper<Store> for SubnetMapper {
    type Entity = SubnetRow;

    fn table(&self) -> &'static str {
        "subnet"
    }

    /// CIDR blocks never overlap within a network, so the pair is unique
    fn entity_id(&self, entity: &SubnetRow) -> String {
        format!("{}|{}", entity.network_name, entity.cidr_block)
    }

    fn equals(&self, a: &SubnetRow, b: &SubnetRow) -> bool {
        a.availability_zone == b.availability_zone
            && a.subnet_id == b.subnet_id
            && a.available_ips == b.available_ips
    }

    fn row_id(&self, entity: &SubnetRow) -> Option<String> {
        entity.id.map(|id| id.to_string())
    }

    fn carry_row(&self, from: &SubnetRow, mut onto: SubnetRow) -> SubnetRow {
        onto.id = from.id;
        onto
    }

    fn db(&self) -> &dyn Crud<Store, SubnetRow> {
        &SubnetRows
    }

    fn cloud(&self) -> &dyn CloudCrud<Store, SubnetRow> {
        &SubnetCloud
    }
}

struct SubnetRows;

#[async_trait]
impl Crud<Store, SubnetRow> for SubnetRows {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<SubnetRow>,
    ) -> anyhow::Result<Vec<SubnetRow>> {
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    e.id = Some(conn.query_row(
                        "INSERT INTO subnet
                            (network_name, cidr_block, availability_zone, subnet_id, available_ips)
                         VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
                        params![
                            e.network_name,
                            e.cidr_block,
                            e.availability_zone,
                            e.subnet_id,
                            e.available_ips
                        ],
                        |row| row.get(0),
                    )?);
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<SubnetRow>> {
        let rows = ctx.database().with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, network_name, cidr_block, availability_zone, subnet_id, available_ips
                 FROM subnet ORDER BY id",
            )?;
            stmt.query_map([], SubnetRow::from_row)?.collect()
        })?;
        Ok(rows)
    }

    async fn update(
        &self,
        ctx: &Context<Store>,
        entities: Vec<SubnetRow>,
    ) -> anyhow::Result<Vec<SubnetRow>> {
        let saved = ctx.database().with_conn(|conn| {
            entities
                .into_iter()
                .map(|mut e| {
                    e.id = Some(conn.query_row(
                        "INSERT INTO subnet
                            (id, network_name, cidr_block, availability_zone,
                             subnet_id, available_ips)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT DO UPDATE SET
                            network_name = excluded.network_name,
                            cidr_block = excluded.cidr_block,
                            availability_zone = excluded.availability_zone,
                            subnet_id = excluded.subnet_id,
                            available_ips = excluded.available_ips
                         RETURNING id",
                        params![
                            e.id,
                            e.network_name,
                            e.cidr_block,
                            e.availability_zone,
                            e.subnet_id,
                            e.available_ips
                        ],
                        |row| row.get(0),
                    )?);
                    Ok(e)
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(saved)
    }

    async fn delete(&self, ctx: &Context<Store>, entities: Vec<SubnetRow>) -> anyhow::Result<()> {
        ctx.database().with_conn(|conn| {
            for e in &entities {
                conn.execute(
                    "DELETE FROM subnet WHERE network_name = ?1 AND cidr_block = ?2",
                    params![e.network_name, e.cidr_block],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }
}

struct SubnetCloud;

#[async_trait]
impl Crud<Store, SubnetRow> for SubnetCloud {
    async fn create(
        &self,
        ctx: &Context<Store>,
        entities: Vec<SubnetRow>,
    ) -> anyhow::Result<Vec<SubnetRow>> {
        let cloud = provider(ctx)?;
        let mut created = Vec::with_capacity(entities.len());
        for e in entities {
            // the network may be created in the same round
            let network = cloud
                .describe_networks()
                .into_iter()
                .find(|n| n.name == e.network_name)
                .ok_or_else(|| anyhow!("waiting for network {}", e.network_name))?;
            let subnet = cloud
                .create_subnet(&network.network_id, &e.cidr_block, &e.availability_zone)
                .with_context(|| {
                    format!("creating subnet {} in {}", e.cidr_block, e.network_name)
                })?;
            created.push(SubnetRow::from_cloud(subnet, network.name));
        }
        Ok(created)
    }

    async fn read(&self, ctx: &Context<Store>) -> anyhow::Result<Vec<SubnetRow>> {
        let cloud = provider(ctx)?;
        let names: HashMap<String, String> = cloud
            .describe_networks()
            .into_iter()
            .map(|n| (n.network_id, n.name))
            .collect();
        Ok(cloud
            .describe_subnets()
            .into_iter()
            .filter_map(|s| {
                let name = names.get(&s.network_id)?.clone();
                Some(SubnetRow::from_cloud(s, name))
            })
            .collect())
    }

    async fn update(
        &self,
        _ctx: &Context<Store>,
        entities: Vec<SubnetRow>,
    ) -> anyhow::Result<Vec<SubnetRow>> {
        let ids: Vec<String> = entities
            .iter()
            .map(|e| format!("{}|{}", e.network_name, e.cidr_block))
            .collect();
        bail!("subnets cannot be modified in place: {}", ids.join(", "))
    }

    async fn delete(&self, ctx: &Context<Store>, entities: Vec<SubnetRow>) -> anyhow::Result<()> {
        let cloud = provider(ctx)?;
        for e in entities {
            let id = e
                .subnet_id
                .as_deref()
                .ok_or_else(|| anyhow!("subnet {} has no provider id", e.cidr_block))?;
            cloud.delete_subnet(id)?;
        }
        Ok(())
    }
}

impl CloudCrud<Store, SubnetRow> for SubnetCloud {
    fn update_or_replace(&self, _cloud: &SubnetRow, _db: &SubnetRow) -> ChangeKind {
        ChangeKind::Replace
    }
}
