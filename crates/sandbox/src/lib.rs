//! # sandbox
//!
//! A simulated cloud provider whose whole state lives in one JSON file.
//!
//! It offers just enough of a real provider's surface to exercise a
//! reconciliation engine end to end: networks, subnets, DNS zones and record
//! sets, each with provider-assigned ids and the referential checks a real
//! API performs.
//!
//! ## Behaviour
//!
//! - Subnets and private zones need their network to exist
//! - Networks with subnets or private zones cannot be deleted
//! - New zones get a default `SOA` record and an apex `NS` record
//! - Default records cannot be deleted, and zones holding any other
//!   records cannot be deleted either
//! - Domain and record names are normalised to end in a dot
//!
//! ## Example
//!
//! ```no_run
//! use sandbox::Sandbox;
//! use std::path::Path;
//!
//! let cloud = Sandbox::open(Path::new("/tmp/sandbox.json"))?;
//! let network = cloud.create_network("main", "10.0.0.0/16")?;
//! let subnet = cloud.create_subnet(&network.network_id, "10.0.1.0/24", "zone-a")?;
//! assert_eq!(subnet.available_ip_address_count, 251);
//! # Ok::<(), sandbox::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Error types for provider calls.
pub mod error;
/// Resource types and the persisted state.
pub mod types;

pub use error::{Error, Result};
pub use types::{ChangeAction, HostedZone, Network, RecordSet, SandboxState, Subnet};

use log::{debug, info};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Addresses every subnet holds back for the provider
const RESERVED_ADDRESSES: u64 = 5;

const NAMESERVERS: [&str; 2] = ["ns-1.sandbox.test.", "ns-2.sandbox.test."];

/// Handle on a simulated provider.
///
/// Every mutating call is applied to a copy of the state, persisted, and only
/// then made visible, so a failed write leaves the previous state intact.
#[derive(Debug)]
pub struct Sandbox {
    path: Option<PathBuf>,
    state: Mutex<SandboxState>,
}

impl Sandbox {
    /// Load the state file at `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            SandboxState::default()
        };
        debug!("sandbox state at {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// A provider that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Copy of the full state.
    pub fn snapshot(&self) -> SandboxState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(&self, change: impl FnOnce(&mut SandboxState) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = change(&mut next)?;
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *guard = next;
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Networks
    // ------------------------------------------------------------------

    /// Create a network; names are unique.
    pub fn create_network(&self, name: &str, cidr_block: &str) -> Result<Network> {
        parse_cidr(cidr_block)?;
        self.mutate(|state| {
            if state.networks.iter().any(|n| n.name == name) {
                return Err(Error::AlreadyExists {
                    kind: "network",
                    key: name.to_string(),
                });
            }
            let network = Network {
                network_id: state.generate_id("net"),
                name: name.to_string(),
                cidr_block: cidr_block.to_string(),
            };
            info!("created network {} ({})", network.network_id, network.name);
            state.networks.push(network.clone());
            Ok(network)
        })
    }

    /// All networks.
    pub fn describe_networks(&self) -> Vec<Network> {
        self.lock().networks.clone()
    }

    /// One network by id.
    pub fn network(&self, network_id: &str) -> Result<Network> {
        self.lock()
            .networks
            .iter()
            .find(|n| n.network_id == network_id)
            .cloned()
            .ok_or_else(|| Error::not_found("network", network_id))
    }

    /// Delete a network that nothing references anymore.
    pub fn delete_network(&self, network_id: &str) -> Result<()> {
        self.mutate(|state| {
            let index = state
                .networks
                .iter()
                .position(|n| n.network_id == network_id)
                .ok_or_else(|| Error::not_found("network", network_id))?;

            let subnets = state
                .subnets
                .iter()
                .filter(|s| s.network_id == network_id)
                .count();
            let zones = state
                .hosted_zones
                .iter()
                .filter(|z| z.network_id.as_deref() == Some(network_id))
                .count();
            if subnets + zones > 0 {
                return Err(Error::DependencyViolation(format!(
                    "network {network_id} still has {subnets} subnets and {zones} private zones"
                )));
            }

            state.networks.remove(index);
            info!("deleted network {network_id}");
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Subnets
    // ------------------------------------------------------------------

    /// Create a subnet inside an existing network's range.
    pub fn create_subnet(
        &self,
        network_id: &str,
        cidr_block: &str,
        availability_zone: &str,
    ) -> Result<Subnet> {
        let (address, prefix) = parse_cidr(cidr_block)?;
        self.mutate(|state| {
            let network = state
                .networks
                .iter()
                .find(|n| n.network_id == network_id)
                .ok_or_else(|| Error::not_found("network", network_id))?;

            let (net_address, net_prefix) = parse_cidr(&network.cidr_block)?;
            if prefix < net_prefix || mask(net_prefix) & address != net_address {
                return Err(Error::InvalidCidr(format!(
                    "{cidr_block} is outside network range {}",
                    network.cidr_block
                )));
            }
            if let Some(taken) = state
                .subnets
                .iter()
                .filter(|s| s.network_id == network_id)
                .find(|s| {
                    parse_cidr(&s.cidr_block)
                        .is_ok_and(|other| overlaps(other, (address, prefix)))
                })
            {
                return Err(Error::InvalidCidr(format!(
                    "{cidr_block} overlaps subnet {}",
                    taken.subnet_id
                )));
            }

            let subnet = Subnet {
                subnet_id: state.generate_id("subnet"),
                network_id: network_id.to_string(),
                cidr_block: cidr_block.to_string(),
                availability_zone: availability_zone.to_string(),
                available_ip_address_count: available_addresses(prefix),
            };
            info!("created subnet {} in {network_id}", subnet.subnet_id);
            state.subnets.push(subnet.clone());
            Ok(subnet)
        })
    }

    /// All subnets.
    pub fn describe_subnets(&self) -> Vec<Subnet> {
        self.lock().subnets.clone()
    }

    /// Delete a subnet.
    pub fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.mutate(|state| {
            let before = state.subnets.len();
            state.subnets.retain(|s| s.subnet_id != subnet_id);
            if state.subnets.len() == before {
                return Err(Error::not_found("subnet", subnet_id));
            }
            info!("deleted subnet {subnet_id}");
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Hosted zones
    // ------------------------------------------------------------------

    /// Create a zone with its default `SOA` and apex `NS` records.
    ///
    /// A `network_id` makes the zone private to that network.
    pub fn create_hosted_zone(
        &self,
        domain_name: &str,
        network_id: Option<&str>,
    ) -> Result<HostedZone> {
        let domain_name = normalize_domain(domain_name);
        if domain_name == "." {
            return Err(Error::InvalidChange("empty domain name".to_string()));
        }

        self.mutate(|state| {
            if let Some(network_id) = network_id
                && !state.networks.iter().any(|n| n.network_id == network_id)
            {
                return Err(Error::not_found("network", network_id));
            }
            if state
                .hosted_zones
                .iter()
                .any(|z| z.domain_name == domain_name)
            {
                return Err(Error::AlreadyExists {
                    kind: "hosted zone",
                    key: domain_name,
                });
            }

            let zone = HostedZone {
                zone_id: state.generate_id("zone"),
                domain_name: domain_name.clone(),
                network_id: network_id.map(ToString::to_string),
            };
            state.record_sets.extend(default_records(&zone));
            info!("created hosted zone {} ({domain_name})", zone.zone_id);
            state.hosted_zones.push(zone.clone());
            Ok(zone)
        })
    }

    /// All zones.
    pub fn describe_hosted_zones(&self) -> Vec<HostedZone> {
        self.lock().hosted_zones.clone()
    }

    /// One zone by id.
    pub fn hosted_zone(&self, zone_id: &str) -> Result<HostedZone> {
        self.lock()
            .hosted_zones
            .iter()
            .find(|z| z.zone_id == zone_id)
            .cloned()
            .ok_or_else(|| Error::not_found("hosted zone", zone_id))
    }

    /// Delete a zone holding nothing but its default records.
    pub fn delete_hosted_zone(&self, zone_id: &str) -> Result<()> {
        self.mutate(|state| {
            let index = state
                .hosted_zones
                .iter()
                .position(|z| z.zone_id == zone_id)
                .ok_or_else(|| Error::not_found("hosted zone", zone_id))?;
            let domain = state.hosted_zones[index].domain_name.clone();

            let extra = state
                .record_sets
                .iter()
                .filter(|r| r.zone_id == zone_id && !r.is_default_for(&domain))
                .count();
            if extra > 0 {
                return Err(Error::DependencyViolation(format!(
                    "hosted zone {zone_id} still holds {extra} record sets"
                )));
            }

            state.record_sets.retain(|r| r.zone_id != zone_id);
            state.hosted_zones.remove(index);
            info!("deleted hosted zone {zone_id}");
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Record sets
    // ------------------------------------------------------------------

    /// Record sets of one zone.
    pub fn record_sets(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        let state = self.lock();
        if !state.hosted_zones.iter().any(|z| z.zone_id == zone_id) {
            return Err(Error::not_found("hosted zone", zone_id));
        }
        Ok(state
            .record_sets
            .iter()
            .filter(|r| r.zone_id == zone_id)
            .cloned()
            .collect())
    }

    /// Apply one change to a zone's record sets.
    ///
    /// Returns the set as stored; for deletes, the set that was removed.
    pub fn change_record_set(&self, action: ChangeAction, record: RecordSet) -> Result<RecordSet> {
        let mut record = record;
        record.name = normalize_domain(&record.name);
        if record.records.is_empty() && action != ChangeAction::Delete {
            return Err(Error::InvalidChange(format!(
                "{} {} has no values",
                record.name, record.record_type
            )));
        }

        self.mutate(|state| {
            let zone = state
                .hosted_zones
                .iter()
                .find(|z| z.zone_id == record.zone_id)
                .ok_or_else(|| Error::not_found("hosted zone", record.zone_id.clone()))?;
            let domain = zone.domain_name.clone();
            if record.name != domain && !record.name.ends_with(&format!(".{domain}")) {
                return Err(Error::InvalidChange(format!(
                    "{} is not within {domain}",
                    record.name
                )));
            }

            let existing = state.record_sets.iter().position(|r| {
                r.zone_id == record.zone_id
                    && r.name == record.name
                    && r.record_type == record.record_type
            });
            let key = format!("{} {}", record.name, record.record_type);

            match (action, existing) {
                (ChangeAction::Create, Some(_)) => Err(Error::AlreadyExists {
                    kind: "record set",
                    key,
                }),
                (ChangeAction::Create | ChangeAction::Upsert, None) => {
                    state.record_sets.push(record.clone());
                    debug!("created record set {key}");
                    Ok(record)
                }
                (ChangeAction::Upsert, Some(index)) => {
                    state.record_sets[index] = record.clone();
                    debug!("upserted record set {key}");
                    Ok(record)
                }
                (ChangeAction::Delete, None) => Err(Error::not_found("record set", key)),
                (ChangeAction::Delete, Some(index)) => {
                    if state.record_sets[index].is_default_for(&domain) {
                        return Err(Error::InvalidChange(format!(
                            "{key} is a default record of {domain}"
                        )));
                    }
                    debug!("deleted record set {key}");
                    Ok(state.record_sets.remove(index))
                }
            }
        })
    }
}

fn persist(path: &Path, state: &SandboxState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn default_records(zone: &HostedZone) -> [RecordSet; 2] {
    [
        RecordSet {
            zone_id: zone.zone_id.clone(),
            name: zone.domain_name.clone(),
            record_type: "SOA".to_string(),
            ttl: Some(900),
            records: vec![format!(
                "{} hostmaster.sandbox.test. 1 7200 900 1209600 86400",
                NAMESERVERS[0]
            )],
        },
        RecordSet {
            zone_id: zone.zone_id.clone(),
            name: zone.domain_name.clone(),
            record_type: "NS".to_string(),
            ttl: Some(172_800),
            records: NAMESERVERS.iter().map(ToString::to_string).collect(),
        },
    ]
}

// ============================================================================
// Utility functions
// ============================================================================

/// Append the trailing dot of a fully qualified name if it is missing.
pub fn normalize_domain(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.ends_with('.') {
        trimmed.to_string()
    } else {
        format!("{trimmed}.")
    }
}

/// Split `a.b.c.d/n` into the address and prefix length.
///
/// Host bits must be zero and the prefix between /16 and /28.
pub fn parse_cidr(cidr: &str) -> Result<(u32, u8)> {
    let invalid = || Error::InvalidCidr(cidr.to_string());
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if !(16..=28).contains(&prefix) {
        return Err(invalid());
    }

    let address = u32::from(address);
    if address & !mask(prefix) != 0 {
        return Err(invalid());
    }
    Ok((address, prefix))
}

fn mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn overlaps(a: (u32, u8), b: (u32, u8)) -> bool {
    let shorter = a.1.min(b.1);
    a.0 & mask(shorter) == b.0 & mask(shorter)
}

/// Usable addresses in a block of the given prefix length.
pub fn available_addresses(prefix: u8) -> u64 {
    (1u64 << (32 - u32::from(prefix.min(32)))).saturating_sub(RESERVED_ADDRESSES)
}
