use serde::{Deserialize, Serialize};

/// An isolated virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Provider-assigned id, `net-` prefixed
    pub network_id: String,
    /// Unique name
    pub name: String,
    /// IPv4 range, e.g. `10.0.0.0/16`
    pub cidr_block: String,
}

/// An address range carved out of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Provider-assigned id, `subnet-` prefixed
    pub subnet_id: String,
    /// Owning network
    pub network_id: String,
    /// IPv4 range inside the network's block
    pub cidr_block: String,
    /// Placement label, e.g. `zone-a`
    pub availability_zone: String,
    /// Usable addresses (five per subnet are reserved)
    pub available_ip_address_count: u64,
}

/// A DNS zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    /// Provider-assigned id, `zone-` prefixed
    pub zone_id: String,
    /// Fully qualified, always ending in a dot
    pub domain_name: String,
    /// Set for private zones
    pub network_id: Option<String>,
}

/// A named set of DNS records of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Zone the set lives in
    pub zone_id: String,
    /// Fully qualified, always ending in a dot
    pub name: String,
    /// `A`, `CNAME`, `NS`, `SOA`, ...
    pub record_type: String,
    /// Time to live in seconds
    pub ttl: Option<u32>,
    /// Record values
    pub records: Vec<String>,
}

impl RecordSet {
    /// Whether this is one of the records a zone is created with
    pub fn is_default_for(&self, domain_name: &str) -> bool {
        self.record_type == "SOA" || (self.record_type == "NS" && self.name == domain_name)
    }
}

/// Record-set change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    /// Fail if the set exists
    Create,
    /// Create or overwrite
    Upsert,
    /// Fail if the set is missing
    Delete,
}

/// Everything the provider knows, as persisted on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxState {
    /// Networks in creation order
    pub networks: Vec<Network>,
    /// Subnets in creation order
    pub subnets: Vec<Subnet>,
    /// Zones in creation order
    pub hosted_zones: Vec<HostedZone>,
    /// Record sets in creation order
    pub record_sets: Vec<RecordSet>,
    /// Counter behind generated ids
    pub next_id: u64,
}

impl SandboxState {
    pub(crate) fn generate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08x}", self.next_id)
    }
}
