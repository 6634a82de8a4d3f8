//! ARM wire types
//!
//! Only the fields a teardown reads are modelled; everything else in the ARM
//! payloads is ignored during deserialization.

use serde::{Deserialize, Serialize};

/// Reference to another ARM resource by its full id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdReference {
    pub id: String,
}

impl IdReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Resource name: the last `/` segment of the id
    pub fn name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

/// Virtual machine as returned by `GET .../virtualMachines/{name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub properties: VirtualMachineProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    #[serde(default)]
    pub storage_profile: StorageProfile,
    #[serde(default)]
    pub network_profile: NetworkProfile,
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(default)]
    pub os_disk: Option<OsDisk>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsDisk {
    #[serde(default)]
    pub name: Option<String>,
    /// Present for unmanaged disks stored as page blobs
    #[serde(default)]
    pub vhd: Option<VirtualHardDisk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHardDisk {
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    #[serde(default)]
    pub network_interfaces: Vec<IdReference>,
}

/// Network interface card as returned by `GET .../networkInterfaces/{name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfaceCard {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: NetworkInterfaceCardProperties,
}

impl NetworkInterfaceCard {
    /// Names of the public IPs attached to any IP configuration of this NIC
    pub fn public_ip_names(&self) -> Vec<String> {
        self.properties
            .ip_configurations
            .iter()
            .filter_map(|config| config.properties.public_ip_address.as_ref())
            .map(|reference| reference.name().to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceCardProperties {
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpConfiguration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: IpConfigurationProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpConfigurationProperties {
    #[serde(rename = "publicIPAddress", default)]
    pub public_ip_address: Option<IdReference>,
}

/// Access keys returned by the storage account `listKeys` action
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageServiceKeys {
    pub key1: String,
    pub key2: String,
}

impl std::fmt::Debug for StorageServiceKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageServiceKeys").finish_non_exhaustive()
    }
}

/// Entry of an ARM collection listing; only the name is needed
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NamedResource {
    pub name: String,
}

/// One page of an ARM collection listing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResourceList {
    #[serde(default)]
    pub value: Vec<NamedResource>,
    #[serde(default)]
    pub next_link: Option<String>,
}

/// URI of an ARM asynchronous operation, polled until it completes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    pub fn uri(&self) -> &str {
        &self.0
    }
}

/// Immediate result of a delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// The resource did not exist
    AlreadyAbsent,
    /// The resource was deleted synchronously
    Deleted,
    /// Deletion was accepted; completion must be polled
    Pending(OperationHandle),
}

/// State of an asynchronous ARM operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}
