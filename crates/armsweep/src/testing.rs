//! In-memory ARM and blob service for exercising teardowns
//!
//! [`FakeCloud`] keeps a small model of resource groups and records every
//! call made against it, in order, so tests can assert on the exact
//! sequence a teardown produced. Clones share state.

use crate::arm::types::{
    IdReference, IpConfiguration, IpConfigurationProperties, NetworkInterfaceCardProperties,
    NetworkProfile, OsDisk, StorageProfile, VirtualHardDisk, VirtualMachineProperties,
};
use crate::arm::{
    ArmError, ArmOperations, DeletionOutcome, NetworkInterfaceCard, OperationHandle,
    OperationStatus, StorageServiceKeys, VirtualMachine,
};
use crate::storage::{BlobStore, BlobStoreFactory};
use anyhow::Result;
use armsweep_common::ResourceKind;
use armsweep_common::defaults::DEFAULT_BLOB_ENDPOINT_SUFFIX;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One call observed by the fake, in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetVirtualMachine { group: String, name: String },
    GetNetworkInterface { group: String, name: String },
    GetStorageKeys { group: String, account: String },
    List { kind: ResourceKind, group: String },
    Delete { kind: ResourceKind, group: String, name: String },
    DeleteResourceGroup { group: String },
    OperationStatus { handle: String },
    OpenBlobStore { account: String },
    DeleteContainer { account: String, container: String },
    CustomImageExists { account: String },
    CloseBlobStore { account: String },
}

/// How the fake answers a delete request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteBehavior {
    /// Delete synchronously
    #[default]
    Immediate,
    /// Return an operation that stays in progress for `polls` polls, then settles
    Async { polls: u32, result: OperationStatus },
    /// Return an operation that never settles
    Hang,
}

type Key = (String, String);

#[derive(Debug)]
struct PendingOperation {
    target: Target,
    polls_left: Option<u32>,
    result: OperationStatus,
}

#[derive(Debug, Clone)]
enum Target {
    Resource(ResourceKind, Key),
    Group(String),
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeSet<String>,
    resources: BTreeMap<ResourceKind, BTreeSet<Key>>,
    vms: BTreeMap<Key, VirtualMachine>,
    nics: BTreeMap<Key, NetworkInterfaceCard>,
    storage_keys: BTreeMap<Key, StorageServiceKeys>,
    containers: BTreeSet<(String, String)>,
    custom_images: BTreeSet<String>,

    default_delete: DeleteBehavior,
    delete_overrides: HashMap<(ResourceKind, String), DeleteBehavior>,
    group_delete: DeleteBehavior,
    pending: HashMap<String, PendingOperation>,
    next_operation: u64,

    storage_key_error: bool,
    blob_error: bool,
    open_stores: usize,
    closed_stores: usize,

    calls: Vec<Call>,
}

impl State {
    fn contains(&self, kind: ResourceKind, key: &Key) -> bool {
        self.resources.get(&kind).is_some_and(|set| set.contains(key))
    }

    fn remove(&mut self, target: &Target) {
        match target {
            Target::Resource(kind, key) => {
                if let Some(set) = self.resources.get_mut(kind) {
                    set.remove(key);
                }
                match kind {
                    ResourceKind::VirtualMachine => {
                        self.vms.remove(key);
                    }
                    ResourceKind::NetworkInterface => {
                        self.nics.remove(key);
                    }
                    ResourceKind::StorageAccount => {
                        self.storage_keys.remove(key);
                    }
                    ResourceKind::PublicIpAddress => {}
                }
            }
            Target::Group(group) => {
                self.groups.remove(group);
            }
        }
    }

    fn start(&mut self, target: Target, behavior: DeleteBehavior) -> DeletionOutcome {
        let (polls_left, result) = match behavior {
            DeleteBehavior::Immediate => {
                self.remove(&target);
                return DeletionOutcome::Deleted;
            }
            DeleteBehavior::Async { polls, result } => (Some(polls), result),
            DeleteBehavior::Hang => (None, OperationStatus::InProgress),
        };

        self.next_operation += 1;
        let uri = format!("https://fake.invalid/operations/{}", self.next_operation);
        self.pending.insert(
            uri.clone(),
            PendingOperation {
                target,
                polls_left,
                result,
            },
        );
        DeletionOutcome::Pending(OperationHandle(uri))
    }
}

/// Shared in-memory cloud
#[derive(Debug, Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<State>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, kind: ResourceKind, group: &str, name: &str) {
        let mut state = self.state();
        state.groups.insert(group.to_string());
        state
            .resources
            .entry(kind)
            .or_default()
            .insert((group.to_string(), name.to_string()));
    }

    /// Add a VM with its NICs (each with its public IPs), optionally backed
    /// by an unmanaged disk in `storage_account`.
    ///
    /// NICs, public IPs and the storage account are created too.
    pub fn add_virtual_machine(
        &self,
        group: &str,
        name: &str,
        nics: &[(&str, &[&str])],
        storage_account: Option<&str>,
    ) {
        for (nic, ips) in nics {
            self.add_network_interface(group, nic, ips);
        }
        if let Some(account) = storage_account {
            self.add_storage_account(group, account);
        }

        let vm = VirtualMachine {
            id: resource_id(ResourceKind::VirtualMachine, group, name),
            name: name.to_string(),
            location: group.rsplit('-').next().unwrap_or(group).to_string(),
            properties: VirtualMachineProperties {
                storage_profile: StorageProfile {
                    os_disk: Some(OsDisk {
                        name: Some(format!("{name}osdisk")),
                        vhd: storage_account.map(|account| VirtualHardDisk {
                            uri: format!(
                                "https://{account}.{DEFAULT_BLOB_ENDPOINT_SUFFIX}/vhds/{name}osdisk.vhd"
                            ),
                        }),
                    }),
                },
                network_profile: NetworkProfile {
                    network_interfaces: nics
                        .iter()
                        .map(|(nic, _)| {
                            IdReference::new(resource_id(ResourceKind::NetworkInterface, group, nic))
                        })
                        .collect(),
                },
                provisioning_state: Some("Succeeded".to_string()),
            },
        };

        self.insert(ResourceKind::VirtualMachine, group, name);
        self.state()
            .vms
            .insert((group.to_string(), name.to_string()), vm);
    }

    /// Add a NIC and the public IPs attached to it
    pub fn add_network_interface(&self, group: &str, name: &str, public_ips: &[&str]) {
        for ip in public_ips {
            self.add_public_ip(group, ip);
        }

        let nic = NetworkInterfaceCard {
            id: resource_id(ResourceKind::NetworkInterface, group, name),
            name: name.to_string(),
            properties: NetworkInterfaceCardProperties {
                ip_configurations: public_ips
                    .iter()
                    .enumerate()
                    .map(|(i, ip)| IpConfiguration {
                        name: format!("ipconfig{}", i + 1),
                        properties: IpConfigurationProperties {
                            public_ip_address: Some(IdReference::new(resource_id(
                                ResourceKind::PublicIpAddress,
                                group,
                                ip,
                            ))),
                        },
                    })
                    .collect(),
            },
        };

        self.insert(ResourceKind::NetworkInterface, group, name);
        self.state()
            .nics
            .insert((group.to_string(), name.to_string()), nic);
    }

    pub fn add_public_ip(&self, group: &str, name: &str) {
        self.insert(ResourceKind::PublicIpAddress, group, name);
    }

    /// Add a storage account holding a `vhds` container
    pub fn add_storage_account(&self, group: &str, name: &str) {
        self.insert(ResourceKind::StorageAccount, group, name);
        let mut state = self.state();
        state.storage_keys.insert(
            (group.to_string(), name.to_string()),
            StorageServiceKeys {
                key1: format!("{name}-key1"),
                key2: format!("{name}-key2"),
            },
        );
        state.containers.insert((name.to_string(), "vhds".to_string()));
    }

    pub fn add_resource_group(&self, group: &str) {
        self.state().groups.insert(group.to_string());
    }

    /// Mark `account` as holding captured images
    pub fn add_custom_image(&self, account: &str) {
        self.state().custom_images.insert(account.to_string());
    }

    /// Behaviour for every resource delete without an override
    pub fn set_delete_behavior(&self, behavior: DeleteBehavior) {
        self.state().default_delete = behavior;
    }

    /// Behaviour for deleting one resource
    pub fn set_delete_behavior_for(&self, kind: ResourceKind, name: &str, behavior: DeleteBehavior) {
        self.state()
            .delete_overrides
            .insert((kind, name.to_string()), behavior);
    }

    pub fn set_group_delete_behavior(&self, behavior: DeleteBehavior) {
        self.state().group_delete = behavior;
    }

    /// Make `listKeys` fail with a non-"not found" error
    pub fn fail_storage_keys(&self) {
        self.state().storage_key_error = true;
    }

    /// Make every blob store operation fail
    pub fn fail_blob_operations(&self) {
        self.state().blob_error = true;
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// `(kind, name)` of every resource delete requested, in order
    pub fn deletes(&self) -> Vec<(ResourceKind, String)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Delete { kind, name, .. } => Some((*kind, name.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count_calls(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|call| matches(*call)).count()
    }

    pub fn contains(&self, kind: ResourceKind, group: &str, name: &str) -> bool {
        self.state()
            .contains(kind, &(group.to_string(), name.to_string()))
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.state().groups.contains(group)
    }

    pub fn has_container(&self, account: &str, container: &str) -> bool {
        self.state()
            .containers
            .contains(&(account.to_string(), container.to_string()))
    }

    /// Blob stores opened and not yet closed
    pub fn open_stores(&self) -> usize {
        let state = self.state();
        state.open_stores.saturating_sub(state.closed_stores)
    }

    pub fn closed_stores(&self) -> usize {
        self.state().closed_stores
    }

    fn record(&self, call: Call) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

fn resource_id(kind: ResourceKind, group: &str, name: &str) -> String {
    format!(
        "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/{group}/providers/{}/{name}",
        kind.provider_path()
    )
}

impl ArmOperations for FakeCloud {
    async fn get_virtual_machine(&self, group: &str, name: &str) -> Result<Option<VirtualMachine>> {
        let state = self.record(Call::GetVirtualMachine {
            group: group.to_string(),
            name: name.to_string(),
        });
        Ok(state.vms.get(&(group.to_string(), name.to_string())).cloned())
    }

    async fn get_network_interface(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterfaceCard>> {
        let state = self.record(Call::GetNetworkInterface {
            group: group.to_string(),
            name: name.to_string(),
        });
        Ok(state.nics.get(&(group.to_string(), name.to_string())).cloned())
    }

    async fn get_storage_keys(
        &self,
        group: &str,
        account: &str,
    ) -> Result<Option<StorageServiceKeys>> {
        let state = self.record(Call::GetStorageKeys {
            group: group.to_string(),
            account: account.to_string(),
        });
        if state.storage_key_error {
            return Err(ArmError::Unauthorized {
                code: Some("AuthorizationFailed".to_string()),
                message: format!("listKeys denied on {account}"),
            }
            .into());
        }
        Ok(state
            .storage_keys
            .get(&(group.to_string(), account.to_string()))
            .cloned())
    }

    async fn list(&self, kind: ResourceKind, group: &str) -> Result<Vec<String>> {
        let state = self.record(Call::List {
            kind,
            group: group.to_string(),
        });
        Ok(state
            .resources
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|(g, _)| g == group)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn delete(&self, kind: ResourceKind, group: &str, name: &str) -> Result<DeletionOutcome> {
        let mut state = self.record(Call::Delete {
            kind,
            group: group.to_string(),
            name: name.to_string(),
        });
        let key = (group.to_string(), name.to_string());
        if !state.contains(kind, &key) {
            return Ok(DeletionOutcome::AlreadyAbsent);
        }
        let behavior = state
            .delete_overrides
            .get(&(kind, name.to_string()))
            .copied()
            .unwrap_or(state.default_delete);
        Ok(state.start(Target::Resource(kind, key), behavior))
    }

    async fn delete_resource_group(&self, group: &str) -> Result<DeletionOutcome> {
        let mut state = self.record(Call::DeleteResourceGroup {
            group: group.to_string(),
        });
        if !state.groups.contains(group) {
            return Ok(DeletionOutcome::AlreadyAbsent);
        }
        let behavior = state.group_delete;
        Ok(state.start(Target::Group(group.to_string()), behavior))
    }

    async fn operation_status(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let mut state = self.record(Call::OperationStatus {
            handle: handle.uri().to_string(),
        });

        let Some(op) = state.pending.get_mut(handle.uri()) else {
            return Err(ArmError::NotFound {
                resource_type: "operation",
                resource_id: handle.uri().to_string(),
            }
            .into());
        };

        match op.polls_left {
            None => return Ok(OperationStatus::InProgress),
            Some(0) => {}
            Some(n) => {
                op.polls_left = Some(n - 1);
                return Ok(OperationStatus::InProgress);
            }
        }

        let result = op.result;
        let target = op.target.clone();
        if result == OperationStatus::Succeeded {
            state.remove(&target);
        }
        Ok(result)
    }
}

/// Blob store for one account of a [`FakeCloud`]
#[derive(Debug)]
pub struct FakeBlobStore {
    cloud: FakeCloud,
    account: String,
    closed: AtomicBool,
}

impl FakeBlobStore {
    fn blob_error(&self, operation: &str) -> anyhow::Error {
        anyhow::anyhow!("blob service unavailable: {operation} on {}", self.account)
    }
}

impl BlobStoreFactory for FakeCloud {
    type Store = FakeBlobStore;

    async fn open(&self, account: &str, _key: &str) -> Result<FakeBlobStore> {
        let mut state = self.record(Call::OpenBlobStore {
            account: account.to_string(),
        });
        state.open_stores += 1;
        Ok(FakeBlobStore {
            cloud: self.clone(),
            account: account.to_string(),
            closed: AtomicBool::new(false),
        })
    }
}

impl BlobStore for FakeBlobStore {
    async fn delete_container_if_exists(&self, container: &str) -> Result<bool> {
        let mut state = self.cloud.record(Call::DeleteContainer {
            account: self.account.clone(),
            container: container.to_string(),
        });
        if state.blob_error {
            return Err(self.blob_error("delete container"));
        }
        Ok(state
            .containers
            .remove(&(self.account.clone(), container.to_string())))
    }

    async fn custom_image_exists(&self) -> Result<bool> {
        let state = self.cloud.record(Call::CustomImageExists {
            account: self.account.clone(),
        });
        if state.blob_error {
            return Err(self.blob_error("list custom images"));
        }
        Ok(state.custom_images.contains(&self.account))
    }

    fn close(&self) {
        let mut state = self.cloud.record(Call::CloseBlobStore {
            account: self.account.clone(),
        });
        // Closing twice is allowed; only the first close counts
        if !self.closed.swap(true, Ordering::SeqCst) {
            state.closed_stores += 1;
        }
    }
}
