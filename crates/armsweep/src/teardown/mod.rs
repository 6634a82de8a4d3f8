//! Ordered teardown of a virtual machine and the resources it owns
//!
//! The sequence is fixed: the VM goes first, then each of its NICs (with the
//! public IPs they carried), then the VHD container and storage account, and
//! finally the resource group when nothing tracked is left in it. The first
//! failure stops the sequence; a resource that is already gone counts as
//! deleted.

pub mod error;
pub mod naming;

pub use error::TeardownError;
pub use naming::{resource_group_name, storage_account_name};

use crate::arm::error::{ignore_not_found, is_not_found};
use crate::arm::{ArmOperations, DeletionOutcome, OperationStatus, VirtualMachine};
use crate::config::TeardownConfig;
use crate::storage::{BlobStore, BlobStoreFactory};
use crate::wait::wait_for_resource;
use armsweep_common::{RegionAndId, ResourceKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tears down VMs against an ARM control plane and blob service
pub struct ResourceTeardown<A, B> {
    arm: A,
    blobs: B,
    config: TeardownConfig,
    cancel: Option<CancellationToken>,
}

impl<A: ArmOperations, B: BlobStoreFactory> ResourceTeardown<A, B> {
    pub fn new(arm: A, blobs: B, config: TeardownConfig) -> Self {
        Self {
            arm,
            blobs,
            config,
            cancel: None,
        }
    }

    /// Abort any in-progress wait when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Resource group holding the resources of `region`
    pub fn resource_group(&self, region: &str) -> String {
        resource_group_name(&self.config.group_prefix, region)
    }

    /// Tear down the VM identified by a slash-encoded `region/id`.
    ///
    /// Returns `true` when the VM did not exist or was deleted, `false` when
    /// ARM reported its deletion as failed. Dependent resources are still
    /// cleaned up in the `false` case.
    pub async fn teardown(&self, id: &str) -> Result<bool, TeardownError> {
        let id = RegionAndId::from_slash_encoded(id)?;
        self.teardown_id(&id).await
    }

    pub async fn teardown_id(&self, id: &RegionAndId) -> Result<bool, TeardownError> {
        let group = self.resource_group(id.region());

        let vm = self
            .arm
            .get_virtual_machine(&group, id.id())
            .await
            .map_err(|e| TeardownError::api(format!("fetching virtual machine {}", id.id()), e))?;
        let Some(vm) = vm else {
            debug!(resource = %id, group = %group, "Virtual machine not found, nothing to destroy");
            return Ok(true);
        };

        info!(resource = %id, group = %group, "Destroying virtual machine");
        let vm_deleted = self
            .delete_and_wait(ResourceKind::VirtualMachine, &group, &vm.name)
            .await?;
        if !vm_deleted {
            warn!(resource = %id, "Virtual machine deletion reported failure");
        }

        // The virtual network is shared by the whole group; it goes with the group
        self.delete_network_interfaces(&group, &vm).await?;
        self.delete_storage(&group, &vm).await?;
        self.delete_resource_group_if_empty(&group).await?;

        info!(resource = %id, deleted = vm_deleted, "Teardown complete");
        Ok(vm_deleted)
    }

    /// Delete `group` when it holds no VMs, storage accounts, NICs or public
    /// IPs. Returns whether the group was deleted.
    ///
    /// The check and the delete are separate calls; a resource created in
    /// between is deleted along with the group.
    pub async fn delete_resource_group_if_empty(&self, group: &str) -> Result<bool, TeardownError> {
        for kind in ResourceKind::TRACKED {
            let names = self
                .arm
                .list(kind, group)
                .await
                .map_err(|e| TeardownError::api(format!("listing {kind} in {group}"), e))?;
            if !names.is_empty() {
                debug!(group = %group, kind = %kind, count = names.len(), "Resource group not empty");
                return Ok(false);
            }
        }

        info!(group = %group, "Resource group is empty, deleting");
        let outcome = ignore_not_found(self.arm.delete_resource_group(group).await)
            .map_err(|e| TeardownError::api(format!("deleting resource group {group}"), e))?
            .unwrap_or(DeletionOutcome::AlreadyAbsent);

        let resource = format!("resource group {group}");
        if !self.await_outcome(&resource, outcome).await? {
            return Err(TeardownError::DeletionFailed { resource });
        }
        Ok(true)
    }

    async fn delete_network_interfaces(
        &self,
        group: &str,
        vm: &VirtualMachine,
    ) -> Result<(), TeardownError> {
        for nic_ref in &vm.properties.network_profile.network_interfaces {
            let nic_name = nic_ref.name();
            let nic = self
                .arm
                .get_network_interface(group, nic_name)
                .await
                .map_err(|e| TeardownError::api(format!("fetching network interface {nic_name}"), e))?;
            let Some(nic) = nic else {
                debug!(nic = %nic_name, "Network interface already gone");
                continue;
            };

            // Read before the NIC disappears
            let public_ips = nic.public_ip_names();

            debug!(nic = %nic_name, "Deleting network interface");
            if !self
                .delete_and_wait(ResourceKind::NetworkInterface, group, nic_name)
                .await?
            {
                return Err(TeardownError::DeletionFailed {
                    resource: format!("{} {nic_name}", ResourceKind::NetworkInterface),
                });
            }

            for ip in &public_ips {
                let outcome = self
                    .request_delete(ResourceKind::PublicIpAddress, group, ip)
                    .await?;
                debug!(public_ip = %ip, nic = %nic_name, outcome = ?outcome, "Deleted public IP");
            }
        }
        Ok(())
    }

    async fn delete_storage(&self, group: &str, vm: &VirtualMachine) -> Result<(), TeardownError> {
        let Some(account) = storage_account_name(&vm.properties.storage_profile) else {
            debug!(vm = %vm.name, "No VHD URI on the OS disk, skipping storage cleanup");
            return Ok(());
        };

        let keys = match self.arm.get_storage_keys(group, &account).await {
            Ok(Some(keys)) => keys,
            Ok(None) => {
                debug!(account = %account, "Storage account not found, skipping storage cleanup");
                return Ok(());
            }
            Err(e) if is_not_found(&e) => {
                debug!(account = %account, "Storage account not found, skipping storage cleanup");
                return Ok(());
            }
            Err(source) => {
                return Err(TeardownError::Storage {
                    account,
                    action: "listing keys",
                    source,
                });
            }
        };

        let store = self
            .blobs
            .open(&account, &keys.key1)
            .await
            .map_err(|source| TeardownError::Storage {
                account: account.clone(),
                action: "opening blob store",
                source,
            })?;

        let result = self.clean_storage_account(group, &account, &store).await;
        store.close();
        result
    }

    async fn clean_storage_account(
        &self,
        group: &str,
        account: &str,
        store: &B::Store,
    ) -> Result<(), TeardownError> {
        let storage_err = |action, source| TeardownError::Storage {
            account: account.to_string(),
            action,
            source,
        };

        debug!(account = %account, container = %self.config.vhd_container, "Deleting virtual machine disk storage");
        store
            .delete_container_if_exists(&self.config.vhd_container)
            .await
            .map_err(|e| storage_err("deleting disk container", e))?;

        let has_images = store
            .custom_image_exists()
            .await
            .map_err(|e| storage_err("checking for custom images", e))?;
        if has_images {
            info!(account = %account, "Storage account contains custom images, keeping it");
            return Ok(());
        }

        let outcome = self
            .request_delete(ResourceKind::StorageAccount, group, account)
            .await?;
        debug!(account = %account, outcome = ?outcome, "Deleted storage account");
        Ok(())
    }

    /// Issue a delete; a resource that is already gone is not an error
    async fn request_delete(
        &self,
        kind: ResourceKind,
        group: &str,
        name: &str,
    ) -> Result<DeletionOutcome, TeardownError> {
        let outcome = ignore_not_found(self.arm.delete(kind, group, name).await)
            .map_err(|e| TeardownError::api(format!("deleting {kind} {name}"), e))?;
        Ok(outcome.unwrap_or(DeletionOutcome::AlreadyAbsent))
    }

    async fn delete_and_wait(
        &self,
        kind: ResourceKind,
        group: &str,
        name: &str,
    ) -> Result<bool, TeardownError> {
        let outcome = self.request_delete(kind, group, name).await?;
        self.await_outcome(&format!("{kind} {name}"), outcome).await
    }

    /// Wait for a delete to settle; `false` when ARM reports it failed
    async fn await_outcome(
        &self,
        resource: &str,
        outcome: DeletionOutcome,
    ) -> Result<bool, TeardownError> {
        let handle = match outcome {
            DeletionOutcome::AlreadyAbsent | DeletionOutcome::Deleted => return Ok(true),
            DeletionOutcome::Pending(handle) => handle,
        };

        let arm = &self.arm;
        let handle = &handle;
        let status = wait_for_resource(
            &self.config.wait,
            self.cancel.as_ref(),
            move || async move {
                let status = arm.operation_status(handle).await?;
                Ok(status.is_terminal().then_some(status))
            },
            resource,
        )
        .await?;

        Ok(status == OperationStatus::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::error::ArmError;
    use crate::arm::types::{
        IdReference, IpConfiguration, IpConfigurationProperties, NetworkInterfaceCardProperties,
        NetworkProfile, OsDisk, StorageProfile, VirtualHardDisk, VirtualMachineProperties,
    };
    use crate::arm::{MockArmOperations, NetworkInterfaceCard, OperationHandle, StorageServiceKeys};
    use crate::storage::{MockBlobStore, MockBlobStoreFactory};
    use crate::wait::WaitConfig;
    use std::time::Duration;

    const GROUP: &str = "armsweep-eastus";

    fn vm(nics: &[&str], vhd: Option<&str>) -> VirtualMachine {
        VirtualMachine {
            id: format!("/subscriptions/s/resourceGroups/{GROUP}/providers/Microsoft.Compute/virtualMachines/vm1"),
            name: "vm1".to_string(),
            location: "eastus".to_string(),
            properties: VirtualMachineProperties {
                storage_profile: StorageProfile {
                    os_disk: Some(OsDisk {
                        name: Some("osdisk".to_string()),
                        vhd: vhd.map(|uri| VirtualHardDisk {
                            uri: uri.to_string(),
                        }),
                    }),
                },
                network_profile: NetworkProfile {
                    network_interfaces: nics
                        .iter()
                        .map(|n| IdReference::new(format!("/x/networkInterfaces/{n}")))
                        .collect(),
                },
                provisioning_state: Some("Succeeded".to_string()),
            },
        }
    }

    fn nic(name: &str, ips: &[&str]) -> NetworkInterfaceCard {
        NetworkInterfaceCard {
            id: format!("/x/networkInterfaces/{name}"),
            name: name.to_string(),
            properties: NetworkInterfaceCardProperties {
                ip_configurations: ips
                    .iter()
                    .map(|ip| IpConfiguration {
                        name: "ipconfig1".to_string(),
                        properties: IpConfigurationProperties {
                            public_ip_address: Some(IdReference::new(format!(
                                "/x/publicIPAddresses/{ip}"
                            ))),
                        },
                    })
                    .collect(),
            },
        }
    }

    fn config() -> TeardownConfig {
        TeardownConfig {
            wait: WaitConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                timeout: Duration::from_secs(5),
            },
            ..Default::default()
        }
    }

    fn teardown(
        arm: MockArmOperations,
        blobs: MockBlobStoreFactory,
    ) -> ResourceTeardown<MockArmOperations, MockBlobStoreFactory> {
        ResourceTeardown::new(arm, blobs, config())
    }

    fn expect_empty_group(arm: &mut MockArmOperations) {
        arm.expect_list().returning(|_, _| Ok(Vec::new()));
        arm.expect_delete_resource_group()
            .times(1)
            .returning(|_| Ok(DeletionOutcome::Deleted));
    }

    #[tokio::test]
    async fn test_invalid_id_makes_no_calls() {
        let result = teardown(MockArmOperations::new(), MockBlobStoreFactory::new())
            .teardown("eastus")
            .await;
        assert!(matches!(result, Err(TeardownError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_absent_vm_returns_true() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine()
            .withf(|group, name| group == GROUP && name == "vm1")
            .times(1)
            .returning(|_, _| Ok(None));
        arm.expect_delete().times(0);
        arm.expect_delete_resource_group().times(0);

        let result = teardown(arm, MockBlobStoreFactory::new())
            .teardown("eastus/vm1")
            .await
            .unwrap();
        assert!(result);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_vm_delete_returns_false_and_continues() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine()
            .returning(|_, _| Ok(Some(vm(&[], None))));
        arm.expect_delete()
            .withf(|kind, _, name| *kind == ResourceKind::VirtualMachine && name == "vm1")
            .times(1)
            .returning(|_, _, _| Ok(DeletionOutcome::Pending(OperationHandle("op-vm".to_string()))));
        let mut polls = 0;
        arm.expect_operation_status().returning(move |_| {
            polls += 1;
            Ok(if polls < 3 {
                OperationStatus::InProgress
            } else {
                OperationStatus::Failed
            })
        });
        expect_empty_group(&mut arm);

        let result = teardown(arm, MockBlobStoreFactory::new())
            .teardown("eastus/vm1")
            .await
            .unwrap();
        assert!(!result);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vm_wait_timeout_is_an_error() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine()
            .returning(|_, _| Ok(Some(vm(&["nic1"], None))));
        arm.expect_delete()
            .times(1)
            .returning(|_, _, _| Ok(DeletionOutcome::Pending(OperationHandle("op".to_string()))));
        arm.expect_operation_status()
            .returning(|_| Ok(OperationStatus::InProgress));
        arm.expect_get_network_interface().times(0);
        arm.expect_list().times(0);

        let result = teardown(arm, MockBlobStoreFactory::new())
            .teardown("eastus/vm1")
            .await;
        assert!(matches!(result, Err(TeardownError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine()
            .returning(|_, _| Ok(Some(vm(&[], None))));
        arm.expect_delete()
            .returning(|_, _, _| Ok(DeletionOutcome::Pending(OperationHandle("op".to_string()))));
        arm.expect_operation_status().times(0);

        let token = CancellationToken::new();
        token.cancel();
        let result = teardown(arm, MockBlobStoreFactory::new())
            .with_cancellation(token)
            .teardown("eastus/vm1")
            .await;
        assert!(matches!(result, Err(TeardownError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_nic_delete_stops_sequence() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine()
            .returning(|_, _| Ok(Some(vm(&["nic1"], None))));
        arm.expect_get_network_interface()
            .returning(|_, name| Ok(Some(nic(name, &["ip1"]))));
        arm.expect_delete()
            .withf(|kind, _, _| *kind == ResourceKind::VirtualMachine)
            .returning(|_, _, _| Ok(DeletionOutcome::Deleted));
        arm.expect_delete()
            .withf(|kind, _, _| *kind == ResourceKind::NetworkInterface)
            .returning(|_, _, _| Ok(DeletionOutcome::Pending(OperationHandle("op-nic".to_string()))));
        arm.expect_operation_status()
            .returning(|_| Ok(OperationStatus::Failed));
        arm.expect_list().times(0);

        let result = teardown(arm, MockBlobStoreFactory::new())
            .teardown("eastus/vm1")
            .await;
        assert!(matches!(
            result,
            Err(TeardownError::DeletionFailed { ref resource }) if resource.contains("nic1")
        ));
    }

    #[tokio::test]
    async fn test_not_found_on_delete_counts_as_deleted() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine()
            .returning(|_, _| Ok(Some(vm(&[], None))));
        arm.expect_delete().returning(|_, _, name| {
            Err(anyhow::Error::new(ArmError::NotFound {
                resource_type: "virtual machine",
                resource_id: name.to_string(),
            }))
        });
        expect_empty_group(&mut arm);

        let result = teardown(arm, MockBlobStoreFactory::new())
            .teardown("eastus/vm1")
            .await
            .unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn test_missing_storage_account_skips_storage_step() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine().returning(|_, _| {
            Ok(Some(vm(&[], Some("https://acct1.blob.core.windows.net/vhds/vm1.vhd"))))
        });
        arm.expect_delete()
            .times(1)
            .returning(|_, _, _| Ok(DeletionOutcome::Deleted));
        arm.expect_get_storage_keys()
            .withf(|_, account| account == "acct1")
            .returning(|_, _| Ok(None));
        expect_empty_group(&mut arm);

        let mut blobs = MockBlobStoreFactory::new();
        blobs.expect_open().times(0);

        assert!(teardown(arm, blobs).teardown("eastus/vm1").await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_key_error_is_fatal() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine().returning(|_, _| {
            Ok(Some(vm(&[], Some("https://acct1.blob.core.windows.net/vhds/vm1.vhd"))))
        });
        arm.expect_delete()
            .returning(|_, _, _| Ok(DeletionOutcome::Deleted));
        arm.expect_get_storage_keys().returning(|_, _| {
            Err(anyhow::Error::new(ArmError::Unauthorized {
                code: Some("AuthorizationFailed".to_string()),
                message: "no".to_string(),
            }))
        });
        arm.expect_list().times(0);

        let result = teardown(arm, MockBlobStoreFactory::new())
            .teardown("eastus/vm1")
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, TeardownError::Storage { ref account, .. } if account == "acct1"));
        assert!(matches!(err.arm_error(), Some(ArmError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_storage_account_kept_with_custom_images() {
        let mut arm = MockArmOperations::new();
        arm.expect_get_virtual_machine().returning(|_, _| {
            Ok(Some(vm(&[], Some("https://acct1.blob.core.windows.net/vhds/vm1.vhd"))))
        });
        arm.expect_delete()
            .withf(|kind, _, _| *kind == ResourceKind::VirtualMachine)
            .times(1)
            .returning(|_, _, _| Ok(DeletionOutcome::Deleted));
        arm.expect_delete()
            .withf(|kind, _, _| *kind == ResourceKind::StorageAccount)
            .times(0);
        arm.expect_get_storage_keys().returning(|_, _| {
            Ok(Some(StorageServiceKeys {
                key1: "c2VjcmV0".to_string(),
                key2: "b3RoZXI=".to_string(),
            }))
        });
        arm.expect_list()
            .withf(|kind, _| *kind == ResourceKind::VirtualMachine)
            .returning(|_, _| Ok(Vec::new()));
        arm.expect_list()
            .withf(|kind, _| *kind == ResourceKind::StorageAccount)
            .times(1)
            .returning(|_, _| Ok(vec!["acct1".to_string()]));
        arm.expect_delete_resource_group().times(0);

        let mut store = MockBlobStore::new();
        store
            .expect_delete_container_if_exists()
            .withf(|container| container == "vhds")
            .times(1)
            .returning(|_| Ok(true));
        store.expect_custom_image_exists().returning(|| Ok(true));
        store.expect_close().times(1).return_const(());

        let mut blobs = MockBlobStoreFactory::new();
        blobs
            .expect_open()
            .withf(|account, key| account == "acct1" && key == "c2VjcmV0")
            .return_once(move |_, _| Ok(store));

        assert!(teardown(arm, blobs).teardown("eastus/vm1").await.unwrap());
    }

    #[tokio::test]
    async fn test_group_kept_when_any_kind_remains() {
        let mut arm = MockArmOperations::new();
        arm.expect_list().returning(|kind, _| {
            Ok(match kind {
                ResourceKind::PublicIpAddress => vec!["ip-other".to_string()],
                _ => Vec::new(),
            })
        });
        arm.expect_delete_resource_group().times(0);

        let deleted = teardown(arm, MockBlobStoreFactory::new())
            .delete_resource_group_if_empty(GROUP)
            .await
            .unwrap();
        assert!(!deleted);
    }

    #[tokio::test]
    async fn test_group_list_error_propagates() {
        let mut arm = MockArmOperations::new();
        arm.expect_list()
            .returning(|_, _| Err(anyhow::Error::new(ArmError::Throttled)));
        arm.expect_delete_resource_group().times(0);

        let err = teardown(arm, MockBlobStoreFactory::new())
            .delete_resource_group_if_empty(GROUP)
            .await
            .unwrap_err();
        assert!(matches!(err.arm_error(), Some(ArmError::Throttled)));
    }

    #[test]
    fn test_resource_group_uses_prefix() {
        let teardown = ResourceTeardown::new(
            MockArmOperations::new(),
            MockBlobStoreFactory::new(),
            TeardownConfig {
                group_prefix: "jclouds".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(teardown.resource_group("westus"), "jclouds-westus");
    }
}
