//! ARM operations trait for testing

use super::types::{
    DeletionOutcome, NetworkInterfaceCard, OperationHandle, OperationStatus, StorageServiceKeys,
    VirtualMachine,
};
use anyhow::Result;
use armsweep_common::ResourceKind;

/// Trait for the ARM control-plane calls a teardown needs.
///
/// This trait abstracts the REST client to enable testing of the teardown
/// sequence without hitting real Azure. Getters return `Ok(None)` when the
/// resource does not exist.
#[allow(async_fn_in_trait)] // Used through generics only; no Send bound needed on the futures
#[cfg_attr(test, mockall::automock)]
pub trait ArmOperations: Send + Sync {
    /// Fetch a virtual machine
    async fn get_virtual_machine(&self, group: &str, name: &str)
    -> Result<Option<VirtualMachine>>;

    /// Fetch a network interface card
    async fn get_network_interface(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterfaceCard>>;

    /// Fetch the access keys of a storage account
    async fn get_storage_keys(
        &self,
        group: &str,
        account: &str,
    ) -> Result<Option<StorageServiceKeys>>;

    /// List the names of all resources of a kind in a resource group
    async fn list(&self, kind: ResourceKind, group: &str) -> Result<Vec<String>>;

    /// Request deletion of a resource
    async fn delete(&self, kind: ResourceKind, group: &str, name: &str)
    -> Result<DeletionOutcome>;

    /// Request deletion of a whole resource group
    async fn delete_resource_group(&self, group: &str) -> Result<DeletionOutcome>;

    /// Poll an asynchronous operation
    async fn operation_status(&self, handle: &OperationHandle) -> Result<OperationStatus>;
}
