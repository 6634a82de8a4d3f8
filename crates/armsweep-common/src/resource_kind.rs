//! ARM resource kinds
//!
//! REST naming for every resource kind a teardown touches, and the kinds that
//! keep a resource group alive.

use std::fmt;

/// Kinds of ARM resources owned by a virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// Virtual machine (must be gone before its NICs can be deleted)
    VirtualMachine,
    /// Network interface card (detached once the VM is deleted)
    NetworkInterface,
    /// Public IP address (released once its NIC is deleted)
    PublicIpAddress,
    /// Storage account holding the VM disks
    StorageAccount,
}

impl ResourceKind {
    /// Kinds whose presence keeps a resource group alive
    pub const TRACKED: [ResourceKind; 4] = [
        ResourceKind::VirtualMachine,
        ResourceKind::StorageAccount,
        ResourceKind::NetworkInterface,
        ResourceKind::PublicIpAddress,
    ];

    /// ARM provider path segment (`{namespace}/{type}`)
    pub fn provider_path(self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "Microsoft.Compute/virtualMachines",
            ResourceKind::NetworkInterface => "Microsoft.Network/networkInterfaces",
            ResourceKind::PublicIpAddress => "Microsoft.Network/publicIPAddresses",
            ResourceKind::StorageAccount => "Microsoft.Storage/storageAccounts",
        }
    }

    /// ARM api-version used for requests against this kind
    pub fn api_version(self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "2016-03-30",
            ResourceKind::NetworkInterface | ResourceKind::PublicIpAddress => "2016-03-30",
            ResourceKind::StorageAccount => "2015-06-15",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "virtual_machine",
            ResourceKind::NetworkInterface => "network_interface",
            ResourceKind::PublicIpAddress => "public_ip_address",
            ResourceKind::StorageAccount => "storage_account",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
