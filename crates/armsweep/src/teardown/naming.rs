//! Deterministic names derived from a region or a VM's storage profile

use crate::arm::StorageProfile;

/// Resource group holding everything created in `region`
pub fn resource_group_name(prefix: &str, region: &str) -> String {
    format!("{prefix}-{region}")
}

/// Storage account backing the OS disk, taken from the first DNS label of
/// the VHD URI (`https://{account}.blob.core.windows.net/vhds/...`).
///
/// Returns `None` for managed disks, which carry no VHD URI.
pub fn storage_account_name(profile: &StorageProfile) -> Option<String> {
    let uri = profile.os_disk.as_ref()?.vhd.as_ref()?.uri.as_str();
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let host = rest.split(['/', ':']).next()?;
    let account = host.split('.').next()?;
    (!account.is_empty()).then(|| account.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::types::{OsDisk, VirtualHardDisk};

    fn profile(uri: Option<&str>) -> StorageProfile {
        StorageProfile {
            os_disk: Some(OsDisk {
                name: Some("osdisk".to_string()),
                vhd: uri.map(|uri| VirtualHardDisk {
                    uri: uri.to_string(),
                }),
            }),
        }
    }

    #[test]
    fn test_resource_group_name() {
        assert_eq!(resource_group_name("armsweep", "eastus"), "armsweep-eastus");
        assert_eq!(resource_group_name("jclouds", "westeurope"), "jclouds-westeurope");
    }

    #[test]
    fn test_storage_account_from_vhd_uri() {
        let profile = profile(Some("https://acct1.blob.core.windows.net/vhds/vm1osdisk.vhd"));
        assert_eq!(storage_account_name(&profile).as_deref(), Some("acct1"));
    }

    #[test]
    fn test_storage_account_with_port() {
        let profile = profile(Some("http://devacct:10000/vhds/disk.vhd"));
        assert_eq!(storage_account_name(&profile).as_deref(), Some("devacct"));
    }

    #[test]
    fn test_managed_disk_has_no_account() {
        assert_eq!(storage_account_name(&profile(None)), None);
        assert_eq!(storage_account_name(&StorageProfile::default()), None);
    }

    #[test]
    fn test_empty_host() {
        assert_eq!(storage_account_name(&profile(Some("https:///vhds/x"))), None);
    }
}
