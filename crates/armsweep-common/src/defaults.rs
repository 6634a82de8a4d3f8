//! Default configuration values shared between the library and the CLI
//!
//! These constants keep the CLI defaults and the `Default` impls in sync.

/// Default ARM management endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Default prefix for resource group names (`{prefix}-{region}`)
pub const DEFAULT_GROUP_PREFIX: &str = "armsweep";

/// Container holding virtual machine disks in a storage account
pub const VHD_CONTAINER: &str = "vhds";

/// Container where ARM stores captured images
pub const IMAGE_CONTAINER: &str = "system";

/// Blob prefix of user-captured images inside [`IMAGE_CONTAINER`]
pub const CUSTOM_IMAGE_PREFIX: &str = "Microsoft.Compute/Images/custom";

/// Default timeout in seconds when waiting for a deletion to complete
pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 600;

/// Default maximum number of attempts for throttled ARM requests
pub const DEFAULT_MAX_REQUEST_ATTEMPTS: u32 = 5;

/// Default number of attempts when acquiring a machine lock
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 5;

/// Default delay between machine lock attempts in milliseconds
pub const DEFAULT_LOCK_RETRY_DELAY_MS: u64 = 1000;

/// DNS suffix of the blob service (`{account}.{suffix}`)
pub const DEFAULT_BLOB_ENDPOINT_SUFFIX: &str = "blob.core.windows.net";
