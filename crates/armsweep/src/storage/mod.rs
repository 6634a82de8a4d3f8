//! Storage account blob access
//!
//! A teardown only needs two things from the blob service: drop the
//! container holding VM disks, and find out whether the account still holds
//! captured images that must outlive the VM.

pub mod blob;
pub mod shared_key;

pub use blob::{BlobClient, BlobClientFactory, BlobError};
pub use shared_key::{SharedKeyCredential, SigningError};

use anyhow::Result;

/// Blob operations on one storage account.
///
/// Callers must invoke [`BlobStore::close`] once they are done, on success
/// and on failure.
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock)]
pub trait BlobStore: Send + Sync {
    /// Delete a container; `Ok(false)` when it did not exist
    async fn delete_container_if_exists(&self, container: &str) -> Result<bool>;

    /// Whether the account holds user-captured VM images
    async fn custom_image_exists(&self) -> Result<bool>;

    /// Release the store; further calls fail
    fn close(&self);
}

/// Opens a [`BlobStore`] for a storage account given one of its keys
#[allow(async_fn_in_trait)]
#[cfg_attr(test, mockall::automock(type Store = MockBlobStore;))]
pub trait BlobStoreFactory: Send + Sync {
    type Store: BlobStore;

    async fn open(&self, account: &str, key: &str) -> Result<Self::Store>;
}
