//! Blob service client for VM disk cleanup

use super::shared_key::{CanonicalRequest, STORAGE_API_VERSION, SharedKeyCredential, ms_date};
use super::{BlobStore, BlobStoreFactory};
use crate::arm::context::{ArmContext, FromArmContext};
use crate::arm::error::is_transient_transport_error;
use crate::retry::{RetryDecision, RetryPolicy};
use anyhow::{Context, Result};
use armsweep_common::defaults::{
    CUSTOM_IMAGE_PREFIX, DEFAULT_BLOB_ENDPOINT_SUFFIX, IMAGE_CONTAINER,
};
use chrono::Utc;
use reqwest::{Method, Response, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

/// Blob service error response
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob service returned {status} ({code}) for {method} {path}")]
    Status {
        method: Method,
        path: String,
        status: u16,
        /// `x-ms-error-code` header, e.g. `ContainerBeingDeleted`
        code: String,
    },

    #[error("blob store for account {0} is closed")]
    Closed(String),
}

impl BlobError {
    fn is_retryable(&self) -> bool {
        match self {
            BlobError::Status { status, .. } => *status == 429 || *status >= 500,
            BlobError::Closed(_) => false,
        }
    }
}

/// Opens [`BlobClient`]s sharing the management context's HTTP client
#[derive(Debug, Clone)]
pub struct BlobClientFactory {
    http: reqwest::Client,
    retry: RetryPolicy,
    endpoint_suffix: String,
}

impl FromArmContext for BlobClientFactory {
    fn from_context(ctx: &ArmContext) -> Self {
        Self {
            http: ctx.http().clone(),
            retry: *ctx.retry(),
            endpoint_suffix: DEFAULT_BLOB_ENDPOINT_SUFFIX.to_string(),
        }
    }
}

impl BlobClientFactory {
    /// Point clients at a different blob DNS suffix (sovereign clouds)
    pub fn with_endpoint_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.endpoint_suffix = suffix.into();
        self
    }
}

impl BlobStoreFactory for BlobClientFactory {
    type Store = BlobClient;

    async fn open(&self, account: &str, key: &str) -> Result<BlobClient> {
        let credential = SharedKeyCredential::new(account, key)
            .with_context(|| format!("Invalid key for storage account {account}"))?;
        debug!(account = %account, "Opened blob store");
        Ok(BlobClient {
            http: self.http.clone(),
            retry: self.retry,
            base_url: format!("https://{account}.{}", self.endpoint_suffix),
            credential,
            closed: AtomicBool::new(false),
        })
    }
}

/// SharedKey-authorised client for one storage account
#[derive(Debug)]
pub struct BlobClient {
    http: reqwest::Client,
    retry: RetryPolicy,
    base_url: String,
    credential: SharedKeyCredential,
    closed: AtomicBool,
}

impl BlobClient {
    async fn send_once(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BlobError::Closed(self.credential.account().to_string()).into());
        }

        let date = ms_date(Utc::now());
        let authorization = self.credential.authorization(&CanonicalRequest {
            method: method.as_str(),
            path,
            query: query.to_vec(),
            ms_headers: vec![("x-ms-date", date.as_str()), ("x-ms-version", STORAGE_API_VERSION)],
            content_length: 0,
        })?;

        let response = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .query(query)
            .header("x-ms-date", &date)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("Authorization", authorization)
            .send()
            .await
            .with_context(|| format!("{method} {path} on {} failed", self.base_url))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown")
            .to_string();
        Err(BlobError::Status {
            method,
            path: path.to_string(),
            status: status.as_u16(),
            code,
        }
        .into())
    }

    /// Send a request; 404 is returned to the caller rather than as an error
    async fn send(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        self.retry
            .run(
                path,
                || self.send_once(method.clone(), path, query),
                retry_decision,
            )
            .await
    }
}

/// Retry throttling, server errors and transport failures
fn retry_decision(error: &anyhow::Error) -> RetryDecision {
    let retryable = match error.downcast_ref::<BlobError>() {
        Some(err) => err.is_retryable(),
        None => is_transient_transport_error(error),
    };
    if retryable {
        RetryDecision::Retry
    } else {
        RetryDecision::Stop
    }
}

impl BlobStore for BlobClient {
    async fn delete_container_if_exists(&self, container: &str) -> Result<bool> {
        let path = format!("/{container}");
        let response = self
            .send(Method::DELETE, &path, &[("restype", "container")])
            .await?;
        let deleted = response.status() != StatusCode::NOT_FOUND;
        debug!(
            account = %self.credential.account(),
            container = %container,
            deleted,
            "Container delete requested"
        );
        Ok(deleted)
    }

    async fn custom_image_exists(&self) -> Result<bool> {
        let path = format!("/{IMAGE_CONTAINER}");
        let response = self
            .send(
                Method::GET,
                &path,
                &[
                    ("restype", "container"),
                    ("comp", "list"),
                    ("prefix", CUSTOM_IMAGE_PREFIX),
                    ("maxresults", "1"),
                ],
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body = response
            .text()
            .await
            .context("Failed to read blob listing")?;
        Ok(listing_has_blobs(&body))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(account = %self.credential.account(), "Closed blob store");
        }
    }
}

/// Whether a `List Blobs` response body contains at least one blob
fn listing_has_blobs(body: &str) -> bool {
    body.contains("<Blob>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArmConfig;

    fn factory() -> BlobClientFactory {
        let ctx = ArmContext::new(&ArmConfig {
            subscription_id: "sub".to_string(),
            access_token: "token".to_string(),
            ..Default::default()
        })
        .unwrap();
        BlobClientFactory::from_context(&ctx)
    }

    #[test]
    fn test_listing_has_blobs() {
        let empty = r#"<?xml version="1.0" encoding="utf-8"?>
            <EnumerationResults ContainerName="https://acct1.blob.core.windows.net/system">
              <Prefix>Microsoft.Compute/Images/custom</Prefix><MaxResults>1</MaxResults>
              <Blobs /><NextMarker />
            </EnumerationResults>"#;
        assert!(!listing_has_blobs(empty));

        let one = r#"<EnumerationResults><Blobs><Blob><Name>Microsoft.Compute/Images/custom/img-osDisk.vhd</Name></Blob></Blobs></EnumerationResults>"#;
        assert!(listing_has_blobs(one));
    }

    #[tokio::test]
    async fn test_open_builds_account_url() {
        let client = factory().open("acct1", "c2VjcmV0").await.unwrap();
        assert_eq!(client.base_url, "https://acct1.blob.core.windows.net");

        let client = factory()
            .with_endpoint_suffix("blob.core.chinacloudapi.cn")
            .open("acct1", "c2VjcmV0")
            .await
            .unwrap();
        assert_eq!(client.base_url, "https://acct1.blob.core.chinacloudapi.cn");
    }

    #[tokio::test]
    async fn test_open_rejects_bad_key() {
        assert!(factory().open("acct1", "%%%").await.is_err());
    }

    #[tokio::test]
    async fn test_closed_store_refuses_requests() {
        let client = factory().open("acct1", "c2VjcmV0").await.unwrap();
        client.close();
        client.close();
        let err = client.delete_container_if_exists("vhds").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BlobError>(),
            Some(BlobError::Closed(account)) if account == "acct1"
        ));
    }

    #[test]
    fn test_retryable_statuses() {
        let status = |status| BlobError::Status {
            method: Method::GET,
            path: "/system".to_string(),
            status,
            code: "ServerBusy".to_string(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!BlobError::Closed("a".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn test_connection_failures_are_retried() {
        // Nothing listens on the discard port of the loopback interface
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        let err = anyhow::Error::new(err).context("DELETE /vhds failed");
        assert_eq!(retry_decision(&err), RetryDecision::Retry);

        let err = anyhow::Error::new(BlobError::Status {
            method: Method::DELETE,
            path: "/vhds".to_string(),
            status: 403,
            code: "AuthenticationFailed".to_string(),
        });
        assert_eq!(retry_decision(&err), RetryDecision::Stop);
        assert_eq!(
            retry_decision(&anyhow::anyhow!("malformed listing")),
            RetryDecision::Stop
        );
    }
}
