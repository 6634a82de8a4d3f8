//! ARM REST client
//!
//! Thin wrapper over the management endpoint. Throttled and transient
//! requests are retried here; everything above sees either a value or a
//! classified [`ArmError`] inside the `anyhow` chain.

use super::context::{ArmContext, FromArmContext};
use super::error::{
    ArmError, classify_anyhow_error, classify_response, ignore_not_found,
    is_transient_transport_error,
};
use super::operations::ArmOperations;
use super::types::{
    DeletionOutcome, NetworkInterfaceCard, OperationHandle, OperationStatus, ResourceList,
    StorageServiceKeys, VirtualMachine,
};
use crate::retry::RetryDecision;
use anyhow::{Context, Result};
use armsweep_common::ResourceKind;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// api-version for resource group operations
const RESOURCE_GROUP_API_VERSION: &str = "2015-01-01";

/// Headers carrying the URI of an asynchronous operation, in preference order
const OPERATION_HEADERS: &[&str] = &["azure-asyncoperation", "location"];

/// ARM client for the resources a teardown touches
#[derive(Debug, Clone)]
pub struct ArmClient {
    ctx: ArmContext,
}

impl FromArmContext for ArmClient {
    fn from_context(ctx: &ArmContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

impl ArmClient {
    /// `.../resourceGroups/{group}`
    fn group_path(&self, group: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}",
            self.ctx.endpoint(),
            self.ctx.subscription_id(),
            group
        )
    }

    /// `.../resourceGroups/{group}/providers/{provider}/{name}` without query
    fn resource_path(&self, kind: ResourceKind, group: &str, name: &str) -> String {
        format!(
            "{}/providers/{}/{}",
            self.group_path(group),
            kind.provider_path(),
            name
        )
    }

    fn resource_url(&self, kind: ResourceKind, group: &str, name: &str) -> String {
        format!(
            "{}?api-version={}",
            self.resource_path(kind, group, name),
            kind.api_version()
        )
    }

    fn collection_url(&self, kind: ResourceKind, group: &str) -> String {
        format!(
            "{}/providers/{}?api-version={}",
            self.group_path(group),
            kind.provider_path(),
            kind.api_version()
        )
    }

    fn group_url(&self, group: &str) -> String {
        format!(
            "{}?api-version={}",
            self.group_path(group),
            RESOURCE_GROUP_API_VERSION
        )
    }

    /// Send a request once; non-success statuses become classified errors
    async fn send_once(&self, method: Method, url: &str) -> Result<Response> {
        let mut request = self
            .ctx
            .http()
            .request(method.clone(), url)
            .bearer_auth(self.ctx.access_token());
        if method == Method::POST {
            // ARM rejects POST without Content-Length
            request = request.body(Vec::new());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url} failed"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_response(status.as_u16(), &body);
        Err(anyhow::Error::new(error).context(format!("{method} {url} returned {status}")))
    }

    /// Send a request, retrying throttled and transient failures
    async fn send(&self, method: Method, url: &str) -> Result<Response> {
        self.ctx
            .retry()
            .run(
                url,
                || self.send_once(method.clone(), url),
                |e: &anyhow::Error| {
                    if is_retryable(e) {
                        RetryDecision::Retry
                    } else {
                        RetryDecision::Stop
                    }
                },
            )
            .await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let Some(response) = ignore_not_found(self.send(Method::GET, url).await)? else {
            return Ok(None);
        };
        let value = response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode response from {url}"))?;
        Ok(Some(value))
    }

    async fn delete_url(&self, url: &str) -> Result<DeletionOutcome> {
        let Some(response) = ignore_not_found(self.send(Method::DELETE, url).await)? else {
            return Ok(DeletionOutcome::AlreadyAbsent);
        };

        let outcome = deletion_outcome(response.status(), response.headers());
        if outcome == DeletionOutcome::Deleted && response.status() == StatusCode::ACCEPTED {
            warn!(url = %url, "Deletion accepted without an operation URI");
        }
        debug!(url = %url, outcome = ?outcome, "Delete requested");
        Ok(outcome)
    }
}

/// Transport timeouts and connection failures are retried like throttling
fn is_retryable(error: &anyhow::Error) -> bool {
    match classify_anyhow_error(error) {
        Some(arm) => arm.is_retryable(),
        None => is_transient_transport_error(error),
    }
}

/// Extract the async operation URI from a 202 response
fn operation_handle(headers: &HeaderMap) -> Option<OperationHandle> {
    OPERATION_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find(|value| !value.is_empty())
        .map(|value| OperationHandle(value.to_string()))
}

/// Body of an `Azure-AsyncOperation` status response
#[derive(Debug, Deserialize)]
struct OperationBody {
    status: Option<String>,
}

/// Map a successful DELETE response to its outcome
fn deletion_outcome(status: StatusCode, headers: &HeaderMap) -> DeletionOutcome {
    match status {
        StatusCode::NO_CONTENT => DeletionOutcome::AlreadyAbsent,
        StatusCode::ACCEPTED => operation_handle(headers)
            .map(DeletionOutcome::Pending)
            .unwrap_or(DeletionOutcome::Deleted),
        _ => DeletionOutcome::Deleted,
    }
}

/// Map an operation status body to a status; a missing body means done.
///
/// Only `Succeeded`, `Failed` and `Canceled` are terminal.
fn status_from_body(body: &str) -> OperationStatus {
    let status = serde_json::from_str::<OperationBody>(body)
        .ok()
        .and_then(|b| b.status);
    match status.as_deref() {
        Some("Succeeded") | None => OperationStatus::Succeeded,
        Some("Failed" | "Canceled") => OperationStatus::Failed,
        Some(_) => OperationStatus::InProgress,
    }
}

/// Map a successful poll response to a status
fn status_from_response(status: StatusCode, body: &str) -> OperationStatus {
    match status {
        StatusCode::ACCEPTED => OperationStatus::InProgress,
        StatusCode::NO_CONTENT => OperationStatus::Succeeded,
        _ => status_from_body(body),
    }
}

/// Status implied by a failed poll; `None` when the error should propagate
fn status_from_error(error: &anyhow::Error) -> Option<OperationStatus> {
    match classify_anyhow_error(error)? {
        err if err.is_not_found() => Some(OperationStatus::Succeeded),
        ArmError::Api { .. } | ArmError::Conflict { .. } => Some(OperationStatus::Failed),
        _ => None,
    }
}

impl ArmOperations for ArmClient {
    async fn get_virtual_machine(&self, group: &str, name: &str) -> Result<Option<VirtualMachine>> {
        self.get_json(&self.resource_url(ResourceKind::VirtualMachine, group, name))
            .await
    }

    async fn get_network_interface(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterfaceCard>> {
        self.get_json(&self.resource_url(ResourceKind::NetworkInterface, group, name))
            .await
    }

    async fn get_storage_keys(
        &self,
        group: &str,
        account: &str,
    ) -> Result<Option<StorageServiceKeys>> {
        let url = format!(
            "{}/listKeys?api-version={}",
            self.resource_path(ResourceKind::StorageAccount, group, account),
            ResourceKind::StorageAccount.api_version()
        );
        let Some(response) = ignore_not_found(self.send(Method::POST, &url).await)? else {
            return Ok(None);
        };
        let keys = response
            .json::<StorageServiceKeys>()
            .await
            .with_context(|| format!("Failed to decode keys of storage account {account}"))?;
        Ok(Some(keys))
    }

    async fn list(&self, kind: ResourceKind, group: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next = Some(self.collection_url(kind, group));

        while let Some(url) = next {
            // A group that no longer exists holds nothing
            let Some(page) = self.get_json::<ResourceList>(&url).await? else {
                break;
            };
            names.extend(page.value.into_iter().map(|r| r.name));
            next = page.next_link;
        }

        debug!(kind = %kind, group = %group, count = names.len(), "Listed resources");
        Ok(names)
    }

    async fn delete(&self, kind: ResourceKind, group: &str, name: &str) -> Result<DeletionOutcome> {
        self.delete_url(&self.resource_url(kind, group, name)).await
    }

    async fn delete_resource_group(&self, group: &str) -> Result<DeletionOutcome> {
        self.delete_url(&self.group_url(group)).await
    }

    async fn operation_status(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let response = match self.send(Method::GET, handle.uri()).await {
            Ok(response) => response,
            Err(e) => {
                let Some(status) = status_from_error(&e) else {
                    return Err(e);
                };
                if status == OperationStatus::Failed {
                    warn!(operation = %handle.uri(), error = ?e, "Operation failed");
                }
                return Ok(status);
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(status_from_response(status, &body))
    }
}
