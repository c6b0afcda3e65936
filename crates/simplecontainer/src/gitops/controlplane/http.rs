//! HTTP client for the control-plane API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Comparison, ControlPlane};
use crate::gitops::definitions::Definition;
use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::git::Credentials;
use crate::gitops::resource::AuthSource;

/// Header carrying the owner reference, `gitops.<group>.<name>`.
pub const OWNER_HEADER: &str = "Owner";

/// Header carrying the reconciling node.
pub const NODE_HEADER: &str = "Node";

/// Maximum length of a response body quoted in an error.
const MAX_ERROR_BODY_LENGTH: usize = 200;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response envelope used by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub error_explanation: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Control plane reached over HTTP.
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    node_id: String,
}

impl HttpControlPlane {
    /// Creates a client for `base_url` with a bounded request timeout.
    pub fn new(base_url: &str, node_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                GitOpsError::ControlPlaneUnreachable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            node_id: node_id.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POSTs `definition` to `/<action>/<kind>` with owner and node headers.
    async fn post_definition(&self, action: &str, definition: &Definition) -> Result<Response> {
        let mut request = self
            .client
            .post(self.url(&format!("{}/{}", action, definition.kind)))
            .header(NODE_HEADER, &self.node_id)
            .json(definition);

        if let Some(owner) = &definition.meta.owner {
            request = request.header(OWNER_HEADER, owner.header_value());
        }

        send(request).await
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| GitOpsError::ControlPlaneUnreachable(e.to_string()))
}

/// Extracts a short reason from an error response.
async fn reason(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let reason = serde_json::from_str::<ApiResponse>(&body)
        .ok()
        .map(|r| {
            if r.error_explanation.is_empty() {
                r.explanation
            } else {
                r.error_explanation
            }
        })
        .filter(|r| !r.is_empty())
        .unwrap_or(body);

    let reason = if reason.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &reason[..end])
    } else {
        reason
    };

    format!("{}: {}", status, reason)
}

/// Maps an unexpected status to an error: 4xx is a rejection, anything else unreachable.
async fn failure(definition: &Definition, response: Response) -> GitOpsError {
    let client_error = response.status().is_client_error();
    let reason = reason(response).await;

    if client_error {
        GitOpsError::Rejected {
            kind: definition.kind.clone(),
            name: format!("{}/{}", definition.meta.group, definition.meta.name),
            reason,
        }
    } else {
        GitOpsError::ControlPlaneUnreachable(reason)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn compare(&self, definition: &Definition) -> Result<Comparison> {
        let response = self.post_definition("compare", definition).await?;

        match response.status() {
            StatusCode::OK => Ok(Comparison::Same),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => Ok(Comparison::Drifted),
            _ => Err(failure(definition, response).await),
        }
    }

    async fn apply(&self, definition: &Definition) -> Result<()> {
        let response = self.post_definition("apply", definition).await?;
        let status = response.status();

        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            log::debug!(
                "Applied {}/{}/{} ({})",
                definition.kind,
                definition.meta.group,
                definition.meta.name,
                status
            );
            Ok(())
        } else {
            Err(failure(definition, response).await)
        }
    }

    async fn delete(&self, definition: &Definition) -> Result<()> {
        let response = self.post_definition("delete", definition).await?;
        let status = response.status();

        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(failure(definition, response).await)
        }
    }

    async fn fetch_credentials(&self, source: &AuthSource) -> Result<Credentials> {
        let reference = source.reference();
        let response = send(
            self.client
                .get(self.url(&format!(
                    "get/{}/{}/{}",
                    source.kind(),
                    reference.group,
                    reference.name
                )))
                .header(NODE_HEADER, &self.node_id),
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = reason(response).await;
            return Err(if status.is_client_error() {
                GitOpsError::GitAuthFailed(format!(
                    "{} {}/{}: {}",
                    source.kind(),
                    reference.group,
                    reference.name,
                    reason
                ))
            } else {
                GitOpsError::ControlPlaneUnreachable(reason)
            });
        }

        let body: ApiResponse = response.json().await.map_err(|e| {
            GitOpsError::GitAuthFailed(format!("Failed to parse {}: {}", source.kind(), e))
        })?;
        let spec = body.data.get("spec").unwrap_or(&body.data);

        Credentials::from_spec(source, spec)
    }

    async fn persist_state(&self, key: &str, body: &[u8]) -> Result<()> {
        let response = send(
            self.client
                .put(self.url(&format!("state/{}", key)))
                .header(NODE_HEADER, &self.node_id)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec()),
        )
        .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GitOpsError::ControlPlaneUnreachable(reason(response).await))
        }
    }

    async fn remove_state(&self, key: &str) -> Result<()> {
        let response = send(
            self.client
                .delete(self.url(&format!("state/{}", key)))
                .header(NODE_HEADER, &self.node_id),
        )
        .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(GitOpsError::ControlPlaneUnreachable(reason(response).await))
        }
    }
}
