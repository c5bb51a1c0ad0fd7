//! Authenticated client for the node endpoints.

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;

use crate::config::ProxmoxConfig;
use crate::error::ProxmoxError;
use crate::proxmox::session::Session;
use crate::proxmox::types::{ApiEnvelope, CreateContainerRequest, TaskStatus, TaskStatusResponse};
use crate::proxmox::{HypervisorApi, http_client, truncate_for_preview};

const CSRF_HEADER: HeaderName = HeaderName::from_static("csrfpreventiontoken");

/// Talks to one Proxmox node with a logged-in [`Session`].
pub struct ProxmoxClient {
    client: Client,
    config: ProxmoxConfig,
}

impl ProxmoxClient {
    /// Build a client that sends the session cookie and CSRF token on every request.
    pub fn authenticated(config: &ProxmoxConfig, session: &Session) -> Result<Self, ProxmoxError> {
        let mut cookie = HeaderValue::from_str(&format!(
            "PVEAuthCookie={}",
            session.ticket.expose_secret()
        ))
        .map_err(|e| ProxmoxError::Client(format!("invalid ticket: {}", e)))?;
        cookie.set_sensitive(true);

        let mut csrf = HeaderValue::from_str(session.csrf_token.expose_secret())
            .map_err(|e| ProxmoxError::Client(format!("invalid CSRF token: {}", e)))?;
        csrf.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie);
        headers.insert(CSRF_HEADER, csrf);

        let client = http_client(config)
            .default_headers(headers)
            .build()
            .map_err(|e| ProxmoxError::Client(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn node(&self) -> &str {
        &self.config.node
    }

    async fn read_data<T: DeserializeOwned>(
        endpoint: &str,
        response: Response,
    ) -> Result<T, ProxmoxError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxmoxError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: format!("Failed to read response body: {}", e),
            })?;

        tracing::debug!("Proxmox {} -> {}", endpoint, status);

        if !status.is_success() {
            return Err(ProxmoxError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: truncate_for_preview(&body, 512),
            });
        }

        let envelope: ApiEnvelope<T> =
            serde_json::from_str(&body).map_err(|e| ProxmoxError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: format!(
                    "JSON parse error: {}. Raw: {}",
                    e,
                    truncate_for_preview(&body, 512)
                ),
            })?;

        envelope.data.ok_or_else(|| ProxmoxError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: "response has no data".to_string(),
        })
    }
}

#[async_trait]
impl HypervisorApi for ProxmoxClient {
    async fn create_container(
        &self,
        request: &CreateContainerRequest,
    ) -> Result<String, ProxmoxError> {
        let endpoint = format!("nodes/{}/lxc", self.config.node);
        let url = self.config.api_url(&endpoint);

        tracing::debug!(
            "Creating container {} ({}) on {}",
            request.vmid,
            request.hostname,
            self.config.node
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ProxmoxError::RequestFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        Self::read_data(&endpoint, response).await
    }

    async fn task_status(&self, upid: &str) -> Result<TaskStatus, ProxmoxError> {
        let endpoint = format!("nodes/{}/tasks/{}/status", self.config.node, upid);
        let url = self.config.api_url(&endpoint);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProxmoxError::RequestFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let status: TaskStatusResponse = Self::read_data(&endpoint, response).await?;
        Ok(status.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;

    fn config() -> ProxmoxConfig {
        ProxmoxConfig {
            base_url: "https://pve.lan:8006".to_string(),
            node: "pve1".to_string(),
            username: "root@pam".to_string(),
            password: SecretString::from("secret"),
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn rejects_ticket_with_control_characters() {
        let session = Session {
            username: "root@pam".to_string(),
            ticket: SecretString::from("bad\nticket"),
            csrf_token: SecretString::from("token"),
        };
        assert!(matches!(
            ProxmoxClient::authenticated(&config(), &session),
            Err(ProxmoxError::Client(_))
        ));
    }

    #[test]
    fn builds_with_valid_session() {
        let session = Session {
            username: "root@pam".to_string(),
            ticket: SecretString::from("PVE:root@pam:4EEC61E2::sig"),
            csrf_token: SecretString::from("4EEC61E2:token"),
        };
        let client = ProxmoxClient::authenticated(&config(), &session).unwrap();
        assert_eq!(client.node(), "pve1");
    }
}
