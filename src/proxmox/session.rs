//! Ticket-based login against `/access/ticket`.
//!
//! A [`Session`] is created once per run and handed to
//! [`ProxmoxClient::authenticated`](crate::proxmox::ProxmoxClient::authenticated).
//! Tickets are valid for two hours on the Proxmox side, which is far longer
//! than a run, so there is no renewal.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use crate::config::ProxmoxConfig;
use crate::error::ProxmoxError;
use crate::proxmox::types::{ApiEnvelope, TicketRequest, TicketResponse};
use crate::proxmox::{http_client, truncate_for_preview};

/// Credentials returned by a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    /// Sent as the `PVEAuthCookie` cookie.
    pub ticket: SecretString,
    /// Required on every state-changing request.
    pub csrf_token: SecretString,
}

/// Performs the login exchange.
pub struct SessionManager {
    client: Client,
    config: ProxmoxConfig,
}

impl SessionManager {
    pub fn new(config: ProxmoxConfig) -> Result<Self, ProxmoxError> {
        let client = http_client(&config).build().map_err(|e| {
            ProxmoxError::Client(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProxmoxConfig {
        &self.config
    }

    /// Exchange username/password for a ticket and CSRF token.
    ///
    /// Every failure, including an unreachable host, is reported as
    /// [`ProxmoxError::AuthFailed`] so callers can treat it as fatal.
    pub async fn login(&self) -> Result<Session, ProxmoxError> {
        let url = self.config.api_url("access/ticket");
        tracing::debug!("Logging in to Proxmox at {} as {}", url, self.config.username);

        let response = self
            .client
            .post(&url)
            .json(&TicketRequest {
                username: &self.config.username,
                password: self.config.password.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| ProxmoxError::AuthFailed {
                reason: format!("request to {} failed: {}", url, e),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ProxmoxError::AuthFailed {
            reason: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(ProxmoxError::AuthFailed {
                reason: format!("HTTP {}: {}", status, truncate_for_preview(&body, 256)),
            });
        }

        let envelope: ApiEnvelope<TicketResponse> =
            serde_json::from_str(&body).map_err(|e| ProxmoxError::AuthFailed {
                reason: format!("unexpected response: {}", e),
            })?;

        // Proxmox answers some bad logins with 200 and `"data": null`.
        let data = envelope.data.ok_or_else(|| ProxmoxError::AuthFailed {
            reason: "no ticket in response".to_string(),
        })?;

        tracing::debug!("Received Proxmox ticket for {}", self.config.username);

        Ok(Session {
            username: data.username.unwrap_or_else(|| self.config.username.clone()),
            ticket: SecretString::from(data.ticket),
            csrf_token: SecretString::from(data.csrf_prevention_token),
        })
    }
}
