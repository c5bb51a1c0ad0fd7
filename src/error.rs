//! Error types for the provisioner.
//!
//! Each layer has its own enum; [`Error`] is what a run returns. Only
//! [`ProxmoxError::AuthFailed`] coming out of login is fatal to a run,
//! everything raised while handling a single request is caught by the
//! lifecycle manager and recorded in the run summary.

use std::time::Duration;

/// Top-level error for a provisioning run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Proxmox error: {0}")]
    Proxmox(#[from] ProxmoxError),

    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// True when the run failed because the hypervisor rejected our login.
    ///
    /// `main` maps this to exit code 1 even in repeat mode.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Proxmox(ProxmoxError::AuthFailed { .. }))
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors talking to the Proxmox VE management API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxmoxError {
    #[error("Proxmox login failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Proxmox rejected {endpoint} with HTTP {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Task {upid} failed: {status}")]
    TaskFailed { upid: String, status: String },

    #[error("Task {upid} still running after {waited:?}")]
    TaskTimeout { upid: String, waited: Duration },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Errors from the request/instance datastore.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Request {0} not found")]
    RequestNotFound(i64),
}

/// Errors from provisioning a single request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    #[error("Request {request_id} is missing template data: {reason}")]
    MissingTemplateData { request_id: i64, reason: String },

    #[error("No free address left in {network}")]
    AddressPoolExhausted { network: String },

    #[error("No free instance id starting at {first} after {attempts} attempts")]
    IdReservationExhausted { first: i64, attempts: u32 },

    #[error("Root SSH setup failed for container {vmid}: {reason}")]
    PostStep { vmid: i64, reason: String },

    #[error(transparent)]
    Proxmox(#[from] ProxmoxError),

    /// Proxmox accepted the create request, so the container may exist.
    #[error("Container {vmid} was submitted as {upid} but did not come up: {source}")]
    TaskIncomplete {
        vmid: i64,
        upid: String,
        #[source]
        source: ProxmoxError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Container {vmid} was created but request {request_id} could not be recorded: {source}")]
    Persistence {
        vmid: i64,
        request_id: i64,
        #[source]
        source: StoreError,
    },
}

impl ProvisionError {
    /// True when the create request reached the node, so the vmid must not
    /// be handed to another request.
    pub fn container_may_exist(&self) -> bool {
        matches!(self, Self::TaskIncomplete { .. } | Self::Persistence { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_is_detected() {
        let err = Error::from(ProxmoxError::AuthFailed {
            reason: "HTTP 401".to_string(),
        });
        assert!(err.is_auth_failure());

        let err = Error::from(ProxmoxError::TaskFailed {
            upid: "UPID:pve:1".to_string(),
            status: "error".to_string(),
        });
        assert!(!err.is_auth_failure());
    }

    #[test]
    fn persistence_error_names_vmid_and_request() {
        let err = ProvisionError::Persistence {
            vmid: 104,
            request_id: 7,
            source: StoreError::Database("connection reset".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("104"));
        assert!(msg.contains("request 7"));
        assert!(msg.contains("connection reset"));
        assert!(err.container_may_exist());
    }

    #[test]
    fn only_accepted_creates_hold_the_vmid() {
        let timeout = ProvisionError::TaskIncomplete {
            vmid: 100,
            upid: "UPID:pve:1".to_string(),
            source: ProxmoxError::TaskTimeout {
                upid: "UPID:pve:1".to_string(),
                waited: Duration::from_secs(600),
            },
        };
        assert!(timeout.container_may_exist());

        let rejected = ProvisionError::Proxmox(ProxmoxError::Api {
            endpoint: "nodes/pve/lxc".to_string(),
            status: 500,
            body: "CT 100 already exists".to_string(),
        });
        assert!(!rejected.container_may_exist());
    }
}
