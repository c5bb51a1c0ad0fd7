//! Proxmox VE management API.
//!
//! Only the three endpoints the provisioner needs are covered:
//!
//! ```text
//! POST /api2/json/access/ticket                 -> Session
//! POST /api2/json/nodes/{node}/lxc              -> UPID
//! GET  /api2/json/nodes/{node}/tasks/{upid}/status
//! ```

mod client;
mod session;
mod task;
mod types;

use async_trait::async_trait;

use crate::config::ProxmoxConfig;
use crate::error::ProxmoxError;

pub use client::ProxmoxClient;
pub use session::{Session, SessionManager};
pub use task::TaskWaiter;
pub use types::{CreateContainerRequest, TaskStatus};

/// Container operations on a single node.
///
/// Implemented by [`ProxmoxClient`]; tests substitute their own.
#[async_trait]
pub trait HypervisorApi: Send + Sync {
    /// Submit a create request. Returns the UPID of the creation task.
    async fn create_container(
        &self,
        request: &CreateContainerRequest,
    ) -> Result<String, ProxmoxError>;

    /// Current state of a task.
    async fn task_status(&self, upid: &str) -> Result<TaskStatus, ProxmoxError>;
}

/// Base HTTP client settings shared by login and API calls.
fn http_client(config: &ProxmoxConfig) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder().timeout(config.request_timeout);

    if config.accept_invalid_certs {
        tracing::warn!(
            "TLS certificate verification disabled for {} (PMX_INSECURE_TLS)",
            config.base_url
        );
        builder.danger_accept_invalid_certs(true)
    } else {
        builder
    }
}

/// Cut `s` to at most `max` bytes on a char boundary, for log and error output.
fn truncate_for_preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
