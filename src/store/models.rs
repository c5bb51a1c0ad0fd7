//! Rows read from and written to the request/instance tables.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Status column of `request_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Approved by an operator, waiting for a container.
    Approved,
    /// A container was provisioned for it.
    Created,
    /// Any other workflow state (pending, rejected, ...). Never processed here.
    Other(String),
}

impl RequestStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Approved => "approved",
            Self::Created => "created",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for RequestStatus {
    fn from(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "created" => Self::Created,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Sizing from `instance_template`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareProfile {
    pub cpu: u32,
    pub memory_mb: u32,
    pub storage_gb: u32,
}

/// Image reference from `os_template`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsTemplate {
    /// Proxmox volume id of the template, e.g.
    /// `local:vztmpl/debian-12-standard_12.7-1_amd64.tar.zst`.
    pub image_location: Option<String>,
}

/// A row of `request_info` joined with its templates.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: i64,
    pub user_id: String,
    /// Name the user asked for; sanitized into the container hostname.
    pub instant_name: String,
    pub status: RequestStatus,
    pub is_create: bool,
    pub end_datetime: Option<DateTime<Utc>>,
    pub hardware: Option<HardwareProfile>,
    pub os_template: Option<OsTemplate>,
}

impl Request {
    /// Whether this request should be picked up by a run.
    pub fn is_eligible(&self) -> bool {
        self.status == RequestStatus::Approved && !self.is_create
    }
}

/// `machine_state` column of `instance_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Running,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A row of `instance_info`, written once per provisioned request.
#[derive(Clone)]
pub struct Instance {
    pub instance_id: i64,
    pub user_id: String,
    pub request_id: i64,
    pub username: String,
    pub password: SecretString,
    pub ip_addr: String,
    pub machine_state: MachineState,
    pub create_date: DateTime<Utc>,
    pub expire_date: Option<DateTime<Utc>>,
    pub update_by: String,
    pub update_date: DateTime<Utc>,
}

impl Instance {
    /// Plaintext root password, for writing to the datastore only.
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("instance_id", &self.instance_id)
            .field("user_id", &self.user_id)
            .field("request_id", &self.request_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ip_addr", &self.ip_addr)
            .field("machine_state", &self.machine_state)
            .field("create_date", &self.create_date)
            .field("expire_date", &self.expire_date)
            .field("update_by", &self.update_by)
            .field("update_date", &self.update_date)
            .finish()
    }
}
