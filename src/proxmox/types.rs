//! Wire types for the Proxmox VE API.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

/// Every Proxmox response body is `{"data": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub data: Option<T>,
}

/// Body of `POST /access/ticket`.
#[derive(Serialize)]
pub(crate) struct TicketRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// `data` of a successful `POST /access/ticket`.
#[derive(Deserialize)]
pub(crate) struct TicketResponse {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_prevention_token: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// `data` of `GET /nodes/{node}/tasks/{upid}/status`.
#[derive(Debug, Deserialize)]
pub(crate) struct TaskStatusResponse {
    pub status: String,
    #[serde(default)]
    pub exitstatus: Option<String>,
}

/// Body of `POST /nodes/{node}/lxc`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateContainerRequest {
    pub vmid: i64,
    /// Template volume, e.g. `local:vztmpl/debian-12-standard_12.7-1_amd64.tar.zst`.
    pub ostemplate: String,
    pub hostname: String,
    pub arch: String,
    pub cores: u32,
    /// MiB.
    pub memory: u32,
    /// MiB.
    pub swap: u32,
    /// `<storage>:<size in GiB>`.
    pub rootfs: String,
    pub net0: String,
    #[serde(serialize_with = "serialize_secret")]
    pub password: SecretString,
    /// 0 = refuse to overwrite an existing container with the same vmid.
    pub force: u8,
    /// 1 = start the container once created.
    pub start: u8,
}

fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

/// Observed state of an asynchronous Proxmox task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    /// Finished. `exit_status` is Proxmox's `exitstatus` (`"OK"` on success).
    Stopped { exit_status: Option<String> },
    /// Any other state reported by the node.
    Other(String),
}

impl From<TaskStatusResponse> for TaskStatus {
    fn from(resp: TaskStatusResponse) -> Self {
        match resp.status.as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped {
                exit_status: resp.exitstatus,
            },
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_plain_password_and_flags() {
        let payload = CreateContainerRequest {
            vmid: 100,
            ostemplate: "template.tar.gz".to_string(),
            hostname: "web".to_string(),
            arch: "amd64".to_string(),
            cores: 2,
            memory: 1024,
            swap: 512,
            rootfs: "local-lvm:10".to_string(),
            net0: "name=eth0,bridge=vmbr0,ip=192.168.1.120/24,gw=192.168.1.1,firewall=1"
                .to_string(),
            password: SecretString::from("abcdef0123456789"),
            force: 0,
            start: 1,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["password"], "abcdef0123456789");
        assert_eq!(json["force"], 0);
        assert_eq!(json["start"], 1);
        assert_eq!(json["rootfs"], "local-lvm:10");

        assert!(!format!("{:?}", payload).contains("abcdef0123456789"));
    }

    #[test]
    fn task_status_classification() {
        let parse = |raw: &str| -> TaskStatus {
            let env: ApiEnvelope<TaskStatusResponse> = serde_json::from_str(raw).unwrap();
            env.data.unwrap().into()
        };

        assert_eq!(parse(r#"{"data":{"status":"running"}}"#), TaskStatus::Running);
        assert_eq!(
            parse(r#"{"data":{"status":"stopped","exitstatus":"OK"}}"#),
            TaskStatus::Stopped {
                exit_status: Some("OK".to_string())
            }
        );
        assert_eq!(
            parse(r#"{"data":{"status":"error"}}"#),
            TaskStatus::Other("error".to_string())
        );
    }

    #[test]
    fn null_data_envelope_parses() {
        let env: ApiEnvelope<TicketResponse> = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert!(env.data.is_none());
    }
}
