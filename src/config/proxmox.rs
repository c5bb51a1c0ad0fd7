use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{parse_bool_env, parse_optional_env, required_env};
use crate::error::ConfigError;

/// Connection settings for the Proxmox VE management API.
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    /// Base URL of the cluster, e.g. `https://pve.lan:8006`.
    pub base_url: String,
    /// Node that receives the containers.
    pub node: String,
    /// Login user including realm, e.g. `root@pam`.
    pub username: String,
    pub password: SecretString,
    /// Skip TLS certificate validation. Off unless explicitly enabled.
    pub accept_invalid_certs: bool,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl ProxmoxConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let base_url = required_env("PMX_URL", "Set PMX_URL to the Proxmox API address")?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "PMX_URL".to_string(),
                message: format!("expected an http(s) URL, got '{}'", base_url),
            });
        }

        Ok(Self {
            base_url,
            node: required_env("PMX_NODE", "Set PMX_NODE to the target node name")?,
            username: required_env("PMX_USER", "Set PMX_USER, e.g. root@pam")?,
            password: SecretString::from(required_env(
                "PMX_PASSWORD",
                "Set PMX_PASSWORD for the Proxmox user",
            )?),
            accept_invalid_certs: parse_bool_env("PMX_INSECURE_TLS", false)?,
            request_timeout: Duration::from_secs(parse_optional_env(
                "PMX_REQUEST_TIMEOUT_SECS",
                30,
            )?),
        })
    }

    /// Build a full API URL under `/api2/json`.
    ///
    /// Accepts base URLs with or without the `/api2/json` suffix.
    pub fn api_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');

        if base.ends_with("/api2/json") {
            format!("{}/{}", base, path)
        } else {
            format!("{}/api2/json/{}", base, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::helpers::ENV_MUTEX;

    fn config(base_url: &str) -> ProxmoxConfig {
        ProxmoxConfig {
            base_url: base_url.to_string(),
            node: "pve".to_string(),
            username: "root@pam".to_string(),
            password: SecretString::from("secret"),
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn api_url_appends_api_prefix() {
        let cfg = config("https://pve.lan:8006/");
        assert_eq!(
            cfg.api_url("/access/ticket"),
            "https://pve.lan:8006/api2/json/access/ticket"
        );
    }

    #[test]
    fn api_url_keeps_existing_prefix() {
        let cfg = config("https://pve.lan:8006/api2/json");
        assert_eq!(
            cfg.api_url("nodes/pve/lxc"),
            "https://pve.lan:8006/api2/json/nodes/pve/lxc"
        );
    }

    fn clear_proxmox_env() {
        // SAFETY: Only called under ENV_MUTEX in tests.
        unsafe {
            for key in [
                "PMX_URL",
                "PMX_NODE",
                "PMX_USER",
                "PMX_PASSWORD",
                "PMX_INSECURE_TLS",
                "PMX_REQUEST_TIMEOUT_SECS",
            ] {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn resolve_defaults_to_verified_tls() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_proxmox_env();
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("PMX_URL", "https://pve.lan:8006");
            std::env::set_var("PMX_NODE", "pve");
            std::env::set_var("PMX_USER", "root@pam");
            std::env::set_var("PMX_PASSWORD", "hunter2");
        }

        let cfg = ProxmoxConfig::resolve().expect("resolve should succeed");
        assert!(!cfg.accept_invalid_certs);
        assert_eq!(cfg.node, "pve");
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(!format!("{:?}", cfg).contains("hunter2"));

        clear_proxmox_env();
    }

    #[test]
    fn resolve_rejects_missing_password() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_proxmox_env();
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("PMX_URL", "https://pve.lan:8006");
            std::env::set_var("PMX_NODE", "pve");
            std::env::set_var("PMX_USER", "root@pam");
        }

        let err = ProxmoxConfig::resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "PMX_PASSWORD"));

        clear_proxmox_env();
    }

    #[test]
    fn resolve_rejects_non_http_url() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_proxmox_env();
        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("PMX_URL", "pve.lan:8006");
        }

        let err = ProxmoxConfig::resolve().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PMX_URL"));

        clear_proxmox_env();
    }
}
