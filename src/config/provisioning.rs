use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::helpers::{parse_bool_env, parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// How containers are sized, addressed and waited for.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Storage pool for the root filesystem (`rootfs = "<storage>:<size>"`).
    pub storage: String,
    /// Bridge the container's `eth0` is attached to.
    pub bridge: String,
    pub arch: String,
    pub swap_mb: u32,
    /// Network base of the /24 the containers live in.
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Lowest host octet handed out.
    pub host_min: u8,
    /// Highest host octet handed out (inclusive).
    pub host_max: u8,
    /// Instance id used when the registry is empty.
    pub first_instance_id: i64,
    /// Pause after the create task finishes so the network can come up.
    pub settle: Duration,
    pub poll_interval: Duration,
    /// Upper bound on how long a create task may stay `running`.
    pub task_timeout: Duration,
    /// Username recorded alongside the generated root password.
    pub admin_username: String,
    /// Run the `pct exec` root-SSH step after the container boots.
    pub enable_root_ssh: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            storage: "local-lvm".to_string(),
            bridge: "vmbr0".to_string(),
            arch: "amd64".to_string(),
            swap_mb: 512,
            subnet: Ipv4Addr::new(192, 168, 1, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            host_min: 100,
            host_max: 250,
            first_instance_id: 100,
            settle: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(600),
            admin_username: "root".to_string(),
            enable_root_ssh: false,
        }
    }
}

impl ProvisioningConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let subnet: Ipv4Addr = parse_optional_env("LXC_SUBNET", defaults.subnet)?;
        let [a, b, c, _] = subnet.octets();
        let subnet = Ipv4Addr::new(a, b, c, 0);
        let gateway: Ipv4Addr = parse_optional_env("LXC_GATEWAY", defaults.gateway)?;
        if gateway.octets()[..3] != subnet.octets()[..3] {
            return Err(ConfigError::InvalidValue {
                key: "LXC_GATEWAY".to_string(),
                message: format!("{} is outside {}/24", gateway, subnet),
            });
        }

        let host_min: u8 = parse_optional_env("LXC_HOST_MIN", defaults.host_min)?;
        let host_max: u8 = parse_optional_env("LXC_HOST_MAX", defaults.host_max)?;
        if host_min == 0 || host_min > host_max || host_max == 255 {
            return Err(ConfigError::InvalidValue {
                key: "LXC_HOST_MIN".to_string(),
                message: format!(
                    "host range {}..={} must be non-empty and within 1..=254",
                    host_min, host_max
                ),
            });
        }

        let poll_interval_ms: u64 = parse_optional_env("TASK_POLL_INTERVAL_MS", 1000)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASK_POLL_INTERVAL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            storage: parse_string_env("LXC_STORAGE", &defaults.storage)?,
            bridge: parse_string_env("LXC_BRIDGE", &defaults.bridge)?,
            arch: parse_string_env("LXC_ARCH", &defaults.arch)?,
            swap_mb: parse_optional_env("LXC_SWAP_MB", defaults.swap_mb)?,
            subnet,
            gateway,
            host_min,
            host_max,
            first_instance_id: parse_optional_env("LXC_FIRST_ID", defaults.first_instance_id)?,
            settle: Duration::from_secs(parse_optional_env("LXC_SETTLE_SECS", 5)?),
            poll_interval: Duration::from_millis(poll_interval_ms),
            task_timeout: Duration::from_secs(parse_optional_env("TASK_TIMEOUT_SECS", 600)?),
            admin_username: parse_string_env("LXC_ADMIN_USER", &defaults.admin_username)?,
            enable_root_ssh: parse_bool_env("LXC_ENABLE_ROOT_SSH", false)?,
        })
    }
}
