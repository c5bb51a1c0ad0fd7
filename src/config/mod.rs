//! Configuration for the provisioner.
//!
//! Everything comes from environment variables. A `.env` file in the working
//! directory is loaded first via dotenvy, which never overwrites variables
//! that are already set.

mod database;
pub(crate) mod helpers;
mod provisioning;
mod proxmox;

use crate::error::ConfigError;

pub use self::database::DatabaseConfig;
pub use self::provisioning::ProvisioningConfig;
pub use self::proxmox::ProxmoxConfig;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub proxmox: ProxmoxConfig,
    pub database: DatabaseConfig,
    pub provisioning: ProvisioningConfig,
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            proxmox: ProxmoxConfig::resolve()?,
            database: DatabaseConfig::resolve()?,
            provisioning: ProvisioningConfig::resolve()?,
        })
    }
}
