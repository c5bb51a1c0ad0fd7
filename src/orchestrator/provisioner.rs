//! Creates one LXC container and waits for it to come up.

use std::net::Ipv4Addr;

use secrecy::SecretString;

use crate::config::ProvisioningConfig;
use crate::error::ProvisionError;
use crate::orchestrator::hostname::container_hostname;
use crate::orchestrator::identity::IdentityAllocator;
use crate::orchestrator::ssh::RootSshEnabler;
use crate::proxmox::{CreateContainerRequest, HypervisorApi, TaskWaiter};
use crate::store::HardwareProfile;

/// What to build for a request.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub request_id: i64,
    /// Name as the user entered it.
    pub name: String,
    pub hardware: HardwareProfile,
    pub image_location: Option<String>,
    pub password: SecretString,
}

/// A container that was created, started and has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedContainer {
    pub vmid: i64,
    pub hostname: String,
    pub address: Ipv4Addr,
    pub upid: String,
}

pub struct ContainerProvisioner {
    config: ProvisioningConfig,
    waiter: TaskWaiter,
    root_ssh: Option<RootSshEnabler>,
}

impl ContainerProvisioner {
    pub fn new(config: ProvisioningConfig) -> Self {
        let root_ssh = config.enable_root_ssh.then(RootSshEnabler::default);
        Self {
            waiter: TaskWaiter::from_config(&config),
            config,
            root_ssh,
        }
    }

    /// Replace the root-SSH post-step (or disable it with `None`).
    pub fn with_root_ssh(mut self, root_ssh: Option<RootSshEnabler>) -> Self {
        self.root_ssh = root_ssh;
        self
    }

    /// Create container `vmid` for `spec` and wait until it is usable.
    ///
    /// The address taken from `allocator` is given back only when the create
    /// request itself fails. Once Proxmox has accepted it, the container may
    /// hold the address and errors are reported as
    /// [`ProvisionError::TaskIncomplete`].
    pub async fn provision(
        &self,
        api: &dyn HypervisorApi,
        allocator: &mut IdentityAllocator,
        spec: &ContainerSpec,
        vmid: i64,
    ) -> Result<ProvisionedContainer, ProvisionError> {
        let hostname = container_hostname(&spec.name, vmid);

        let template = usable_image(spec.image_location.as_deref()).ok_or_else(|| {
            ProvisionError::MissingTemplateData {
                request_id: spec.request_id,
                reason: "OS template has no image location".to_string(),
            }
        })?;

        let address = allocator.allocate_address()?;
        let request = self.build_request(spec, vmid, &hostname, template, address);

        tracing::info!(
            vmid,
            request_id = spec.request_id,
            hostname = %hostname,
            %address,
            "Creating container"
        );

        let upid = match api.create_container(&request).await {
            Ok(upid) => upid,
            Err(e) => {
                allocator.release_address(address);
                return Err(e.into());
            }
        };
        tracing::debug!(vmid, upid = %upid, "Create task submitted");

        if let Err(source) = self.waiter.wait(api, &upid).await {
            return Err(ProvisionError::TaskIncomplete { vmid, upid, source });
        }

        if !self.config.settle.is_zero() {
            tokio::time::sleep(self.config.settle).await;
        }

        if let Some(ref enabler) = self.root_ssh
            && let Err(e) = enabler.enable(vmid).await
        {
            tracing::warn!(vmid, "Root SSH post-step failed: {}", e);
        }

        Ok(ProvisionedContainer {
            vmid,
            hostname,
            address,
            upid,
        })
    }

    pub(crate) fn build_request(
        &self,
        spec: &ContainerSpec,
        vmid: i64,
        hostname: &str,
        template: &str,
        address: Ipv4Addr,
    ) -> CreateContainerRequest {
        CreateContainerRequest {
            vmid,
            ostemplate: template.to_string(),
            hostname: hostname.to_string(),
            arch: self.config.arch.clone(),
            cores: spec.hardware.cpu,
            memory: spec.hardware.memory_mb,
            swap: self.config.swap_mb,
            rootfs: format!("{}:{}", self.config.storage, spec.hardware.storage_gb),
            net0: format!(
                "name=eth0,bridge={},ip={}/24,gw={},firewall=1",
                self.config.bridge, address, self.config.gateway
            ),
            password: spec.password.clone(),
            force: 0,
            start: 1,
        }
    }
}

/// The template volume to create from, if `image` names one.
pub(crate) fn usable_image(image: Option<&str>) -> Option<&str> {
    image.map(str::trim).filter(|s| !s.is_empty())
}
