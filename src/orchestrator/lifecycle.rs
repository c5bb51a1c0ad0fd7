//! One provisioning run: approved requests in, containers and instance rows out.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use secrecy::SecretString;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ProvisioningConfig;
use crate::error::{Error, ProvisionError};
use crate::orchestrator::hostname::{container_hostname, sanitize_hostname};
use crate::orchestrator::identity::IdentityAllocator;
use crate::orchestrator::provisioner::{
    ContainerProvisioner, ContainerSpec, ProvisionedContainer, usable_image,
};
use crate::proxmox::{HypervisorApi, ProxmoxClient, SessionManager};
use crate::store::{Instance, MachineState, ProvisioningStore, Request};

/// Outcome counts of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Approved requests without a container at the start of the run.
    pub eligible: usize,
    pub provisioned: usize,
    /// Requests missing their hardware or OS template.
    pub skipped: usize,
    pub failed: usize,
    /// Containers that exist on the node but could not be recorded.
    pub persistence_failures: usize,
    /// Ids recorded this run, in order.
    pub instance_ids: Vec<i64>,
}

impl RunSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            eligible: 0,
            provisioned: 0,
            skipped: 0,
            failed: 0,
            persistence_failures: 0,
            instance_ids: Vec::new(),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} eligible, {} provisioned, {} skipped, {} failed, {} not recorded",
            self.eligible,
            self.provisioned,
            self.skipped,
            self.failed,
            self.persistence_failures
        )
    }
}

/// A request as a dry run would handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    pub request_id: i64,
    pub hostname: String,
    /// Id it would be created with, `None` when it would be skipped.
    pub instance_id: Option<i64>,
}

enum RequestOutcome {
    Provisioned { vmid: i64 },
    Skipped,
    Failed,
    NotRecorded { vmid: i64 },
}

/// Drives approved requests through provisioning and records the results.
pub struct RequestLifecycleManager {
    sessions: SessionManager,
    store: Arc<dyn ProvisioningStore>,
    config: ProvisioningConfig,
    provisioner: ContainerProvisioner,
}

impl RequestLifecycleManager {
    pub fn new(
        sessions: SessionManager,
        store: Arc<dyn ProvisioningStore>,
        config: ProvisioningConfig,
    ) -> Self {
        Self {
            sessions,
            store,
            provisioner: ContainerProvisioner::new(config.clone()),
            config,
        }
    }

    /// Log in, then provision every eligible request.
    ///
    /// Only login and loading the pending list fail the run; everything
    /// that goes wrong for a single request ends up in the summary.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);

        async {
            let session = self.sessions.login().await?;
            tracing::info!(
                user = %session.username,
                node = %self.sessions.config().node,
                "Logged in to Proxmox"
            );
            let api = ProxmoxClient::authenticated(self.sessions.config(), &session)?;
            self.process_pending(run_id, &api).await
        }
        .instrument(span)
        .await
    }

    /// Log in and report what a run would do, without creating or writing anything.
    pub async fn dry_run(&self) -> Result<Vec<PlannedRequest>, Error> {
        let session = self.sessions.login().await?;
        tracing::info!(user = %session.username, "Logged in to Proxmox for a dry run");

        let eligible = self.eligible_requests().await?;
        let allocator = IdentityAllocator::load(self.store.clone(), &self.config).await;
        let mut next_id = allocator.next_instance_id().await;

        let plan: Vec<PlannedRequest> = eligible
            .iter()
            .map(|request| {
                let image = request
                    .os_template
                    .as_ref()
                    .and_then(|t| usable_image(t.image_location.as_deref()));
                match (request.hardware, image) {
                    (Some(_), Some(_)) => {
                        let id = next_id;
                        next_id += 1;
                        PlannedRequest {
                            request_id: request.request_id,
                            hostname: container_hostname(&request.instant_name, id),
                            instance_id: Some(id),
                        }
                    }
                    _ => PlannedRequest {
                        request_id: request.request_id,
                        hostname: sanitize_hostname(&request.instant_name),
                        instance_id: None,
                    },
                }
            })
            .collect();

        for planned in &plan {
            match planned.instance_id {
                Some(id) => tracing::info!(
                    request_id = planned.request_id,
                    vmid = id,
                    "Would provision {}",
                    planned.hostname
                ),
                None => tracing::info!(
                    request_id = planned.request_id,
                    "Would not provision {}: missing hardware, OS template or image location",
                    planned.hostname
                ),
            }
        }

        Ok(plan)
    }

    /// Provision every eligible request through `api`.
    pub async fn process_pending(
        &self,
        run_id: Uuid,
        api: &dyn HypervisorApi,
    ) -> Result<RunSummary, Error> {
        let mut summary = RunSummary::new(run_id);

        let eligible = self.eligible_requests().await?;
        summary.eligible = eligible.len();

        if eligible.is_empty() {
            tracing::info!("No approved requests waiting for a container");
            return Ok(summary);
        }

        let mut allocator = IdentityAllocator::load(self.store.clone(), &self.config).await;
        let mut next_id = allocator.next_instance_id().await;
        tracing::info!(
            eligible = summary.eligible,
            first_id = next_id,
            "Processing approved requests"
        );

        for request in &eligible {
            let span = tracing::info_span!("request", request_id = request.request_id);
            let outcome = self
                .handle_request(api, &mut allocator, request, next_id)
                .instrument(span)
                .await;

            match outcome {
                RequestOutcome::Provisioned { vmid } => {
                    summary.provisioned += 1;
                    summary.instance_ids.push(vmid);
                    next_id = vmid + 1;
                }
                RequestOutcome::NotRecorded { vmid } => {
                    summary.persistence_failures += 1;
                    next_id = vmid + 1;
                }
                RequestOutcome::Skipped => summary.skipped += 1,
                RequestOutcome::Failed => summary.failed += 1,
            }
        }

        tracing::info!(
            provisioned = summary.provisioned,
            skipped = summary.skipped,
            failed = summary.failed,
            persistence_failures = summary.persistence_failures,
            "Run complete: {}",
            summary
        );
        Ok(summary)
    }

    async fn eligible_requests(&self) -> Result<Vec<Request>, Error> {
        let requests = self.store.pending_requests().await?;
        Ok(requests.into_iter().filter(Request::is_eligible).collect())
    }

    async fn handle_request(
        &self,
        api: &dyn HypervisorApi,
        allocator: &mut IdentityAllocator,
        request: &Request,
        candidate_id: i64,
    ) -> RequestOutcome {
        let (Some(hardware), Some(os_template)) = (request.hardware, request.os_template.as_ref())
        else {
            tracing::warn!(
                request_id = request.request_id,
                "Skipping request: missing hardware or OS template"
            );
            return RequestOutcome::Skipped;
        };

        let spec = ContainerSpec {
            request_id: request.request_id,
            name: request.instant_name.clone(),
            hardware,
            image_location: os_template.image_location.clone(),
            password: generate_password(),
        };

        let vmid = match allocator
            .reserve_instance_id(candidate_id, request.request_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(request_id = request.request_id, "Could not reserve an instance id: {}", e);
                return RequestOutcome::Failed;
            }
        };

        let container = match self.provisioner.provision(api, allocator, &spec, vmid).await {
            Ok(container) => container,
            Err(e) if e.container_may_exist() => {
                tracing::warn!(
                    vmid,
                    request_id = request.request_id,
                    "Provisioning failed after the create was accepted, keeping vmid reserved: {}",
                    e
                );
                return RequestOutcome::Failed;
            }
            Err(e) => {
                tracing::warn!(
                    vmid,
                    request_id = request.request_id,
                    "Provisioning failed, request left for a later run: {}",
                    e
                );
                allocator.release_instance_id(vmid).await;
                return RequestOutcome::Failed;
            }
        };

        let instance = self.instance_for(request, &spec, &container);
        match self.store.record_provisioned(&instance).await {
            Ok(()) => {
                tracing::info!(
                    vmid,
                    request_id = request.request_id,
                    address = %container.address,
                    "Provisioned {}",
                    container.hostname
                );
                RequestOutcome::Provisioned { vmid }
            }
            Err(source) => {
                let err = ProvisionError::Persistence {
                    vmid,
                    request_id: request.request_id,
                    source,
                };
                tracing::error!(vmid, request_id = request.request_id, "{}", err);
                RequestOutcome::NotRecorded { vmid }
            }
        }
    }

    fn instance_for(
        &self,
        request: &Request,
        spec: &ContainerSpec,
        container: &ProvisionedContainer,
    ) -> Instance {
        let now = Utc::now();
        Instance {
            instance_id: container.vmid,
            user_id: request.user_id.clone(),
            request_id: request.request_id,
            username: self.config.admin_username.clone(),
            password: spec.password.clone(),
            ip_addr: container.address.to_string(),
            machine_state: MachineState::Running,
            create_date: now,
            expire_date: request.end_datetime,
            update_by: request.user_id.clone(),
            update_date: now,
        }
    }
}

/// 16 lowercase hex characters from 8 random bytes.
pub(crate) fn generate_password() -> SecretString {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    SecretString::from(hex)
}
