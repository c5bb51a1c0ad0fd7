//! Turns approved requests into running containers.
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │  RequestLifecycleManager::run()                    │
//! │    login ──► Session ──► ProxmoxClient             │
//! │    store.pending_requests()                        │
//! │    for each request (sequential):                  │
//! │      IdentityAllocator                             │
//! │        reserve_instance_id(counter)                │
//! │        allocate_address()                          │
//! │      ContainerProvisioner                          │
//! │        POST nodes/{node}/lxc ──► UPID              │
//! │        TaskWaiter::wait(UPID)                      │
//! │        settle, optional root SSH                   │
//! │      store.record_provisioned(instance)            │
//! │    RunSummary                                      │
//! └────────────────────────────────────────────────────┘
//! ```

mod hostname;
mod identity;
mod lifecycle;
mod provisioner;
mod ssh;

pub use hostname::sanitize_hostname;
pub use identity::{AddressPool, IdentityAllocator};
pub use lifecycle::{PlannedRequest, RequestLifecycleManager, RunSummary};
pub use provisioner::{ContainerProvisioner, ContainerSpec, ProvisionedContainer};
pub use ssh::RootSshEnabler;
