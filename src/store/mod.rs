//! Datastore access for requests and instances.
//!
//! The provisioner does not own the schema of `request_info`,
//! `instance_info` and the template tables; it only reads and writes the
//! columns listed in [`models`]. The one table it does own is
//! `instance_id_reservation`, created by [`PostgresStore::run_migrations`].

pub mod memory;
pub mod models;
mod postgres;

use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::InMemoryStore;
pub use models::{HardwareProfile, Instance, MachineState, OsTemplate, Request, RequestStatus};
pub use postgres::PostgresStore;

/// Everything the orchestrator needs from the datastore.
#[async_trait]
pub trait ProvisioningStore: Send + Sync {
    /// Requests that are `approved` and not yet created, with their templates.
    async fn pending_requests(&self) -> Result<Vec<Request>, StoreError>;

    /// Highest `instance_id` in `instance_info`, or `None` when empty.
    async fn max_instance_id(&self) -> Result<Option<i64>, StoreError>;

    /// Addresses already recorded on instances. Unparseable values are skipped.
    async fn assigned_addresses(&self) -> Result<Vec<Ipv4Addr>, StoreError>;

    /// Claim `instance_id` for `request_id`.
    ///
    /// Returns `false` when the id is already used by an instance or held by
    /// another reservation.
    async fn reserve_instance_id(
        &self,
        instance_id: i64,
        request_id: i64,
    ) -> Result<bool, StoreError>;

    /// Drop a reservation after a failed provisioning attempt.
    async fn release_instance_id(&self, instance_id: i64) -> Result<(), StoreError>;

    /// Insert the instance and mark its request `created`, atomically.
    async fn record_provisioned(&self, instance: &Instance) -> Result<(), StoreError>;
}

/// Parse `ip_addr` column values, dropping placeholders and CIDR suffixes.
pub(crate) fn parse_addresses<I, S>(values: I) -> Vec<Ipv4Addr>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|v| {
            let v = v.as_ref().trim();
            let host = v.split_once('/').map(|(h, _)| h).unwrap_or(v);
            host.parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_addresses_skips_placeholders() {
        let parsed = parse_addresses([
            "192.168.1.120",
            "Dynamic (Check Dashboard)",
            "192.168.1.121/24",
            "",
        ]);
        assert_eq!(
            parsed,
            vec![Ipv4Addr::new(192, 168, 1, 120), Ipv4Addr::new(192, 168, 1, 121)]
        );
    }
}
