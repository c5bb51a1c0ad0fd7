//! Instance ids and container addresses.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::config::ProvisioningConfig;
use crate::error::ProvisionError;
use crate::store::ProvisioningStore;

/// How many consecutive ids are tried before giving up on a reservation.
const MAX_RESERVATION_ATTEMPTS: u32 = 64;

/// Host addresses within one /24, tracking which are taken.
#[derive(Debug, Clone)]
pub struct AddressPool {
    subnet: Ipv4Addr,
    host_min: u8,
    host_max: u8,
    in_use: BTreeSet<u8>,
}

impl AddressPool {
    pub fn new(subnet: Ipv4Addr, host_min: u8, host_max: u8) -> Self {
        Self {
            subnet,
            host_min,
            host_max,
            in_use: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &ProvisioningConfig) -> Self {
        Self::new(config.subnet, config.host_min, config.host_max)
    }

    /// Mark addresses as taken. Addresses outside the subnet are ignored.
    pub fn seed<I: IntoIterator<Item = Ipv4Addr>>(&mut self, addresses: I) {
        for addr in addresses {
            if let Some(host) = self.host_octet(addr) {
                self.in_use.insert(host);
            }
        }
    }

    /// Take a random free address.
    pub fn allocate(&mut self) -> Result<Ipv4Addr, ProvisionError> {
        let free: Vec<u8> = (self.host_min..=self.host_max)
            .filter(|h| !self.in_use.contains(h))
            .collect();

        let host = *free
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| ProvisionError::AddressPoolExhausted {
                network: self.network(),
            })?;

        self.in_use.insert(host);
        Ok(self.address(host))
    }

    /// Return an address to the pool.
    pub fn release(&mut self, addr: Ipv4Addr) {
        if let Some(host) = self.host_octet(addr) {
            self.in_use.remove(&host);
        }
    }

    pub fn available(&self) -> usize {
        (self.host_min..=self.host_max)
            .filter(|h| !self.in_use.contains(h))
            .count()
    }

    fn network(&self) -> String {
        format!(
            "{}/24 hosts {}-{}",
            self.subnet, self.host_min, self.host_max
        )
    }

    fn address(&self, host: u8) -> Ipv4Addr {
        let [a, b, c, _] = self.subnet.octets();
        Ipv4Addr::new(a, b, c, host)
    }

    fn host_octet(&self, addr: Ipv4Addr) -> Option<u8> {
        let [a, b, c, d] = addr.octets();
        let [sa, sb, sc, _] = self.subnet.octets();
        ((a, b, c) == (sa, sb, sc)).then_some(d)
    }
}

/// Hands out instance ids and addresses for one run.
pub struct IdentityAllocator {
    store: Arc<dyn ProvisioningStore>,
    first_instance_id: i64,
    addresses: AddressPool,
}

impl IdentityAllocator {
    /// Create an allocator whose pool knows every address already recorded.
    ///
    /// If the addresses cannot be read the pool starts empty and a warning is
    /// logged; the run can still proceed.
    pub async fn load(store: Arc<dyn ProvisioningStore>, config: &ProvisioningConfig) -> Self {
        let mut addresses = AddressPool::from_config(config);

        match store.assigned_addresses().await {
            Ok(assigned) => {
                let count = assigned.len();
                addresses.seed(assigned);
                tracing::debug!(
                    assigned = count,
                    available = addresses.available(),
                    "Seeded address pool"
                );
            }
            Err(e) => {
                tracing::warn!("Could not load assigned addresses, pool starts empty: {}", e);
            }
        }

        Self {
            store,
            first_instance_id: config.first_instance_id,
            addresses,
        }
    }

    /// Next id after the highest one in the registry.
    ///
    /// Returns the configured first id when the registry is empty or the
    /// query fails.
    pub async fn next_instance_id(&self) -> i64 {
        match self.store.max_instance_id().await {
            Ok(Some(max)) => max + 1,
            Ok(None) => self.first_instance_id,
            Err(e) => {
                tracing::warn!(
                    "Could not read highest instance id, starting at {}: {}",
                    self.first_instance_id,
                    e
                );
                self.first_instance_id
            }
        }
    }

    /// Reserve the first free id at or above `candidate` for `request_id`.
    pub async fn reserve_instance_id(
        &self,
        candidate: i64,
        request_id: i64,
    ) -> Result<i64, ProvisionError> {
        for offset in 0..MAX_RESERVATION_ATTEMPTS {
            let id = candidate + i64::from(offset);
            if self.store.reserve_instance_id(id, request_id).await? {
                if offset > 0 {
                    tracing::info!(
                        vmid = id,
                        request_id,
                        "Skipped {} taken instance id(s) starting at {}",
                        offset,
                        candidate
                    );
                }
                return Ok(id);
            }
        }

        Err(ProvisionError::IdReservationExhausted {
            first: candidate,
            attempts: MAX_RESERVATION_ATTEMPTS,
        })
    }

    /// Drop a reservation. Errors are logged; a stale reservation only
    /// makes a later run skip that id.
    pub async fn release_instance_id(&self, instance_id: i64) {
        if let Err(e) = self.store.release_instance_id(instance_id).await {
            tracing::warn!(vmid = instance_id, "Failed to release reservation: {}", e);
        }
    }

    pub fn allocate_address(&mut self) -> Result<Ipv4Addr, ProvisionError> {
        self.addresses.allocate()
    }

    pub fn release_address(&mut self, addr: Ipv4Addr) {
        self.addresses.release(addr);
    }

    pub fn available_addresses(&self) -> usize {
        self.addresses.available()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;

    use super::*;
    use crate::store::{InMemoryStore, Instance, MachineState};

    fn instance(instance_id: i64, ip_addr: &str) -> Instance {
        let now = Utc::now();
        Instance {
            instance_id,
            user_id: "u".to_string(),
            request_id: instance_id,
            username: "root".to_string(),
            password: SecretString::from("pw"),
            ip_addr: ip_addr.to_string(),
            machine_state: MachineState::Running,
            create_date: now,
            expire_date: None,
            update_by: "u".to_string(),
            update_date: now,
        }
    }

    #[tokio::test]
    async fn next_id_defaults_on_empty_registry() {
        let store = Arc::new(InMemoryStore::new());
        let alloc = IdentityAllocator::load(store, &ProvisioningConfig::default()).await;
        assert_eq!(alloc.next_instance_id().await, 100);
    }

    #[tokio::test]
    async fn next_id_is_max_plus_one() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_instance(instance(100, "192.168.1.100"));
        store.insert_instance(instance(117, "192.168.1.101"));
        let alloc = IdentityAllocator::load(store, &ProvisioningConfig::default()).await;
        assert_eq!(alloc.next_instance_id().await, 118);
    }

    #[tokio::test]
    async fn next_id_defaults_when_query_fails() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_instance(instance(140, "192.168.1.100"));
        store.fail_max_instance_id();
        let alloc = IdentityAllocator::load(store, &ProvisioningConfig::default()).await;
        assert_eq!(alloc.next_instance_id().await, 100);
    }

    #[tokio::test]
    async fn reservation_skips_taken_ids() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_reservation(100, 99);
        store.insert_reservation(101, 98);
        let alloc = IdentityAllocator::load(store.clone(), &ProvisioningConfig::default()).await;

        assert_eq!(alloc.reserve_instance_id(100, 1).await.unwrap(), 102);
        assert_eq!(store.reservations(), vec![100, 101, 102]);

        alloc.release_instance_id(102).await;
        assert_eq!(store.reservations(), vec![100, 101]);
    }

    #[tokio::test]
    async fn seeded_addresses_are_never_handed_out() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_instance(instance(100, "192.168.1.100"));
        store.insert_instance(instance(101, "192.168.1.101/24"));
        store.insert_instance(instance(102, "Dynamic (Check Dashboard)"));

        let config = ProvisioningConfig {
            host_min: 100,
            host_max: 102,
            ..ProvisioningConfig::default()
        };
        let mut alloc = IdentityAllocator::load(store, &config).await;
        assert_eq!(alloc.available_addresses(), 1);
        assert_eq!(alloc.allocate_address().unwrap(), Ipv4Addr::new(192, 168, 1, 102));
    }

    #[test]
    fn pool_exhaustion_and_release() {
        let mut pool = AddressPool::new(Ipv4Addr::new(10, 0, 5, 0), 10, 12);

        let mut taken: Vec<Ipv4Addr> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        taken.sort();
        assert_eq!(
            taken,
            vec![
                Ipv4Addr::new(10, 0, 5, 10),
                Ipv4Addr::new(10, 0, 5, 11),
                Ipv4Addr::new(10, 0, 5, 12),
            ]
        );

        assert!(matches!(
            pool.allocate(),
            Err(ProvisionError::AddressPoolExhausted { .. })
        ));

        pool.release(Ipv4Addr::new(10, 0, 5, 11));
        assert_eq!(pool.allocate().unwrap(), Ipv4Addr::new(10, 0, 5, 11));
    }

    #[test]
    fn seed_ignores_other_subnets() {
        let mut pool = AddressPool::new(Ipv4Addr::new(192, 168, 1, 0), 100, 101);
        pool.seed([Ipv4Addr::new(192, 168, 2, 100), Ipv4Addr::new(192, 168, 1, 101)]);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.allocate().unwrap(), Ipv4Addr::new(192, 168, 1, 100));
    }
}
