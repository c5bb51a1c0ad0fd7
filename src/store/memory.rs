//! In-memory [`ProvisioningStore`] for tests and local dry runs.
//!
//! Mirrors the Postgres semantics: reservations and instances share one id
//! space, and recording a provisioned instance is all-or-nothing.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::store::models::{HardwareProfile, Instance, OsTemplate, Request, RequestStatus};
use crate::store::{ProvisioningStore, parse_addresses};

#[derive(Default)]
struct State {
    requests: BTreeMap<i64, Request>,
    instances: BTreeMap<i64, Instance>,
    /// instance_id -> request_id
    reservations: BTreeMap<i64, i64>,
    fail_max_instance_id: bool,
    fail_record_provisioned: bool,
}

/// Datastore held entirely in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Convenience for tests: an approved, not-yet-created request.
    pub fn approved_request(
        request_id: i64,
        name: &str,
        hardware: Option<HardwareProfile>,
        image_location: Option<&str>,
    ) -> Request {
        Request {
            request_id,
            user_id: format!("user-{}", request_id),
            instant_name: name.to_string(),
            status: RequestStatus::Approved,
            is_create: false,
            end_datetime: Some(Utc::now() + chrono::Duration::days(7)),
            hardware,
            os_template: Some(OsTemplate {
                image_location: image_location.map(str::to_string),
            }),
        }
    }

    /// Add or replace a request.
    pub fn insert_request(&self, request: Request) {
        self.state().requests.insert(request.request_id, request);
    }

    /// Add an existing instance (e.g. one provisioned by an earlier run).
    pub fn insert_instance(&self, instance: Instance) {
        self.state().instances.insert(instance.instance_id, instance);
    }

    /// Hold an id as if another run had reserved it.
    pub fn insert_reservation(&self, instance_id: i64, request_id: i64) {
        self.state().reservations.insert(instance_id, request_id);
    }

    /// Make `max_instance_id` fail, simulating an unreachable registry.
    pub fn fail_max_instance_id(&self) {
        self.state().fail_max_instance_id = true;
    }

    /// Make `record_provisioned` fail without writing anything.
    pub fn fail_record_provisioned(&self) {
        self.state().fail_record_provisioned = true;
    }

    pub fn request(&self, request_id: i64) -> Option<Request> {
        self.state().requests.get(&request_id).cloned()
    }

    /// All instances, ordered by id.
    pub fn instances(&self) -> Vec<Instance> {
        self.state().instances.values().cloned().collect()
    }

    /// Reserved ids, ordered.
    pub fn reservations(&self) -> Vec<i64> {
        self.state().reservations.keys().copied().collect()
    }
}

#[async_trait]
impl ProvisioningStore for InMemoryStore {
    async fn pending_requests(&self) -> Result<Vec<Request>, StoreError> {
        Ok(self
            .state()
            .requests
            .values()
            .filter(|r| r.is_eligible())
            .cloned()
            .collect())
    }

    async fn max_instance_id(&self) -> Result<Option<i64>, StoreError> {
        let state = self.state();
        if state.fail_max_instance_id {
            return Err(StoreError::Database("instance_info unavailable".to_string()));
        }
        Ok(state.instances.keys().next_back().copied())
    }

    async fn assigned_addresses(&self) -> Result<Vec<Ipv4Addr>, StoreError> {
        Ok(parse_addresses(
            self.state().instances.values().map(|i| i.ip_addr.clone()),
        ))
    }

    async fn reserve_instance_id(
        &self,
        instance_id: i64,
        request_id: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        if state.instances.contains_key(&instance_id)
            || state.reservations.contains_key(&instance_id)
        {
            return Ok(false);
        }
        state.reservations.insert(instance_id, request_id);
        Ok(true)
    }

    async fn release_instance_id(&self, instance_id: i64) -> Result<(), StoreError> {
        self.state().reservations.remove(&instance_id);
        Ok(())
    }

    async fn record_provisioned(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_record_provisioned {
            return Err(StoreError::Database("write rejected".to_string()));
        }
        if state.instances.contains_key(&instance.instance_id) {
            return Err(StoreError::Database(format!(
                "duplicate key instance_id={}",
                instance.instance_id
            )));
        }

        let request = state
            .requests
            .get_mut(&instance.request_id)
            .ok_or(StoreError::RequestNotFound(instance.request_id))?;
        request.status = RequestStatus::Created;
        request.is_create = true;

        state
            .instances
            .insert(instance.instance_id, instance.clone());
        Ok(())
    }
}
