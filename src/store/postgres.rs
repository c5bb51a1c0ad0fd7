//! PostgreSQL implementation of [`ProvisioningStore`].
//!
//! Expected columns (types as read by this module):
//!
//! ```text
//! request_info          request_id BIGINT, user_id TEXT, instant_name TEXT,
//!                       request_status TEXT, is_create BOOLEAN,
//!                       end_datetime TIMESTAMPTZ NULL,
//!                       last_edit_datetime TIMESTAMPTZ,
//!                       instance_os_template_id BIGINT NULL
//! instance_os_template  id BIGINT, os_template_id BIGINT, instance_template_id BIGINT
//! os_template           id BIGINT, image_location TEXT NULL
//! instance_template     id BIGINT, cpu_amount INT, ram_amount INT, storage_amount INT
//! instance_info         instance_id BIGINT, user_id TEXT, request_id BIGINT,
//!                       username TEXT, password TEXT, ip_addr TEXT,
//!                       machine_state TEXT, create_date TIMESTAMPTZ,
//!                       expire_date TIMESTAMPTZ NULL, update_by TEXT,
//!                       update_date TIMESTAMPTZ
//! ```

use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, PoolConfig, Runtime};
use secrecy::ExposeSecret;
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::store::models::{HardwareProfile, Instance, OsTemplate, Request, RequestStatus};
use crate::store::{ProvisioningStore, parse_addresses};

const RESERVATION_MIGRATION: &str =
    include_str!("../../migrations/V1__instance_id_reservation.sql");

/// PostgreSQL-backed store.
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from config and check that a connection can be made.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(config.url.expose_secret().to_string());
        cfg.pool = Some(PoolConfig::new(config.pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Database(format!("failed to create pool: {}", e)))?;

        // Fail at startup rather than on the first query.
        let _conn = pool
            .get()
            .await
            .map_err(|e| StoreError::Database(format!("failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    /// Create the tables this crate owns.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .batch_execute(RESERVATION_MIGRATION)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn client(&self) -> Result<deadpool_postgres::Client, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl ProvisioningStore for PostgresStore {
    async fn pending_requests(&self) -> Result<Vec<Request>, StoreError> {
        let client = self.client().await?;

        let rows = client
            .query(
                r#"
                SELECT r.request_id, r.user_id, r.instant_name, r.request_status,
                       r.is_create, r.end_datetime,
                       it.id AS hardware_id, it.cpu_amount, it.ram_amount, it.storage_amount,
                       ot.id AS os_id, ot.image_location
                FROM request_info r
                LEFT JOIN instance_os_template iot ON iot.id = r.instance_os_template_id
                LEFT JOIN instance_template it ON it.id = iot.instance_template_id
                LEFT JOIN os_template ot ON ot.id = iot.os_template_id
                WHERE r.request_status = 'approved' AND r.is_create = false
                ORDER BY r.request_id
                "#,
                &[],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_request(row) {
                Ok(request) => requests.push(request),
                Err(e) => {
                    let request_id: Option<i64> = row.try_get("request_id").ok();
                    tracing::warn!(?request_id, "Ignoring unreadable request row: {}", e);
                }
            }
        }
        Ok(requests)
    }

    async fn max_instance_id(&self) -> Result<Option<i64>, StoreError> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "SELECT instance_id FROM instance_info ORDER BY instance_id DESC LIMIT 1",
                &[],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(|r| {
            r.try_get::<_, i64>("instance_id")
                .map_err(|e| StoreError::InvalidData(e.to_string()))
        })
        .transpose()
    }

    async fn assigned_addresses(&self) -> Result<Vec<Ipv4Addr>, StoreError> {
        let client = self.client().await?;

        let rows = client
            .query(
                "SELECT ip_addr FROM instance_info WHERE ip_addr IS NOT NULL",
                &[],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let values: Vec<String> = rows
            .iter()
            .filter_map(|r| r.try_get::<_, String>("ip_addr").ok())
            .collect();
        Ok(parse_addresses(values))
    }

    async fn reserve_instance_id(
        &self,
        instance_id: i64,
        request_id: i64,
    ) -> Result<bool, StoreError> {
        let client = self.client().await?;

        let inserted = client
            .execute(
                r#"
                INSERT INTO instance_id_reservation (instance_id, request_id, reserved_at)
                SELECT $1, $2, NOW()
                WHERE NOT EXISTS (SELECT 1 FROM instance_info WHERE instance_id = $1)
                ON CONFLICT (instance_id) DO NOTHING
                "#,
                &[&instance_id, &request_id],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(inserted == 1)
    }

    async fn release_instance_id(&self, instance_id: i64) -> Result<(), StoreError> {
        let client = self.client().await?;

        client
            .execute(
                "DELETE FROM instance_id_reservation WHERE instance_id = $1",
                &[&instance_id],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn record_provisioned(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO instance_info (
                instance_id, user_id, request_id, username, password, ip_addr,
                machine_state, create_date, expire_date, update_by, update_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
            &[
                &instance.instance_id,
                &instance.user_id,
                &instance.request_id,
                &instance.username,
                &instance.expose_password(),
                &instance.ip_addr,
                &instance.machine_state.as_str(),
                &instance.create_date,
                &instance.expire_date,
                &instance.update_by,
                &instance.update_date,
            ],
        )
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let updated = tx
            .execute(
                r#"
                UPDATE request_info
                SET request_status = 'created', is_create = true, last_edit_datetime = $2
                WHERE request_id = $1
                "#,
                &[&instance.request_id, &instance.update_date],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if updated == 0 {
            // Dropping the transaction rolls back the instance insert.
            return Err(StoreError::RequestNotFound(instance.request_id));
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn row_to_request(row: &tokio_postgres::Row) -> Result<Request, StoreError> {
    let invalid = |e: tokio_postgres::Error| StoreError::InvalidData(e.to_string());

    let request_id: i64 = row.try_get("request_id").map_err(invalid)?;

    let hardware_id: Option<i64> = row.try_get("hardware_id").map_err(invalid)?;
    let hardware = match hardware_id {
        Some(_) => hardware_profile(
            request_id,
            row.try_get("cpu_amount").map_err(invalid)?,
            row.try_get("ram_amount").map_err(invalid)?,
            row.try_get("storage_amount").map_err(invalid)?,
        ),
        None => None,
    };

    let os_id: Option<i64> = row.try_get("os_id").map_err(invalid)?;
    let os_template = match os_id {
        Some(_) => Some(OsTemplate {
            image_location: row.try_get("image_location").map_err(invalid)?,
        }),
        None => None,
    };

    let status: String = row.try_get("request_status").map_err(invalid)?;
    let end_datetime: Option<DateTime<Utc>> = row.try_get("end_datetime").map_err(invalid)?;

    Ok(Request {
        request_id,
        user_id: row.try_get("user_id").map_err(invalid)?,
        instant_name: row.try_get("instant_name").map_err(invalid)?,
        status: RequestStatus::from(status.as_str()),
        is_create: row.try_get("is_create").map_err(invalid)?,
        end_datetime,
        hardware,
        os_template,
    })
}

/// Sizes from an `instance_template` row. A NULL or negative amount makes the
/// template unusable, so the request is skipped instead of failing the read.
fn hardware_profile(
    request_id: i64,
    cpu: Option<i32>,
    ram: Option<i32>,
    storage: Option<i32>,
) -> Option<HardwareProfile> {
    let size = |value: Option<i32>| value.and_then(|v| u32::try_from(v).ok());
    let profile = match (size(cpu), size(ram), size(storage)) {
        (Some(cpu), Some(memory_mb), Some(storage_gb)) => Some(HardwareProfile {
            cpu,
            memory_mb,
            storage_gb,
        }),
        _ => None,
    };

    if profile.is_none() {
        tracing::warn!(
            request_id,
            ?cpu,
            ?ram,
            ?storage,
            "Hardware template has missing or negative sizes"
        );
    }
    profile
}
