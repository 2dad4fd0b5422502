//! Postgres-backed registry.
//!
//! Row shapes mirror the registry tables in `migrations/`. Secret fields are
//! encrypted before hitting the wire and decrypted on read, so plaintext
//! secrets never persist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mdsb_id::ResourceId;
use sqlx::{postgres::PgRow, PgPool, QueryBuilder, Row};

use crate::model::{
    ClaimFilter, ClaimRecord, ClaimStatus, ResourceKind, ResourceRecord, ResourceStatus,
};
use crate::secrets;

use super::{DbError, Registry};

/// Registry implementation over a Postgres pool.
#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Registry for PgRegistry {
    async fn insert_resource(&self, resource: &ResourceRecord) -> Result<(), DbError> {
        let password = encrypt_secret(resource.service_password.as_deref())?;
        sqlx::query(
            r#"
            INSERT INTO physical_resources (
                resource_id, provider_id, kind, engine, status,
                last_status_update, last_message, endpoint_host, endpoint_port,
                database_name, service_user, service_password
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(resource.id.to_string())
        .bind(&resource.provider_id)
        .bind(resource.kind.as_str())
        .bind(&resource.engine)
        .bind(resource.status.as_str())
        .bind(resource.last_status_update)
        .bind(&resource.last_message)
        .bind(&resource.endpoint_host)
        .bind(resource.endpoint_port)
        .bind(&resource.database_name)
        .bind(&resource.service_user)
        .bind(password)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn update_resource(&self, resource: &ResourceRecord) -> Result<(), DbError> {
        let password = encrypt_secret(resource.service_password.as_deref())?;
        sqlx::query(
            r#"
            UPDATE physical_resources
            SET provider_id = $2,
                kind = $3,
                engine = $4,
                status = $5,
                last_status_update = $6,
                last_message = $7,
                endpoint_host = $8,
                endpoint_port = $9,
                database_name = $10,
                service_user = $11,
                service_password = $12
            WHERE resource_id = $1
            "#,
        )
        .bind(resource.id.to_string())
        .bind(&resource.provider_id)
        .bind(resource.kind.as_str())
        .bind(&resource.engine)
        .bind(resource.status.as_str())
        .bind(resource.last_status_update)
        .bind(&resource.last_message)
        .bind(&resource.endpoint_host)
        .bind(resource.endpoint_port)
        .bind(&resource.database_name)
        .bind(&resource.service_user)
        .bind(password)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<ResourceRecord>, DbError> {
        let row = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT resource_id, provider_id, kind, engine, status,
                   last_status_update, last_message, endpoint_host, endpoint_port,
                   database_name, service_user, service_password
            FROM physical_resources
            WHERE resource_id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(ResourceRow::into_record).transpose()
    }

    async fn insert_claim(&self, claim: &ClaimRecord) -> Result<i64, DbError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO logical_instances (
                instance_id, service_id, plan_id, parameters, foundation,
                organization_name, space_name, instance_name, resource_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&claim.instance_id)
        .bind(&claim.service_id)
        .bind(&claim.plan_id)
        .bind(&claim.parameters)
        .bind(&claim.foundation)
        .bind(&claim.organization)
        .bind(&claim.space)
        .bind(&claim.name)
        .bind(claim.resource_id.to_string())
        .bind(claim.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(id)
    }

    async fn update_claim(&self, claim: &ClaimRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE logical_instances
            SET instance_id = $2,
                service_id = $3,
                plan_id = $4,
                parameters = $5,
                foundation = $6,
                organization_name = $7,
                space_name = $8,
                instance_name = $9,
                resource_id = $10,
                status = $11
            WHERE id = $1
            "#,
        )
        .bind(claim.id)
        .bind(&claim.instance_id)
        .bind(&claim.service_id)
        .bind(&claim.plan_id)
        .bind(&claim.parameters)
        .bind(&claim.foundation)
        .bind(&claim.organization)
        .bind(&claim.space)
        .bind(&claim.name)
        .bind(claim.resource_id.to_string())
        .bind(claim.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn find_claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, DbError> {
        let mut qb = QueryBuilder::new(
            r#"
            SELECT c.id, c.instance_id, c.service_id, c.plan_id, c.parameters,
                   c.foundation, c.organization_name, c.space_name, c.instance_name,
                   c.resource_id, c.status
            FROM logical_instances c
            JOIN physical_resources r ON r.resource_id = c.resource_id
            WHERE 1 = 1
            "#,
        );

        if let Some(instance_id) = &filter.instance_id {
            qb.push(" AND c.instance_id = ").push_bind(instance_id);
        }
        if let Some(organization) = &filter.organization {
            qb.push(" AND c.organization_name = ").push_bind(organization);
        }
        if let Some(space) = &filter.space {
            qb.push(" AND c.space_name = ").push_bind(space);
        }
        if let Some(name) = &filter.name {
            qb.push(" AND c.instance_name = ").push_bind(name);
        }
        if let Some(foundation) = &filter.foundation {
            qb.push(" AND c.foundation = ").push_bind(foundation);
        }
        if let Some(status) = filter.status {
            qb.push(" AND c.status = ").push_bind(status.as_str());
        }
        if let Some(resource_status) = filter.resource_status {
            qb.push(" AND r.status = ").push_bind(resource_status.as_str());
        }
        if let Some(resource_id) = filter.resource_id {
            qb.push(" AND c.resource_id = ").push_bind(resource_id.to_string());
        }
        qb.push(" ORDER BY c.id");

        let rows = qb
            .build_query_as::<ClaimRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        rows.into_iter().map(ClaimRow::into_record).collect()
    }

    async fn delete_claim(&self, instance_id: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM logical_instances WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    async fn count_references(&self, resource_id: ResourceId) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM logical_instances WHERE resource_id = $1")
                .bind(resource_id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::Query)?;
        Ok(count)
    }

    async fn set_claim_status_for_resource(
        &self,
        resource_id: ResourceId,
        status: ClaimStatus,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE logical_instances SET status = $2 WHERE resource_id = $1")
            .bind(resource_id.to_string())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}

fn encrypt_secret(plaintext: Option<&str>) -> Result<Option<String>, DbError> {
    plaintext
        .map(|p| secrets::encrypt_field(p).map_err(DbError::from))
        .transpose()
}

fn decrypt_secret(stored: Option<String>) -> Result<Option<String>, DbError> {
    stored
        .map(|s| secrets::decrypt_field(&s).map_err(DbError::from))
        .transpose()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug)]
struct ResourceRow {
    resource_id: String,
    provider_id: String,
    kind: String,
    engine: String,
    status: String,
    last_status_update: DateTime<Utc>,
    last_message: String,
    endpoint_host: Option<String>,
    endpoint_port: Option<i32>,
    database_name: Option<String>,
    service_user: Option<String>,
    service_password: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ResourceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            resource_id: row.try_get("resource_id")?,
            provider_id: row.try_get("provider_id")?,
            kind: row.try_get("kind")?,
            engine: row.try_get("engine")?,
            status: row.try_get("status")?,
            last_status_update: row.try_get("last_status_update")?,
            last_message: row.try_get("last_message")?,
            endpoint_host: row.try_get("endpoint_host")?,
            endpoint_port: row.try_get("endpoint_port")?,
            database_name: row.try_get("database_name")?,
            service_user: row.try_get("service_user")?,
            service_password: row.try_get("service_password")?,
        })
    }
}

impl ResourceRow {
    fn into_record(self) -> Result<ResourceRecord, DbError> {
        let id = ResourceId::parse(&self.resource_id)
            .map_err(|e| DbError::Decode(format!("resource_id '{}': {e}", self.resource_id)))?;
        let kind = ResourceKind::parse(&self.kind)
            .ok_or_else(|| DbError::Decode(format!("unknown resource kind '{}'", self.kind)))?;
        let status = ResourceStatus::parse(&self.status)
            .ok_or_else(|| DbError::Decode(format!("unknown resource status '{}'", self.status)))?;
        let service_password = decrypt_secret(self.service_password)?;

        Ok(ResourceRecord {
            id,
            provider_id: self.provider_id,
            kind,
            engine: self.engine,
            status,
            last_status_update: self.last_status_update,
            last_message: self.last_message,
            endpoint_host: self.endpoint_host,
            endpoint_port: self.endpoint_port,
            database_name: self.database_name,
            service_user: self.service_user,
            service_password,
        })
    }
}

#[derive(Debug)]
struct ClaimRow {
    id: i64,
    instance_id: String,
    service_id: String,
    plan_id: String,
    parameters: String,
    foundation: String,
    organization_name: String,
    space_name: String,
    instance_name: String,
    resource_id: String,
    status: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ClaimRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            service_id: row.try_get("service_id")?,
            plan_id: row.try_get("plan_id")?,
            parameters: row.try_get("parameters")?,
            foundation: row.try_get("foundation")?,
            organization_name: row.try_get("organization_name")?,
            space_name: row.try_get("space_name")?,
            instance_name: row.try_get("instance_name")?,
            resource_id: row.try_get("resource_id")?,
            status: row.try_get("status")?,
        })
    }
}

impl ClaimRow {
    fn into_record(self) -> Result<ClaimRecord, DbError> {
        let resource_id = ResourceId::parse(&self.resource_id)
            .map_err(|e| DbError::Decode(format!("resource_id '{}': {e}", self.resource_id)))?;
        let status = ClaimStatus::parse(&self.status)
            .ok_or_else(|| DbError::Decode(format!("unknown claim status '{}'", self.status)))?;

        Ok(ClaimRecord {
            id: self.id,
            instance_id: self.instance_id,
            service_id: self.service_id,
            plan_id: self.plan_id,
            parameters: self.parameters,
            foundation: self.foundation,
            organization: self.organization_name,
            space: self.space_name,
            name: self.instance_name,
            resource_id,
            status,
        })
    }
}
