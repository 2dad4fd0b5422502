//! Per-request provisioning parameters.
//!
//! Parsed once per request into an immutable value and passed by argument
//! through the whole create path. Nothing here is shared between requests,
//! so concurrent creates cannot observe each other's overrides.

use serde::Deserialize;
use thiserror::Error;
use validator::Validate;

use crate::gateway::FinalSnapshotPolicy;
use crate::model::ResourceKind;

/// Upper bound on the serialized parameter payload.
pub const MAX_PARAMETERS_BYTES: usize = 2048;
/// Largest allowed member count for multi-node kinds.
pub const MAX_NODE_COUNT: i64 = 3;

pub const DEFAULT_STORAGE_GB: i64 = 5;
pub const DEFAULT_RETENTION_DAYS: i64 = 7;
pub const DEFAULT_NODE_COUNT: i64 = 1;
pub const DEFAULT_RELATIONAL_ENGINE: &str = "mariadb";
pub const DOCUMENT_ENGINE: &str = "docdb";
pub const DEFAULT_DATABASE_NAME: &str = "db";

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("the given parameter payload is larger than {MAX_PARAMETERS_BYTES} bytes ({0})")]
    TooLarge(usize),

    #[error("failed to parse request parameters: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid request parameters: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Caller-supplied provisioning overrides; every field optional.
///
/// `MakeFinalSnapshot` is tri-state: absence means "take one", an explicit
/// `false` skips it.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProvisionParams {
    #[serde(rename = "AuthorizedAccount", default)]
    pub authorized_account: Option<String>,

    #[serde(rename = "RetentionDays", default)]
    #[validate(range(min = 1, max = 35))]
    pub retention_days: Option<i64>,

    #[serde(rename = "KeepBackups", default)]
    pub keep_backups: bool,

    #[serde(rename = "AllocatedStorageGB", default)]
    #[validate(range(min = 5, max = 1024))]
    pub allocated_storage_gb: Option<i64>,

    #[serde(rename = "Engine", default)]
    pub engine: Option<String>,

    #[serde(rename = "DatabaseName", default)]
    pub database_name: Option<String>,

    #[serde(rename = "MultiZone", default)]
    pub multi_zone: bool,

    #[serde(rename = "MakeFinalSnapshot", default)]
    pub make_final_snapshot: Option<bool>,

    #[serde(rename = "AutoMinorVersionUpgrade", default)]
    pub auto_minor_version_upgrade: Option<bool>,

    #[serde(rename = "NodeCount", default)]
    #[validate(range(min = 1, max = 3))]
    pub node_count: Option<i64>,

    #[serde(rename = "RestoreFromSnapshot", default)]
    pub restore_from_snapshot: Option<String>,
}

impl ProvisionParams {
    /// Parse and validate the raw parameter payload of a request.
    pub fn from_raw(raw: &str) -> Result<Self, ParamsError> {
        if raw.len() > MAX_PARAMETERS_BYTES {
            return Err(ParamsError::TooLarge(raw.len()));
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::default());
        }
        let params: Self = serde_json::from_str(trimmed)?;
        params.validate()?;
        Ok(params)
    }

    /// Engine for the resource kind; document stores have a fixed engine.
    pub fn engine_for(&self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::Document => DOCUMENT_ENGINE.to_string(),
            ResourceKind::Relational => self
                .engine
                .clone()
                .unwrap_or_else(|| DEFAULT_RELATIONAL_ENGINE.to_string()),
        }
    }

    /// Master username convention per engine.
    pub fn username_for(engine: &str) -> &'static str {
        match engine {
            "postgres" => "postgres",
            DOCUMENT_ENGINE => "docdbadmin",
            _ => "admin",
        }
    }

    pub fn allocated_storage_gb(&self) -> i64 {
        self.allocated_storage_gb.unwrap_or(DEFAULT_STORAGE_GB)
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS)
    }

    pub fn node_count(&self) -> i64 {
        self.node_count.unwrap_or(DEFAULT_NODE_COUNT)
    }

    pub fn database_name(&self) -> &str {
        self.database_name.as_deref().unwrap_or(DEFAULT_DATABASE_NAME)
    }

    pub fn auto_minor_version_upgrade(&self) -> bool {
        self.auto_minor_version_upgrade.unwrap_or(true)
    }

    pub fn skip_final_snapshot(&self) -> bool {
        self.make_final_snapshot == Some(false)
    }

    /// The snapshot policy for a delete of the given backing resource.
    pub fn final_snapshot_policy(&self, provider_id: &str) -> FinalSnapshotPolicy {
        if self.skip_final_snapshot() {
            FinalSnapshotPolicy::Skip
        } else {
            FinalSnapshotPolicy::Take {
                snapshot_id: provider_id.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_and_null_payloads_yield_defaults() {
        for raw in ["", "  ", "null", "{}"] {
            let params = ProvisionParams::from_raw(raw).unwrap();
            assert_eq!(params.allocated_storage_gb(), DEFAULT_STORAGE_GB);
            assert_eq!(params.retention_days(), DEFAULT_RETENTION_DAYS);
            assert_eq!(params.node_count(), DEFAULT_NODE_COUNT);
            assert!(!params.skip_final_snapshot());
        }
    }

    #[test]
    fn overrides_are_honored() {
        let params = ProvisionParams::from_raw(
            r#"{
                "AllocatedStorageGB": 20,
                "Engine": "postgres",
                "RetentionDays": 14,
                "MultiZone": true,
                "MakeFinalSnapshot": false,
                "AuthorizedAccount": "123456789012"
            }"#,
        )
        .unwrap();
        assert_eq!(params.allocated_storage_gb(), 20);
        assert_eq!(params.engine_for(ResourceKind::Relational), "postgres");
        assert_eq!(params.retention_days(), 14);
        assert!(params.multi_zone);
        assert!(params.skip_final_snapshot());
        assert_eq!(params.authorized_account.as_deref(), Some("123456789012"));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let raw = format!(r#"{{"DatabaseName": "{}"}}"#, "x".repeat(MAX_PARAMETERS_BYTES));
        let err = ProvisionParams::from_raw(&raw).unwrap_err();
        assert!(matches!(err, ParamsError::TooLarge(_)));
    }

    #[test]
    fn node_count_above_cap_is_rejected() {
        let err = ProvisionParams::from_raw(r#"{"NodeCount": 4}"#).unwrap_err();
        assert!(matches!(err, ParamsError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = ProvisionParams::from_raw(r#"{"Engine": }"#).unwrap_err();
        assert!(matches!(err, ParamsError::Parse(_)));
    }

    #[test]
    fn document_kind_ignores_engine_override() {
        let params = ProvisionParams::from_raw(r#"{"Engine": "postgres"}"#).unwrap();
        assert_eq!(params.engine_for(ResourceKind::Document), DOCUMENT_ENGINE);
    }

    #[rstest]
    #[case("postgres", "postgres")]
    #[case("docdb", "docdbadmin")]
    #[case("mariadb", "admin")]
    #[case("mysql", "admin")]
    fn username_convention(#[case] engine: &str, #[case] expected: &str) {
        assert_eq!(ProvisionParams::username_for(engine), expected);
    }

    #[test]
    fn final_snapshot_policy_defaults_to_take() {
        let params = ProvisionParams::default();
        assert_eq!(
            params.final_snapshot_policy("ds-a"),
            FinalSnapshotPolicy::Take {
                snapshot_id: "ds-a".to_string()
            }
        );

        let params = ProvisionParams::from_raw(r#"{"MakeFinalSnapshot": false}"#).unwrap();
        assert_eq!(params.final_snapshot_policy("ds-a"), FinalSnapshotPolicy::Skip);
    }
}
