use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::db::DbConfig;
use crate::model::ResourceKind;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    /// Identifier of the local tenant environment this process serves.
    pub foundation: String,
    pub catalog_dir: PathBuf,
    /// Which provider gateway to wire: currently only "sim".
    pub provider: String,
    pub poll_interval: Duration,
    pub database: DbConfig,
    pub classes: ClassTables,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("MDSB_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("MDSB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("MDSB_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let Ok(foundation) = std::env::var("MDSB_FOUNDATION") else {
            bail!("missing required environment variable MDSB_FOUNDATION");
        };

        let catalog_dir = std::env::var("MDSB_CATALOG_DIR")
            .unwrap_or_else(|_| "catalog".to_string())
            .into();

        let provider = std::env::var("MDSB_PROVIDER").unwrap_or_else(|_| "sim".to_string());

        let poll_interval = match std::env::var("MDSB_POLL_INTERVAL_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse()?),
            Err(_) => Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        };

        let database = DbConfig::from_env();
        let classes = ClassTables::from_env();

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            foundation,
            catalog_dir,
            provider,
            poll_interval,
            database,
            classes,
        })
    }
}

/// Per-kind plan-name → provider-class tables.
///
/// A plan name missing from its table is a fatal configuration error for
/// the request that referenced it.
#[derive(Debug, Clone)]
pub struct ClassTables {
    relational: HashMap<String, String>,
    document: HashMap<String, String>,
}

impl Default for ClassTables {
    fn default() -> Self {
        let relational = [
            ("micro", "db.t3.micro"),
            ("small", "db.t3.small"),
            ("medium", "db.t3.medium"),
        ];
        let document = [
            ("micro", "db.t3.medium"),
            ("small", "db.r5.large"),
            ("medium", "db.r5.xlarge"),
        ];
        Self {
            relational: to_map(&relational),
            document: to_map(&document),
        }
    }
}

impl ClassTables {
    /// Load overrides from `MDSB_RELATIONAL_CLASSES` / `MDSB_DOCUMENT_CLASSES`
    /// ("plan=class,plan=class"); defaults apply when unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let relational = std::env::var("MDSB_RELATIONAL_CLASSES")
            .map(|raw| parse_table(&raw))
            .unwrap_or(defaults.relational);
        let document = std::env::var("MDSB_DOCUMENT_CLASSES")
            .map(|raw| parse_table(&raw))
            .unwrap_or(defaults.document);
        Self {
            relational,
            document,
        }
    }

    pub fn class_for(&self, kind: ResourceKind, plan_name: &str) -> Option<&str> {
        let table = match kind {
            ResourceKind::Relational => &self.relational,
            ResourceKind::Document => &self.document,
        };
        table.get(plan_name).map(String::as_str)
    }
}

fn to_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_table(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (plan, class) = pair.split_once('=')?;
            Some((plan.trim().to_string(), class.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_class_tables_cover_known_plans() {
        let classes = ClassTables::default();
        assert_eq!(
            classes.class_for(ResourceKind::Relational, "micro"),
            Some("db.t3.micro")
        );
        assert_eq!(
            classes.class_for(ResourceKind::Document, "small"),
            Some("db.r5.large")
        );
        assert_eq!(classes.class_for(ResourceKind::Relational, "huge"), None);
    }

    #[test]
    fn class_table_parsing() {
        let table = parse_table("micro=db.t4g.micro, small = db.t4g.small");
        assert_eq!(table.get("micro").map(String::as_str), Some("db.t4g.micro"));
        assert_eq!(table.get("small").map(String::as_str), Some("db.t4g.small"));
    }
}
