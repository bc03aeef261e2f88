//! SurrealDB connection setup
//!
//! Supports in-memory (tests), local `surrealkv://` files, an explicit
//! `SURREALDB_URL`, and authenticated cloud endpoints. Every connection has
//! the scoreboard schema initialised before it is handed out.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "scoreboard";
const DEFAULT_DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".scoreboard/db";

/// Configuration for an authenticated SurrealDB connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "scoreboard")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "scoreboard")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, String> {
        let required = |key: &str| var(key).ok_or_else(|| format!("{key} not set"));
        let mut config = Self::new(
            required("SURREALDB_ENDPOINT")?,
            required("SURREALDB_USERNAME")?,
            required("SURREALDB_PASSWORD")?,
        );
        if let Some(namespace) = var("SURREALDB_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(database) = var("SURREALDB_DATABASE") {
            config.database = database;
        }
        config.is_root = var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        Ok(config)
    }
}

/// Connect to `url`, select the default namespace/database and init the schema.
#[instrument(skip_all, fields(url = %url))]
pub(crate) async fn connect_url(url: &str) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

    db.use_ns(DEFAULT_NAMESPACE)
        .use_db(DEFAULT_DATABASE)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    Ok(db)
}

/// Connect to an authenticated endpoint described by `config`.
#[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
pub(crate) async fn connect_cloud(config: &CloudConfig) -> Result<Surreal<Any>> {
    info!("Connecting to SurrealDB (root={})", config.is_root);

    let db = surrealdb::engine::any::connect(&config.endpoint)
        .await
        .map_err(|e| {
            StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
        })?;

    if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("Root authentication failed: {}", e)))?;
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("Database authentication failed: {}", e)))?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| {
            StateError::Connection(format!("Failed to select namespace/database: {}", e))
        })?;

    migrations::init_schema(&db).await?;
    Ok(db)
}

/// Connect using environment variables
///
/// If SURREALDB_ENDPOINT (and credentials) are set, connects with auth.
/// If SURREALDB_URL is set, connects to that URL.
/// Otherwise, falls back to local persistence under `.scoreboard/db`.
#[instrument(skip_all)]
pub(crate) async fn connect_from_env() -> Result<Surreal<Any>> {
    if let Ok(config) = CloudConfig::from_env() {
        info!("Cloud config found, connecting to {}", config.endpoint);
        return connect_cloud(&config).await;
    }

    if let Ok(url) = std::env::var("SURREALDB_URL") {
        info!("SURREALDB_URL found, connecting to {}", url);
        return connect_url(&url).await;
    }

    std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
        StateError::Connection(format!(
            "Failed to create database directory {}: {}",
            DEFAULT_LOCAL_PATH, e
        ))
    })?;
    let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
    info!(
        "No cloud config or SURREALDB_URL found, using local persistence: {}",
        url
    );
    connect_url(&url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_cloud_config_defaults() {
        let config = CloudConfig::new("ws://localhost:8000", "scorer", "secret");
        assert_eq!(config.namespace, "scoreboard");
        assert_eq!(config.database, "main");
        assert!(!config.is_root);
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_cloud_config_overrides_from_vars() {
        let env = vars(&[
            ("SURREALDB_ENDPOINT", "wss://scores.example"),
            ("SURREALDB_USERNAME", "root"),
            ("SURREALDB_PASSWORD", "root"),
            ("SURREALDB_NAMESPACE", "finals"),
            ("SURREALDB_DATABASE", "day2"),
            ("SURREALDB_ROOT", "TRUE"),
        ]);
        let config = CloudConfig::from_vars(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.endpoint, "wss://scores.example");
        assert_eq!(config.namespace, "finals");
        assert_eq!(config.database, "day2");
        assert!(config.is_root);
    }

    #[test]
    fn test_cloud_config_requires_credentials() {
        let env = vars(&[("SURREALDB_ENDPOINT", "ws://localhost:8000")]);
        let err = CloudConfig::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert_eq!(err, "SURREALDB_USERNAME not set");

        let env = vars(&[
            ("SURREALDB_ENDPOINT", "ws://localhost:8000"),
            ("SURREALDB_USERNAME", "scorer"),
            ("SURREALDB_PASSWORD", "secret"),
        ]);
        let config = CloudConfig::from_vars(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.namespace, "scoreboard");
        assert!(!config.is_root);
    }
}
