//! Event store configuration.
//!
//! Table layout and read consistency for an [`EventStore`](crate::EventStore),
//! loadable from YAML files and environment variables.

use serde::Deserialize;

use crate::storage::{Consistency, TableSchema, PAYLOAD_ATTRIBUTE, VERSION_ATTRIBUTE};


/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "eventstore.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "EVENTSTORE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "EVENTSTORE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "EVENTSTORE_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Event store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Table holding commits and snapshots.
    pub table_name: String,
    /// Partition key attribute (aggregate id).
    pub partition_key_name: String,
    /// Sort key attribute (version).
    pub sort_key_name: String,
    /// Use strongly consistent reads for snapshot reads and commit queries.
    pub consistent_read: bool,
    /// Snapshot enable/disable flags.
    pub snapshots: SnapshotsEnableConfig,
    /// DynamoDB client settings.
    pub dynamo: DynamoConfig,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            table_name: "EventStore".to_string(),
            partition_key_name: "PK".to_string(),
            sort_key_name: "SK".to_string(),
            consistent_read: false,
            snapshots: SnapshotsEnableConfig::default(),
            dynamo: DynamoConfig::default(),
        }
    }
}

/// Snapshot enable/disable configuration.
///
/// These apply on top of each aggregate's own snapshot hooks and are mostly
/// useful when troubleshooting snapshot contents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapshotsEnableConfig {
    /// Read snapshots on load. When false, every load replays all commits.
    /// Default: true
    pub read: bool,
    /// Write snapshots after save when the aggregate asks for one.
    /// Default: true
    pub write: bool,
}

impl Default for SnapshotsEnableConfig {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

/// DynamoDB client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    /// Endpoint override, e.g. `http://localhost:8000` for DynamoDB Local.
    pub endpoint_url: Option<String>,
    /// Region override. Falls back to the AWS default provider chain.
    pub region: Option<String>,
}

impl EventStoreConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `eventstore.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, e.g.
    ///    `EVENTSTORE__TABLE_NAME` or `EVENTSTORE__SNAPSHOTS__READ`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EventStoreConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_key_names(
        mut self,
        partition_key_name: impl Into<String>,
        sort_key_name: impl Into<String>,
    ) -> Self {
        self.partition_key_name = partition_key_name.into();
        self.sort_key_name = sort_key_name.into();
        self
    }

    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = consistent_read;
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotsEnableConfig) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Check that table and key names are usable and do not collide with
    /// the payload or version attributes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = [
            ("table_name", &self.table_name),
            ("partition_key_name", &self.partition_key_name),
            ("sort_key_name", &self.sort_key_name),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        if self.partition_key_name == self.sort_key_name {
            return Err(ConfigError::Invalid(format!(
                "partition and sort key must differ (both are {})",
                self.sort_key_name
            )));
        }
        for (field, value) in &names[1..] {
            if *value == PAYLOAD_ATTRIBUTE || *value == VERSION_ATTRIBUTE {
                return Err(ConfigError::Invalid(format!(
                    "{field} must not be a reserved attribute name ({value})"
                )));
            }
        }
        Ok(())
    }

    pub fn consistency(&self) -> Consistency {
        if self.consistent_read {
            Consistency::Strong
        } else {
            Consistency::Eventual
        }
    }

    pub fn table(&self) -> TableSchema<'_> {
        TableSchema {
            table_name: &self.table_name,
            partition_key: &self.partition_key_name,
            sort_key: &self.sort_key_name,
        }
    }
}
