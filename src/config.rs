//! Server configuration from command-line flags and `DATAVIS_*` variables.

use crate::insights::{AnomalyMethod, InsightsConfig};
use crate::schema::SchemaConfig;
use crate::store::{DuplicatePolicy, StoreConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_IDLE_MINUTES: u64 = 30;
const DEFAULT_PURGE_SECS: u64 = 60;
const DEFAULT_UPLOAD_MB: usize = 50;

/// Command-line arguments of the web server
#[derive(Debug, Clone, Parser)]
#[command(name = "datavis-server")]
#[command(about = "Upload tabular data, explore it and get data-quality insights")]
#[command(version)]
pub struct ServerConfig {
    /// Host address to bind to
    #[arg(long, env = "DATAVIS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind to
    #[arg(long, env = "DATAVIS_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding users.json and table snapshots
    #[arg(long, env = "DATAVIS_DATA_DIR", default_value = "database")]
    pub data_dir: PathBuf,

    /// Session inactivity timeout in minutes
    #[arg(long, env = "DATAVIS_SESSION_IDLE_MINUTES", default_value_t = DEFAULT_IDLE_MINUTES)]
    pub session_idle_minutes: u64,

    /// Interval between expired-session sweeps, in seconds
    #[arg(long, env = "DATAVIS_SESSION_PURGE_SECS", default_value_t = DEFAULT_PURGE_SECS)]
    pub session_purge_secs: u64,

    /// Maximum upload size in megabytes
    #[arg(long, env = "DATAVIS_UPLOAD_LIMIT_MB", default_value_t = DEFAULT_UPLOAD_MB)]
    pub upload_limit_mb: usize,

    /// Largest page size a client may request
    #[arg(long, env = "DATAVIS_MAX_PAGE_SIZE", default_value_t = 500)]
    pub max_page_size: usize,

    /// What an upload does when the table name is taken
    #[arg(long, env = "DATAVIS_DUPLICATE_POLICY", value_enum, default_value_t = DuplicatePolicy::Reject)]
    pub duplicate_policy: DuplicatePolicy,

    /// CORS allowed origins (comma-separated, `*` for any)
    #[arg(long, env = "DATAVIS_CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,

    /// Standard deviations beyond which a numeric value is an anomaly
    /// (`leave-one-out` method)
    #[arg(long, env = "DATAVIS_ANOMALY_K", default_value_t = 2.0)]
    pub anomaly_k: f64,

    /// Outlier rule for numeric columns
    #[arg(long, env = "DATAVIS_ANOMALY_METHOD", value_enum, default_value_t = AnomalyMethod::ModifiedZScore)]
    pub anomaly_method: AnomalyMethod,

    /// Modified z-score beyond which a numeric value is an anomaly
    #[arg(long, env = "DATAVIS_ANOMALY_Z_THRESHOLD", default_value_t = 3.5)]
    pub anomaly_z_threshold: f64,

    /// Distinct-to-rows ratio under which a text column is categorical
    #[arg(long, env = "DATAVIS_CATEGORICAL_RATIO", default_value_t = 0.7)]
    pub categorical_ratio: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("database"),
            session_idle_minutes: DEFAULT_IDLE_MINUTES,
            session_purge_secs: DEFAULT_PURGE_SECS,
            upload_limit_mb: DEFAULT_UPLOAD_MB,
            max_page_size: StoreConfig::default().max_page_size,
            duplicate_policy: DuplicatePolicy::Reject,
            cors_origin: "*".to_string(),
            anomaly_k: InsightsConfig::default().anomaly_k,
            anomaly_method: AnomalyMethod::ModifiedZScore,
            anomaly_z_threshold: InsightsConfig::default().modified_z_threshold,
            categorical_ratio: SchemaConfig::default().categorical_ratio,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join("tables")
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_minutes * 60)
    }

    pub fn session_purge_interval(&self) -> Duration {
        Duration::from_secs(self.session_purge_secs.max(1))
    }

    pub fn upload_limit_bytes(&self) -> usize {
        self.upload_limit_mb * 1024 * 1024
    }

    pub fn schema_config(&self) -> SchemaConfig {
        SchemaConfig {
            categorical_ratio: self.categorical_ratio,
            ..SchemaConfig::default()
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            duplicate_policy: self.duplicate_policy,
            max_page_size: self.max_page_size,
        }
    }

    pub fn insights_config(&self) -> InsightsConfig {
        InsightsConfig {
            anomaly_k: self.anomaly_k,
            anomaly_method: self.anomaly_method,
            modified_z_threshold: self.anomaly_z_threshold,
            ..InsightsConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = ServerConfig::parse_from([
            "datavis-server",
            "--port",
            "8080",
            "--duplicate-policy",
            "replace",
            "--anomaly-method",
            "iqr-fence",
            "--data-dir",
            "/tmp/datavis",
        ]);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.store_config().duplicate_policy, DuplicatePolicy::Replace);
        assert_eq!(config.insights_config().anomaly_method, AnomalyMethod::IqrFence);
        assert_eq!(config.users_file(), PathBuf::from("/tmp/datavis/users.json"));
    }

    #[test]
    fn test_derived_settings() {
        let config = ServerConfig::default();
        assert_eq!(config.session_idle_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.upload_limit_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.schema_config().max_categories, 50);
        assert_eq!(config.insights_config().anomaly_k, 2.0);
        assert_eq!(config.insights_config().anomaly_method, AnomalyMethod::ModifiedZScore);
        assert_eq!(config.insights_config().modified_z_threshold, 3.5);
    }
}
