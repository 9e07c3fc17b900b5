//! Broker configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node-level configuration for the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Host advertised in credentials for shared instances
    pub host: String,
    /// Root holding one directory per shared instance (e.g., /var/vcap/store/redis)
    pub instance_data_directory: PathBuf,
    /// Root holding one log directory per shared instance
    pub instance_log_directory: PathBuf,
    /// Template redis.conf copied into every new instance
    pub default_config_path: PathBuf,
    /// Name or path of the redis-server executable
    pub redis_server_executable: String,
    /// Maximum number of shared instances on this node
    pub service_instance_limit: usize,
    /// How long provisioning waits for a new server to accept connections
    pub start_redis_timeout_secs: u64,
    /// Where snapshot artifacts are written
    pub backup_directory: PathBuf,
    /// How long a snapshot waits for the background save to finish
    pub backup_timeout_secs: u64,
    pub dedicated: DedicatedConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            instance_data_directory: PathBuf::from("/var/vcap/store/redis"),
            instance_log_directory: PathBuf::from("/var/vcap/sys/log/redis"),
            default_config_path: PathBuf::from("/var/vcap/jobs/cf-redis-broker/config/redis.conf"),
            redis_server_executable: "redis-server".to_string(),
            service_instance_limit: 3,
            start_redis_timeout_secs: 10,
            backup_directory: PathBuf::from("/var/vcap/store/redis-backups"),
            backup_timeout_secs: 600,
            dedicated: DedicatedConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn start_redis_timeout(&self) -> Duration {
        Duration::from_secs(self.start_redis_timeout_secs)
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup_timeout_secs)
    }
}

/// Dedicated-tier node list and shared credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedicatedConfig {
    pub nodes: Vec<String>,
    pub port: u16,
    pub password: String,
    /// JSON file recording which instance holds which node
    pub statefile: PathBuf,
}

impl Default for DedicatedConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            port: 6379,
            password: String::new(),
            statefile: PathBuf::from("/var/vcap/store/redis/statefile.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.json");
        fs::write(
            &path,
            r#"{"host": "10.0.0.9", "service_instance_limit": 5, "dedicated": {"nodes": ["10.0.1.1"]}}"#,
        )
        .unwrap();

        let config = BrokerConfig::load(&path).unwrap();
        assert_eq!(config.host, "10.0.0.9");
        assert_eq!(config.service_instance_limit, 5);
        assert_eq!(config.redis_server_executable, "redis-server");
        assert_eq!(config.backup_timeout(), Duration::from_secs(600));
        assert_eq!(config.start_redis_timeout(), Duration::from_secs(10));
        assert_eq!(config.dedicated.nodes, vec!["10.0.1.1".to_string()]);
        assert_eq!(config.dedicated.port, 6379);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BrokerConfig::load(&dir.path().join("nope.json")).is_err());
    }
}
