//! Dedicated-tier repository backed by a JSON statefile

use crate::config::DedicatedConfig;
use crate::error::{Error, Result};
use crate::repository::InstanceRepository;
use crate::types::{Instance, InstanceCredentials, InstanceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use tracing::info;

/// Instance-to-node allocations stored in JSON
#[derive(Debug, Default, Serialize, Deserialize)]
struct Allocations(BTreeMap<InstanceId, String>);

/// Hands out whole nodes from a fixed host list.
///
/// Each dedicated instance owns one node. All nodes share the configured port
/// and password.
pub struct DedicatedRepository {
    config: DedicatedConfig,
}

impl DedicatedRepository {
    pub fn new(config: DedicatedConfig) -> Self {
        Self { config }
    }

    /// Load allocations from the statefile
    fn load_allocations(&self) -> Result<Allocations> {
        let path = &self.config.statefile;
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Allocations::default())
        }
    }

    /// Save allocations to the statefile
    fn save_allocations(&self, allocations: &Allocations) -> Result<()> {
        let content = serde_json::to_string_pretty(allocations)?;
        if let Some(parent) = self.config.statefile.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config.statefile, content)?;
        Ok(())
    }

    /// Allocate a free node to `id`
    pub fn create(&self, id: &InstanceId) -> Result<Instance> {
        let mut allocations = self.load_allocations()?;
        if allocations.0.contains_key(id) {
            return Err(Error::InstanceAlreadyExists(id.clone()));
        }

        let host = self
            .config
            .nodes
            .iter()
            .find(|node| !allocations.0.values().any(|taken| taken == *node))
            .cloned()
            .ok_or(Error::CapacityExceeded)?;

        allocations.0.insert(id.clone(), host.clone());
        self.save_allocations(&allocations)?;
        info!(instance_id = %id, host = %host, "dedicated node allocated");

        Ok(self.instance(id, host))
    }

    /// Free the node held by `id`
    pub fn destroy(&self, id: &InstanceId) -> Result<()> {
        let mut allocations = self.load_allocations()?;
        let host = allocations
            .0
            .remove(id)
            .ok_or_else(|| Error::InstanceNotFound(id.clone()))?;
        self.save_allocations(&allocations)?;
        info!(instance_id = %id, host = %host, "dedicated node released");
        Ok(())
    }

    /// Nodes not yet allocated to any instance
    pub fn free_nodes(&self) -> Result<Vec<String>> {
        let allocations = self.load_allocations()?;
        Ok(self
            .config
            .nodes
            .iter()
            .filter(|node| !allocations.0.values().any(|taken| taken == *node))
            .cloned()
            .collect())
    }

    fn instance(&self, id: &InstanceId, host: String) -> Instance {
        Instance {
            id: id.clone(),
            host,
            port: self.config.port,
            password: self.config.password.clone(),
        }
    }
}

impl InstanceRepository for DedicatedRepository {
    fn find_by_id(&self, id: &InstanceId) -> Result<Instance> {
        let allocations = self.load_allocations()?;
        let host = allocations
            .0
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound(id.clone()))?;
        Ok(self.instance(id, host))
    }

    fn instance_exists(&self, id: &InstanceId) -> Result<bool> {
        Ok(self.load_allocations()?.0.contains_key(id))
    }

    fn all_instances(&self) -> Result<Vec<Instance>> {
        Ok(self
            .load_allocations()?
            .0
            .into_iter()
            .map(|(id, host)| self.instance(&id, host))
            .collect())
    }

    fn bind(&self, id: &InstanceId, _binding_id: &str) -> Result<InstanceCredentials> {
        Ok(self.find_by_id(id)?.credentials())
    }

    fn unbind(&self, _id: &InstanceId, _binding_id: &str) -> Result<()> {
        Ok(())
    }

    fn delete(&self, id: &InstanceId) -> Result<()> {
        self.destroy(id)
    }
}
