//! Instance repositories for each service tier

mod dedicated;
mod local;

pub use dedicated::DedicatedRepository;
pub use local::LocalRepository;

use crate::error::Result;
use crate::types::{Instance, InstanceCredentials, InstanceId};

/// Durable mapping from instance id to instance state
///
/// Implementations hold no in-memory index; every call re-reads storage so a
/// crashed broker comes back with a consistent view.
pub trait InstanceRepository {
    /// Load one instance, failing with `InstanceNotFound` if it is unknown
    fn find_by_id(&self, id: &InstanceId) -> Result<Instance>;

    /// Check if an instance exists
    fn instance_exists(&self, id: &InstanceId) -> Result<bool>;

    /// Load every known instance in one pass
    fn all_instances(&self) -> Result<Vec<Instance>>;

    fn instance_count(&self) -> Result<usize> {
        Ok(self.all_instances()?.len())
    }

    /// Issue credentials for a binding
    fn bind(&self, id: &InstanceId, binding_id: &str) -> Result<InstanceCredentials>;

    /// Release a binding
    fn unbind(&self, id: &InstanceId, binding_id: &str) -> Result<()>;

    /// Remove all stored state for an instance
    fn delete(&self, id: &InstanceId) -> Result<()>;
}
