//! Compute provisioning contract.
//!
//! A [`Provisioner`] is the coordinator's only view of which machines
//! exist. Instances it lists are agents (or peer coordinators); instances
//! it stops listing are pruned on the next refresh.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use flotilla_core::{Instance, InstanceId, InstanceRole};

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provisioned {provisioned} of {requested} instances: {message}")]
    Partial {
        requested: usize,
        provisioned: usize,
        message: String,
    },

    #[error("provisioning not supported: {0}")]
    Unsupported(String),
}

pub type ProvisionerResult<T> = Result<T, ProvisionerError>;

/// Parameters for a provisioning call. Anything unset falls back to the
/// backend's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvisionRequest {
    pub count: usize,
    pub instance_type: Option<String>,
    pub availability_zone: Option<String>,
    pub image: Option<String>,
    pub key_pair: Option<String>,
    pub security_group: Option<String>,
}

impl Default for ProvisionRequest {
    fn default() -> Self {
        Self {
            count: 1,
            instance_type: None,
            availability_zone: None,
            image: None,
            key_pair: None,
            security_group: None,
        }
    }
}

impl ProvisionRequest {
    pub fn count(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Every live instance currently playing `role`.
    async fn list_instances(&self, role: InstanceRole) -> ProvisionerResult<Vec<Instance>>;

    /// Create `request.count` instances. Fewer than requested is an error,
    /// never a silently shorter list.
    async fn provision(
        &self,
        role: InstanceRole,
        request: &ProvisionRequest,
    ) -> ProvisionerResult<Vec<Instance>>;

    /// Destroy the given instances. Unknown ids are ignored.
    async fn terminate(&self, instance_ids: &[InstanceId]) -> ProvisionerResult<()>;
}

/// Fixed instance lists taken from configuration.
///
/// Cannot create machines; terminating only forgets an instance.
#[derive(Debug, Default)]
pub struct StaticProvisioner {
    instances: RwLock<HashMap<InstanceRole, Vec<Instance>>>,
}

impl StaticProvisioner {
    pub fn new(agents: Vec<Instance>, coordinators: Vec<Instance>) -> Self {
        let mut instances = HashMap::new();
        instances.insert(InstanceRole::Agent, agents);
        instances.insert(InstanceRole::Coordinator, coordinators);
        Self {
            instances: RwLock::new(instances),
        }
    }
}

#[async_trait]
impl Provisioner for StaticProvisioner {
    async fn list_instances(&self, role: InstanceRole) -> ProvisionerResult<Vec<Instance>> {
        let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        Ok(instances.get(&role).cloned().unwrap_or_default())
    }

    async fn provision(
        &self,
        role: InstanceRole,
        request: &ProvisionRequest,
    ) -> ProvisionerResult<Vec<Instance>> {
        warn!(%role, count = request.count, "static provisioner cannot create instances");
        Err(ProvisionerError::Unsupported(format!(
            "static provisioner cannot create {role} instances"
        )))
    }

    async fn terminate(&self, instance_ids: &[InstanceId]) -> ProvisionerResult<()> {
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        for list in instances.values_mut() {
            list.retain(|i| !instance_ids.contains(&i.id));
        }
        info!(count = instance_ids.len(), "static instances forgotten");
        Ok(())
    }
}
