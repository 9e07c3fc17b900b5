//! Provision, bind and deprovision flows over both service tiers

use crate::backup::RedisSnapshotter;
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::process::{OsProcessController, ProcessController};
use crate::repository::{DedicatedRepository, InstanceRepository, LocalRepository};
use crate::types::{Instance, InstanceCredentials, InstanceId, Plan};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Entry point for the API layer.
///
/// Provisioning runs the existence check, capacity check and directory setup
/// under one mutex so concurrent requests cannot overshoot the instance limit
/// or set up the same id twice. Process start happens outside it.
pub struct Broker<C: ProcessController = OsProcessController> {
    config: BrokerConfig,
    repository: LocalRepository,
    dedicated: DedicatedRepository,
    controller: C,
    provision_lock: Mutex<()>,
}

impl Broker<OsProcessController> {
    /// Create a broker driving real redis-server processes
    pub fn new(config: BrokerConfig) -> Self {
        let controller = OsProcessController::new(LocalRepository::with_config(&config))
            .with_executable(config.redis_server_executable.clone());
        Self::with_controller(config, controller)
    }
}

impl<C: ProcessController> Broker<C> {
    pub fn with_controller(config: BrokerConfig, controller: C) -> Self {
        Self {
            repository: LocalRepository::with_config(&config),
            dedicated: DedicatedRepository::new(config.dedicated.clone()),
            config,
            controller,
            provision_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn repository(&self) -> &LocalRepository {
        &self.repository
    }

    pub fn dedicated(&self) -> &DedicatedRepository {
        &self.dedicated
    }

    /// Which tier holds `id`, if any
    pub fn plan_of(&self, id: &InstanceId) -> Result<Option<Plan>> {
        if self.repository.instance_exists(id)? {
            Ok(Some(Plan::Shared))
        } else if self.dedicated.instance_exists(id)? {
            Ok(Some(Plan::Dedicated))
        } else {
            Ok(None)
        }
    }

    /// Create a new instance under `plan`
    pub fn provision(&self, id: &InstanceId, plan: Plan) -> Result<Instance> {
        let result = match plan {
            Plan::Shared => self.provision_shared(id),
            Plan::Dedicated => self.provision_dedicated(id),
        };
        match &result {
            Ok(instance) => info!(instance_id = %id, %plan, port = instance.port, "provisioned"),
            Err(e) => warn!(instance_id = %id, %plan, error = %e, "provision failed"),
        }
        result
    }

    fn provision_shared(&self, id: &InstanceId) -> Result<Instance> {
        let instance = {
            let _guard = self.provision_lock.lock().unwrap_or_else(|e| e.into_inner());

            if self.plan_of(id)?.is_some() {
                return Err(Error::InstanceAlreadyExists(id.clone()));
            }
            let existing = self.repository.all_instances()?;
            if existing.len() >= self.config.service_instance_limit {
                return Err(Error::CapacityExceeded);
            }

            let instance = Instance {
                id: id.clone(),
                host: self.config.host.clone(),
                port: find_free_port(&existing)?,
                password: Uuid::new_v4().to_string(),
            };
            self.repository.setup(&instance)?;
            instance
        };

        let layout = self.repository.layout();
        self.controller
            .start_and_wait_until_ready(
                &instance,
                &layout.config_path(id),
                &layout.data_dir(id),
                &layout.pid_file_path(id),
                &layout.log_file_path(id),
                self.config.start_redis_timeout(),
            )
            .inspect_err(|e| {
                error!(instance_id = %id, error = %e, "start-redis-server failed");
            })?;

        self.repository.unlock(&instance)?;
        Ok(instance)
    }

    fn provision_dedicated(&self, id: &InstanceId) -> Result<Instance> {
        let _guard = self.provision_lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.repository.instance_exists(id)? {
            return Err(Error::InstanceAlreadyExists(id.clone()));
        }
        self.dedicated.create(id)
    }

    /// Issue credentials for `binding_id`
    pub fn bind(&self, id: &InstanceId, binding_id: &str) -> Result<InstanceCredentials> {
        match self.plan_of(id)? {
            Some(Plan::Shared) => self.repository.bind(id, binding_id),
            Some(Plan::Dedicated) => self.dedicated.bind(id, binding_id),
            None => Err(Error::InstanceNotFound(id.clone())),
        }
    }

    pub fn unbind(&self, id: &InstanceId, binding_id: &str) -> Result<()> {
        match self.plan_of(id)? {
            Some(Plan::Shared) => self.repository.unbind(id, binding_id),
            Some(Plan::Dedicated) => self.dedicated.unbind(id, binding_id),
            None => Err(Error::InstanceNotFound(id.clone())),
        }
    }

    /// Stop the instance's server and remove its state.
    ///
    /// A server with no recorded pid or no live process counts as stopped, so
    /// instances whose start failed can still be removed.
    pub fn deprovision(&self, id: &InstanceId) -> Result<()> {
        match self.plan_of(id)? {
            Some(Plan::Shared) => {
                let instance = self.repository.find_by_id(id)?;
                match self.controller.kill(&instance) {
                    Ok(()) => {}
                    // Never started, or already exited
                    Err(e @ (Error::PidUnavailable { .. } | Error::ProcessNotFound(_))) => {
                        warn!(instance_id = %id, error = %e, "redis-server already stopped");
                    }
                    Err(e) => return Err(e),
                }
                self.repository.delete(id)?;
            }
            Some(Plan::Dedicated) => self.dedicated.destroy(id)?,
            None => return Err(Error::InstanceNotFound(id.clone())),
        }
        info!(instance_id = %id, "deprovisioned");
        Ok(())
    }

    /// Start every shared instance whose server is not running.
    ///
    /// Every instance is attempted; the first failure is returned afterwards.
    pub fn ensure_all_running(&self) -> Result<usize> {
        let layout = self.repository.layout();
        let instances = self.repository.all_instances()?;
        let mut first_error = None;

        for instance in &instances {
            let id = &instance.id;
            let result = self.controller.ensure_running(
                instance,
                &layout.config_path(id),
                &layout.data_dir(id),
                &layout.pid_file_path(id),
                &layout.log_file_path(id),
            );
            if let Err(e) = result {
                error!(instance_id = %id, error = %e, "ensure-running failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(instances.len()),
        }
    }

    /// Snapshotter for one shared instance
    pub fn snapshotter(&self, id: &InstanceId) -> Result<RedisSnapshotter> {
        let instance = self.repository.find_by_id(id)?;
        let dump_file = self.repository.dump_file_path(id)?;
        Ok(RedisSnapshotter::new(
            instance,
            dump_file,
            &self.config.backup_directory,
            self.config.backup_timeout(),
        ))
    }
}

/// Ask the OS for an unused TCP port not already assigned to an instance
/// whose server may still be starting.
fn find_free_port(existing: &[Instance]) -> Result<u16> {
    for _ in 0..16 {
        let port = TcpListener::bind("0.0.0.0:0")?.local_addr()?.port();
        if !existing.iter().any(|instance| instance.port == port) {
            return Ok(port);
        }
    }
    Err(Error::Other("no free port available".to_string()))
}

/// Status code and JSON body the API layer sends for an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerResponse {
    pub status: u16,
    pub body: Value,
}

impl BrokerResponse {
    pub fn provision(result: &Result<Instance>) -> Self {
        match result {
            Ok(_) => Self::empty(201),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn bind(result: &Result<InstanceCredentials>) -> Self {
        match result {
            Ok(credentials) => Self {
                status: 201,
                body: json!({ "credentials": credentials }),
            },
            Err(e) => Self::from_error(e),
        }
    }

    /// Response for unbind and deprovision
    pub fn removal(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self::empty(200),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::InstanceAlreadyExists(_) => Self::empty(409),
            Error::InstanceNotFound(_) => Self::described(404, "instance does not exist"),
            other => Self::described(500, &other.to_string()),
        }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            body: json!({}),
        }
    }

    fn described(status: u16, description: &str) -> Self {
        Self {
            status,
            body: json!({ "description": description }),
        }
    }
}
