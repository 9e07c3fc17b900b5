//! Filesystem-backed repository for shared instances

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::layout::{InstanceLayout, DEFAULT_DUMP_FILE};
use crate::process::InstanceInformer;
use crate::redisconf::{self, RedisConf};
use crate::repository::InstanceRepository;
use crate::types::{Instance, InstanceCredentials, InstanceId};
use std::fs::{self, DirBuilder, File};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Shared-tier repository
///
/// Each instance is a directory under the data root holding its redis.conf,
/// lock marker, pid file and `db/` directory, plus a log directory under the
/// log root. Directory presence is the only existence record.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    host: String,
    layout: InstanceLayout,
    default_config_path: PathBuf,
}

impl LocalRepository {
    pub fn new(
        host: impl Into<String>,
        layout: InstanceLayout,
        default_config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            layout,
            default_config_path: default_config_path.into(),
        }
    }

    /// Create a repository from the broker configuration
    pub fn with_config(config: &BrokerConfig) -> Self {
        Self::new(
            config.host.clone(),
            InstanceLayout::new(&config.instance_data_directory, &config.instance_log_directory),
            &config.default_config_path,
        )
    }

    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    /// Allocate on-disk state for a new instance.
    ///
    /// Creates the data and log directories, drops the lock marker and writes
    /// redis.conf. Stops at the first failure without undoing earlier steps;
    /// every step is safe to repeat.
    pub fn setup(&self, instance: &Instance) -> Result<()> {
        self.ensure_directories_exist(instance).inspect_err(|e| {
            error!(instance_id = %instance.id, error = %e, "ensure-dirs-exist failed");
        })?;

        self.lock(instance).inspect_err(|e| {
            error!(instance_id = %instance.id, error = %e, "lock-shared-instance failed");
        })?;

        self.write_config_file(instance).inspect_err(|e| {
            error!(instance_id = %instance.id, error = %e, "write-config-file failed");
        })?;

        debug!(instance_id = %instance.id, port = instance.port, "instance set up");
        Ok(())
    }

    /// Create the lock marker
    pub fn lock(&self, instance: &Instance) -> Result<()> {
        let path = self.layout.lock_file_path(&instance.id);
        File::create(&path).map_err(|e| Error::filesystem(instance.id.as_str(), &path, e))?;
        Ok(())
    }

    /// Remove the lock marker; fails if it is absent
    pub fn unlock(&self, instance: &Instance) -> Result<()> {
        let path = self.layout.lock_file_path(&instance.id);
        fs::remove_file(&path).map_err(|e| Error::filesystem(instance.id.as_str(), &path, e))
    }

    pub fn is_locked(&self, id: &InstanceId) -> bool {
        self.layout.lock_file_path(id).exists()
    }

    /// Create the data and log directories
    pub fn ensure_directories_exist(&self, instance: &Instance) -> Result<()> {
        for dir in [self.layout.data_dir(&instance.id), self.layout.log_dir(&instance.id)] {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(&dir)
                .map_err(|e| Error::filesystem(instance.id.as_str(), &dir, e))?;
        }
        Ok(())
    }

    /// Render redis.conf from the template with this instance's identity, port and password
    pub fn write_config_file(&self, instance: &Instance) -> Result<()> {
        let path = self.layout.config_path(&instance.id);
        redisconf::copy_with_instance_additions(
            &self.default_config_path,
            &path,
            instance.id.as_str(),
            instance.port,
            &instance.password,
        )
        .map_err(|e| Error::filesystem(instance.id.as_str(), &path, e))
    }

    /// Dump file redis-server writes for `id`, honouring `dbfilename`
    pub fn dump_file_path(&self, id: &InstanceId) -> Result<PathBuf> {
        let path = self.layout.config_path(id);
        let conf = RedisConf::load(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::InstanceNotFound(id.clone()),
            _ => Error::filesystem(id.as_str(), &path, e),
        })?;
        let file_name = conf
            .get_arg("dbfilename")
            .unwrap_or_else(|| DEFAULT_DUMP_FILE.to_string());
        Ok(self.layout.data_dir(id).join(file_name))
    }

    fn remove_dir_if_present(&self, id: &InstanceId, dir: &Path) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!(instance_id = %id, path = %dir.display(), error = %e, "remove directory failed");
                Err(Error::filesystem(id.as_str(), dir, e))
            }
        }
    }
}

impl InstanceRepository for LocalRepository {
    fn find_by_id(&self, id: &InstanceId) -> Result<Instance> {
        let path = self.layout.config_path(id);
        let conf = RedisConf::load(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::InstanceNotFound(id.clone()),
            _ => Error::filesystem(id.as_str(), &path, e),
        })?;

        let port = conf
            .get_arg("port")
            .ok_or_else(|| Error::CorruptState {
                path: path.clone(),
                reason: "missing 'port'".to_string(),
            })?
            .parse::<u16>()
            .map_err(|e| Error::CorruptState {
                path: path.clone(),
                reason: format!("invalid 'port': {}", e),
            })?;

        Ok(Instance {
            id: id.clone(),
            host: self.host.clone(),
            port,
            password: conf.get_arg("requirepass").unwrap_or_default(),
        })
    }

    fn instance_exists(&self, id: &InstanceId) -> Result<bool> {
        let dir = self.layout.base_dir(id);
        match fs::metadata(&dir) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::filesystem(id.as_str(), &dir, e)),
        }
    }

    fn all_instances(&self) -> Result<Vec<Instance>> {
        let root = self.layout.data_root();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::filesystem("", root, e)),
        };

        let mut instances = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::filesystem("", root, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| Error::filesystem("", entry.path(), e))?;
            if !file_type.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let id = InstanceId::new(name.to_string_lossy()).map_err(|reason| Error::CorruptState {
                path: entry.path(),
                reason,
            })?;
            instances.push(self.find_by_id(&id)?);
        }

        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    fn bind(&self, id: &InstanceId, _binding_id: &str) -> Result<InstanceCredentials> {
        Ok(self.find_by_id(id)?.credentials())
    }

    fn unbind(&self, _id: &InstanceId, _binding_id: &str) -> Result<()> {
        Ok(())
    }

    /// Remove the base and log directory trees.
    ///
    /// Both removals are attempted even if the first fails, and an already
    /// missing directory counts as removed, so a failed delete can simply be
    /// retried.
    fn delete(&self, id: &InstanceId) -> Result<()> {
        let base = self.remove_dir_if_present(id, &self.layout.base_dir(id));
        let logs = self.remove_dir_if_present(id, &self.layout.log_dir(id));
        base.and(logs)
    }
}

impl InstanceInformer for LocalRepository {
    fn instance_pid(&self, id: &InstanceId) -> Result<i32> {
        let path = self.layout.pid_file_path(id);
        let content = fs::read_to_string(&path).map_err(|e| Error::PidUnavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        content.trim().parse::<i32>().map_err(|e| Error::PidUnavailable {
            path: path.clone(),
            reason: format!("invalid pid: {}", e),
        })
    }
}
