//! OS process half of an instance's lifecycle
//!
//! ```text
//! start_and_wait_until_ready
//!     └─► CommandRunner        redis-server <conf> --pidfile .. --dir .. --logfile ..
//!             └─► ConnectabilityWaiter   poll host:port until connect or timeout
//! ensure_running
//!     └─► InstanceInformer → ProcessChecker   alive? done : start
//! kill
//!     └─► InstanceInformer → ProcessKiller    SIGKILL, no wait
//! ```

mod system;

pub use system::{OsCommandRunner, OsProcessChecker, OsProcessKiller, TcpConnectabilityWaiter};

use crate::error::Result;
use crate::types::{Instance, InstanceId};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

/// Readiness budget used when `ensure_running` has to start a server
pub const ENSURE_RUNNING_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_REDIS_SERVER_EXECUTABLE: &str = "redis-server";

/// Resolves the OS process id recorded for an instance
pub trait InstanceInformer: Send + Sync {
    fn instance_pid(&self, id: &InstanceId) -> Result<i32>;
}

/// Liveness check for a pid
pub trait ProcessChecker: Send + Sync {
    fn alive(&self, pid: i32) -> bool;
}

/// Signal delivery to a pid
pub trait ProcessKiller: Send + Sync {
    fn kill(&self, pid: i32) -> Result<()>;
}

/// Runs an external command to completion
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<()>;
}

/// Blocks until `address` accepts TCP connections or `timeout` elapses
pub trait ConnectabilityWaiter: Send + Sync {
    fn wait_until_connectable(&self, address: &str, timeout: Duration) -> Result<()>;
}

/// Start, supervise and stop instance processes
pub trait ProcessController: Send + Sync {
    /// Launch the server and block until it accepts connections
    fn start_and_wait_until_ready(
        &self,
        instance: &Instance,
        config_path: &Path,
        data_dir: &Path,
        pid_file_path: &Path,
        log_file_path: &Path,
        timeout: Duration,
    ) -> Result<()>;

    /// Start the server unless its recorded pid is alive
    fn ensure_running(
        &self,
        instance: &Instance,
        config_path: &Path,
        data_dir: &Path,
        pid_file_path: &Path,
        log_file_path: &Path,
    ) -> Result<()>;

    /// Signal the server to terminate; does not wait for exit
    fn kill(&self, instance: &Instance) -> Result<()>;
}

/// Build the redis-server argument list for one instance
pub fn redis_server_args(
    config_path: &Path,
    data_dir: &Path,
    pid_file_path: &Path,
    log_file_path: &Path,
) -> Vec<String> {
    vec![
        config_path.display().to_string(),
        "--pidfile".to_string(),
        pid_file_path.display().to_string(),
        "--dir".to_string(),
        data_dir.display().to_string(),
        "--logfile".to_string(),
        log_file_path.display().to_string(),
    ]
}

/// Process controller backed by real OS processes.
///
/// Every collaborator can be swapped out, which is how the tests drive it.
pub struct OsProcessController {
    redis_server_executable: String,
    informer: Box<dyn InstanceInformer>,
    command_runner: Box<dyn CommandRunner>,
    process_checker: Box<dyn ProcessChecker>,
    process_killer: Box<dyn ProcessKiller>,
    waiter: Box<dyn ConnectabilityWaiter>,
}

impl OsProcessController {
    /// Create a controller using the OS collaborators
    pub fn new(informer: impl InstanceInformer + 'static) -> Self {
        Self {
            redis_server_executable: DEFAULT_REDIS_SERVER_EXECUTABLE.to_string(),
            informer: Box::new(informer),
            command_runner: Box::new(OsCommandRunner),
            process_checker: Box::new(OsProcessChecker),
            process_killer: Box::new(OsProcessKiller),
            waiter: Box::new(TcpConnectabilityWaiter::default()),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.redis_server_executable = executable.into();
        self
    }

    pub fn with_command_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.command_runner = Box::new(runner);
        self
    }

    pub fn with_process_checker(mut self, checker: impl ProcessChecker + 'static) -> Self {
        self.process_checker = Box::new(checker);
        self
    }

    pub fn with_process_killer(mut self, killer: impl ProcessKiller + 'static) -> Self {
        self.process_killer = Box::new(killer);
        self
    }

    pub fn with_connectability_waiter(
        mut self,
        waiter: impl ConnectabilityWaiter + 'static,
    ) -> Self {
        self.waiter = Box::new(waiter);
        self
    }

    /// Launch the server with a caller-supplied argument list and wait for readiness.
    ///
    /// A failed launch is returned as is; a server that never becomes
    /// connectable yields the waiter's error unchanged.
    pub fn start_and_wait_until_ready_with_config(
        &self,
        instance: &Instance,
        args: &[String],
        timeout: Duration,
    ) -> Result<()> {
        info!(
            instance_id = %instance.id,
            executable = %self.redis_server_executable,
            "starting redis-server"
        );
        self.command_runner.run(&self.redis_server_executable, args)?;

        let address = instance.address();
        match self.waiter.wait_until_connectable(&address, timeout) {
            Ok(()) => {
                info!(instance_id = %instance.id, %address, "redis-server ready");
                Ok(())
            }
            Err(e) => {
                error!(
                    instance_id = %instance.id,
                    %address,
                    error = %e,
                    "redis-server failed to start"
                );
                Err(e)
            }
        }
    }
}

impl ProcessController for OsProcessController {
    fn start_and_wait_until_ready(
        &self,
        instance: &Instance,
        config_path: &Path,
        data_dir: &Path,
        pid_file_path: &Path,
        log_file_path: &Path,
        timeout: Duration,
    ) -> Result<()> {
        let args = redis_server_args(config_path, data_dir, pid_file_path, log_file_path);
        self.start_and_wait_until_ready_with_config(instance, &args, timeout)
    }

    fn ensure_running(
        &self,
        instance: &Instance,
        config_path: &Path,
        data_dir: &Path,
        pid_file_path: &Path,
        log_file_path: &Path,
    ) -> Result<()> {
        match self.informer.instance_pid(&instance.id) {
            Ok(pid) if self.process_checker.alive(pid) => {
                debug!(instance_id = %instance.id, pid, "redis-server already running");
                return Ok(());
            }
            Ok(pid) => {
                info!(instance_id = %instance.id, pid, "redis-server not running, restarting");
            }
            Err(e) => {
                info!(instance_id = %instance.id, error = %e, "no live pid, restarting");
            }
        }

        self.start_and_wait_until_ready(
            instance,
            config_path,
            data_dir,
            pid_file_path,
            log_file_path,
            ENSURE_RUNNING_TIMEOUT,
        )
    }

    fn kill(&self, instance: &Instance) -> Result<()> {
        let pid = self.informer.instance_pid(&instance.id)?;
        self.process_killer.kill(pid)?;
        info!(instance_id = %instance.id, pid, "redis-server killed");
        Ok(())
    }
}
