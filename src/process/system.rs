//! OS-backed process collaborators

use crate::error::{Error, Result};
use crate::process::{CommandRunner, ConnectabilityWaiter, ProcessChecker, ProcessKiller};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Runs commands with `std::process::Command`, waiting for them to exit
pub struct OsCommandRunner;

impl CommandRunner for OsCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        let output = Command::new(program).args(args).output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

/// Probes liveness with signal 0
pub struct OsProcessChecker;

impl ProcessChecker for OsProcessChecker {
    fn alive(&self, pid: i32) -> bool {
        // pid 0 and negatives address process groups
        if pid <= 0 {
            return false;
        }
        // EPERM means the process exists but belongs to someone else
        matches!(signal::kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
    }
}

/// Terminates processes with SIGKILL
pub struct OsProcessKiller;

impl ProcessKiller for OsProcessKiller {
    fn kill(&self, pid: i32) -> Result<()> {
        if pid <= 0 {
            return Err(Error::ProcessControl(format!("refusing to signal pid {}", pid)));
        }
        signal::kill(Pid::from_raw(pid), Signal::SIGKILL).map_err(|e| match e {
            Errno::ESRCH => Error::ProcessNotFound(pid),
            e => Error::ProcessControl(format!("failed to kill pid {}: {}", pid, e)),
        })
    }
}

/// Polls a TCP address until a connection succeeds
pub struct TcpConnectabilityWaiter {
    poll_interval: Duration,
}

impl TcpConnectabilityWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn try_connect(&self, address: &str) -> bool {
        let addrs: Vec<SocketAddr> = match address.to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(_) => return false,
        };
        addrs
            .iter()
            .any(|addr| TcpStream::connect_timeout(addr, self.poll_interval).is_ok())
    }
}

impl Default for TcpConnectabilityWaiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl ConnectabilityWaiter for TcpConnectabilityWaiter {
    fn wait_until_connectable(&self, address: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_connect(address) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ConnectTimeout {
                    address: address.to_string(),
                    timeout,
                });
            }
            trace!(%address, "not yet connectable");
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}
