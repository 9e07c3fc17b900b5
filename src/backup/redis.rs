//! BGSAVE-based snapshotter for redis-server instances

use crate::backup::{Artifact, Snapshotter};
use crate::error::{Error, Result};
use crate::types::Instance;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Largest bulk reply accepted; INFO replies are a few kilobytes
const MAX_BULK_LEN: i64 = 1 << 20;

/// Forces a background save on one instance and copies the resulting dump
/// into the backup directory as `<id>-<last_save_time>.rdb`.
pub struct RedisSnapshotter {
    instance: Instance,
    dump_file: PathBuf,
    backup_dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl RedisSnapshotter {
    pub fn new(
        instance: Instance,
        dump_file: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            instance,
            dump_file: dump_file.into(),
            backup_dir: backup_dir.into(),
            timeout,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll `INFO persistence` until no background save is running and
    /// return the last save time.
    fn wait_for_bgsave(&self, conn: &mut RespConnection) -> Result<i64> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let info = conn.bulk(&["INFO", "persistence"])?;
            let field = |name: &str| info_field(&info, name);

            if field("rdb_bgsave_in_progress") == Some("0") {
                if field("rdb_last_bgsave_status") != Some("ok") {
                    return Err(Error::Snapshot(format!(
                        "background save on {} did not succeed",
                        self.instance.id
                    )));
                }
                return field("rdb_last_save_time")
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| Error::Snapshot("missing rdb_last_save_time".to_string()));
            }

            if Instant::now() >= deadline {
                return Err(Error::Snapshot(format!(
                    "background save on {} still running after {:?}",
                    self.instance.id, self.timeout
                )));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Snapshotter for RedisSnapshotter {
    fn snapshot(&self) -> Result<Artifact> {
        let address = self.instance.address();
        let mut conn = RespConnection::connect(&address, self.timeout)?;

        if !self.instance.password.is_empty() {
            conn.ok(&["AUTH", &self.instance.password])?;
        }

        match conn.command(&["BGSAVE"])? {
            Reply::Simple(status) => debug!(instance_id = %self.instance.id, %status, "BGSAVE"),
            Reply::Error(e) => return Err(Error::Snapshot(format!("BGSAVE failed: {}", e))),
            other => return Err(Error::Snapshot(format!("unexpected BGSAVE reply: {:?}", other))),
        }

        let saved_at = self.wait_for_bgsave(&mut conn)?;

        let source = &self.dump_file;
        let size = fs::metadata(source)
            .map_err(|e| Error::Snapshot(format!("dump {} unreadable: {}", source.display(), e)))?
            .len();
        if size == 0 {
            return Err(Error::Snapshot(format!("dump {} is empty", source.display())));
        }

        fs::create_dir_all(&self.backup_dir)?;
        let destination = self
            .backup_dir
            .join(format!("{}-{}.rdb", self.instance.id, saved_at));
        fs::copy(source, &destination)?;

        info!(
            instance_id = %self.instance.id,
            artifact = %destination.display(),
            bytes = size,
            "snapshot taken"
        );
        Ok(Artifact::new(destination))
    }
}

/// Value of `name` in an `INFO` reply
fn info_field<'a>(info: &'a str, name: &str) -> Option<&'a str> {
    info.lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
        .map(str::trim)
}

#[derive(Debug)]
enum Reply {
    Simple(String),
    Error(String),
    Bulk(Option<Vec<u8>>),
}

/// Minimal RESP2 client: enough for AUTH, BGSAVE and INFO
struct RespConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl RespConnection {
    fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let addr: SocketAddr = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Snapshot(format!("cannot resolve {}", address)))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| Error::Snapshot(format!("cannot connect to {}: {}", address, e)))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    fn command(&mut self, args: &[&str]) -> Result<Reply> {
        let mut buf = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            buf.extend_from_slice(arg.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        self.read_reply()
    }

    fn ok(&mut self, args: &[&str]) -> Result<()> {
        match self.command(args)? {
            Reply::Simple(_) => Ok(()),
            Reply::Error(e) => Err(Error::Snapshot(format!("{} failed: {}", args[0], e))),
            other => Err(Error::Snapshot(format!("unexpected {} reply: {:?}", args[0], other))),
        }
    }

    fn bulk(&mut self, args: &[&str]) -> Result<String> {
        match self.command(args)? {
            Reply::Bulk(Some(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Reply::Error(e) => Err(Error::Snapshot(format!("{} failed: {}", args[0], e))),
            other => Err(Error::Snapshot(format!("unexpected {} reply: {:?}", args[0], other))),
        }
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(Error::Snapshot("connection closed by server".to_string()));
        }
        Ok(line.trim_end_matches("\r\n").to_string())
    }

    fn read_reply(&mut self) -> Result<Reply> {
        let line = self.read_line()?;
        let mut chars = line.chars();
        let kind = chars.next();
        let rest = chars.as_str();
        let bad = || Error::Snapshot(format!("malformed reply: {:?}", line));
        match kind {
            Some('+') => Ok(Reply::Simple(rest.to_string())),
            Some('-') => Ok(Reply::Error(rest.to_string())),
            Some('$') => {
                let len: i64 = rest.parse().map_err(|_| bad())?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                if len > MAX_BULK_LEN {
                    return Err(Error::Snapshot(format!(
                        "bulk reply of {} bytes exceeds {} byte limit",
                        len, MAX_BULK_LEN
                    )));
                }
                let mut data = vec![0u8; len as usize + 2];
                self.reader.read_exact(&mut data)?;
                data.truncate(len as usize);
                Ok(Reply::Bulk(Some(data)))
            }
            _ => Err(bad()),
        }
    }
}
