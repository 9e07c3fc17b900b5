//! Provisioning scenarios driven through the broker with a fake process
//! controller standing in for redis-server.

use redis_broker::config::DedicatedConfig;
use redis_broker::{
    Broker, BrokerConfig, BrokerResponse, Error, Instance, InstanceId, InstanceRepository, Plan,
    ProcessController, Result,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const CAPACITY_BODY: &str = r#"{"description":"instance limit for this service has been reached"}"#;

/// Tracks "running" instances by id and writes the log marker a real
/// redis-server prints on startup.
#[derive(Clone, Default)]
struct FakeProcessController {
    running: Arc<Mutex<BTreeSet<String>>>,
    starts: Arc<Mutex<usize>>,
    fail_start: bool,
    fail_kill: bool,
}

impl FakeProcessController {
    fn process_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    fn start_count(&self) -> usize {
        *self.starts.lock().unwrap()
    }
}

impl ProcessController for FakeProcessController {
    fn start_and_wait_until_ready(
        &self,
        instance: &Instance,
        _config_path: &Path,
        _data_dir: &Path,
        pid_file_path: &Path,
        log_file_path: &Path,
        _timeout: Duration,
    ) -> Result<()> {
        *self.starts.lock().unwrap() += 1;
        if self.fail_start {
            return Err(Error::ConnectTimeout {
                address: instance.address(),
                timeout: Duration::from_secs(1),
            });
        }
        fs::write(pid_file_path, "4242\n")?;
        fs::write(log_file_path, "# Server started, Redis version 7.2.4\n")?;
        self.running
            .lock()
            .unwrap()
            .insert(instance.id.to_string());
        Ok(())
    }

    fn ensure_running(
        &self,
        instance: &Instance,
        config_path: &Path,
        data_dir: &Path,
        pid_file_path: &Path,
        log_file_path: &Path,
    ) -> Result<()> {
        if self.running.lock().unwrap().contains(instance.id.as_str()) {
            return Ok(());
        }
        self.start_and_wait_until_ready(
            instance,
            config_path,
            data_dir,
            pid_file_path,
            log_file_path,
            Duration::from_secs(1),
        )
    }

    fn kill(&self, instance: &Instance) -> Result<()> {
        if self.fail_kill {
            return Err(Error::ProcessControl("operation not permitted".to_string()));
        }
        if self.running.lock().unwrap().remove(instance.id.as_str()) {
            Ok(())
        } else {
            Err(Error::PidUnavailable {
                path: format!("{}/redis-server.pid", instance.id).into(),
                reason: "No such file or directory".to_string(),
            })
        }
    }
}

struct Fixture {
    dir: TempDir,
    controller: FakeProcessController,
    broker: Broker<FakeProcessController>,
}

fn fixture_with(controller: FakeProcessController) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("redis.conf.template");
    fs::write(&template, "daemonize no\nsave 900 1\n").unwrap();

    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        instance_data_directory: dir.path().join("data"),
        instance_log_directory: dir.path().join("log"),
        default_config_path: template,
        service_instance_limit: 3,
        backup_directory: dir.path().join("backups"),
        dedicated: DedicatedConfig {
            nodes: vec!["10.0.1.1".to_string()],
            port: 12345,
            password: "super-secret".to_string(),
            statefile: dir.path().join("statefile.json"),
        },
        ..BrokerConfig::default()
    };

    let broker = Broker::with_controller(config, controller.clone());
    Fixture {
        dir,
        controller,
        broker,
    }
}

fn fixture() -> Fixture {
    fixture_with(FakeProcessController::default())
}

fn id(s: &str) -> InstanceId {
    InstanceId::new(s).unwrap()
}

#[test]
fn provision_shared_instance() {
    let f = fixture();

    let result = f.broker.provision(&id("abc"), Plan::Shared);
    let response = BrokerResponse::provision(&result);

    assert_eq!(response.status, 201);
    assert_eq!(response.body.to_string(), "{}");
    assert_eq!(f.controller.process_count(), 1);

    let config_path = f.dir.path().join("data").join("abc").join("redis.conf");
    assert!(config_path.is_file());

    let log = fs::read_to_string(f.dir.path().join("log").join("abc").join("redis-server.log")).unwrap();
    assert!(log.contains("Server started"));
}

#[test]
fn provisioned_instance_is_unlocked_and_findable() {
    let f = fixture();
    let instance = f.broker.provision(&id("abc"), Plan::Shared).unwrap();

    let found = f.broker.repository().find_by_id(&id("abc")).unwrap();
    assert_eq!(found, instance);
    assert!(!found.password.is_empty());
    assert!(!f.broker.repository().is_locked(&id("abc")));
}

#[test]
fn provision_beyond_limit_is_rejected() {
    let f = fixture();
    for i in ["1", "2", "3"] {
        f.broker.provision(&id(i), Plan::Shared).unwrap();
    }

    let result = f.broker.provision(&id("4"), Plan::Shared);
    let response = BrokerResponse::provision(&result);

    assert!(matches!(result, Err(Error::CapacityExceeded)));
    assert_eq!(response.status, 500);
    assert_eq!(response.body.to_string(), CAPACITY_BODY);
    assert_eq!(f.broker.repository().instance_count().unwrap(), 3);
    assert_eq!(f.controller.process_count(), 3);
    assert!(!f.broker.repository().instance_exists(&id("4")).unwrap());
}

#[test]
fn provision_existing_id_is_conflict() {
    let f = fixture();
    f.broker.provision(&id("abc"), Plan::Shared).unwrap();
    let processes_before = f.controller.process_count();

    let result = f.broker.provision(&id("abc"), Plan::Shared);
    let response = BrokerResponse::provision(&result);

    assert_eq!(response.status, 409);
    assert_eq!(response.body.to_string(), "{}");
    assert_eq!(f.controller.process_count(), processes_before);
    assert_eq!(f.controller.start_count(), 1);
}

#[test]
fn provision_reports_setup_failure() {
    let f = fixture();
    let data = f.dir.path().join("data");
    // A file where the data root should be makes directory creation fail
    fs::write(&data, "").unwrap();

    let result = f.broker.provision(&id("1"), Plan::Shared);

    assert!(matches!(result, Err(Error::Filesystem { .. })));
    assert_eq!(BrokerResponse::provision(&result).status, 500);
    assert_eq!(f.controller.start_count(), 0);
}

#[test]
fn failed_start_leaves_locked_instance_behind() {
    let f = fixture_with(FakeProcessController {
        fail_start: true,
        ..FakeProcessController::default()
    });

    let result = f.broker.provision(&id("abc"), Plan::Shared);

    assert!(matches!(result, Err(Error::ConnectTimeout { .. })));
    assert!(f.broker.repository().instance_exists(&id("abc")).unwrap());
    assert!(f.broker.repository().is_locked(&id("abc")));
}

#[test]
fn concurrent_provisions_never_exceed_the_limit() {
    let f = fixture();
    let ids: Vec<InstanceId> = (0..8).map(|i| id(&format!("instance-{}", i))).collect();

    let broker = &f.broker;
    let results: Vec<Result<Instance>> = thread::scope(|scope| {
        let handles: Vec<_> = ids
            .iter()
            .map(|instance_id| scope.spawn(move || broker.provision(instance_id, Plan::Shared)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let provisioned = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(provisioned, 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::CapacityExceeded)));
    assert_eq!(f.broker.repository().instance_count().unwrap(), 3);
    assert_eq!(f.controller.start_count(), 3);

    let ports: BTreeSet<u16> = f
        .broker
        .repository()
        .all_instances()
        .unwrap()
        .iter()
        .map(|instance| instance.port)
        .collect();
    assert_eq!(ports.len(), 3);
}

#[test]
fn bind_shared_instance_returns_credentials() {
    let f = fixture();
    let instance = f.broker.provision(&id("abc"), Plan::Shared).unwrap();

    let result = f.broker.bind(&id("abc"), "binding-1");
    let response = BrokerResponse::bind(&result);

    assert_eq!(response.status, 201);
    assert_eq!(response.body["credentials"]["host"], "127.0.0.1");
    assert_eq!(response.body["credentials"]["port"], instance.port);
    assert_eq!(response.body["credentials"]["password"], instance.password.as_str());
    assert_eq!(
        f.broker.bind(&id("abc"), "binding-2").unwrap(),
        result.unwrap()
    );
}

#[test]
fn bind_dedicated_instance_returns_node_credentials() {
    let f = fixture();
    f.broker.provision(&id("big"), Plan::Dedicated).unwrap();

    let creds = f.broker.bind(&id("big"), "binding").unwrap();

    assert_eq!(creds.host, "10.0.1.1");
    assert_eq!(creds.port, 12345);
    assert_eq!(creds.password, "super-secret");
    assert_eq!(f.controller.process_count(), 0);
}

#[test]
fn bind_unknown_dedicated_instance_is_not_found() {
    let f = fixture();

    let result = f.broker.bind(&id("no-such-instance"), "binding");
    let response = BrokerResponse::bind(&result);

    assert_eq!(response.status, 404);
    assert_eq!(
        response.body.to_string(),
        r#"{"description":"instance does not exist"}"#
    );
}

#[test]
fn dedicated_pool_has_its_own_limit() {
    let f = fixture();
    f.broker.provision(&id("big-1"), Plan::Dedicated).unwrap();

    let result = f.broker.provision(&id("big-2"), Plan::Dedicated);
    assert!(matches!(result, Err(Error::CapacityExceeded)));

    // Shared capacity is untouched
    f.broker.provision(&id("small"), Plan::Shared).unwrap();
}

#[test]
fn ids_are_unique_across_tiers() {
    let f = fixture();
    f.broker.provision(&id("abc"), Plan::Shared).unwrap();

    assert!(matches!(
        f.broker.provision(&id("abc"), Plan::Dedicated),
        Err(Error::InstanceAlreadyExists(_))
    ));
}

#[test]
fn deprovision_kills_and_removes_instance() {
    let f = fixture();
    f.broker.provision(&id("abc"), Plan::Shared).unwrap();

    let result = f.broker.deprovision(&id("abc"));

    assert_eq!(BrokerResponse::removal(&result).status, 200);
    assert_eq!(f.controller.process_count(), 0);
    assert!(!f.broker.repository().instance_exists(&id("abc")).unwrap());
    assert!(!f.dir.path().join("log").join("abc").exists());
    assert!(matches!(
        f.broker.repository().find_by_id(&id("abc")),
        Err(Error::InstanceNotFound(_))
    ));
}

#[test]
fn deprovision_removes_instance_that_never_started() {
    let f = fixture_with(FakeProcessController {
        fail_start: true,
        ..FakeProcessController::default()
    });
    f.broker.provision(&id("abc"), Plan::Shared).unwrap_err();

    f.broker.deprovision(&id("abc")).unwrap();

    assert!(!f.broker.repository().instance_exists(&id("abc")).unwrap());
    assert_eq!(f.broker.repository().instance_count().unwrap(), 0);
}

#[test]
fn deprovision_with_os_controller_tolerates_missing_pid_file() {
    let f = fixture_with(FakeProcessController {
        fail_start: true,
        ..FakeProcessController::default()
    });
    f.broker.provision(&id("abc"), Plan::Shared).unwrap_err();

    let os_broker = Broker::new(f.broker.config().clone());
    os_broker.deprovision(&id("abc")).unwrap();

    assert!(!os_broker.repository().instance_exists(&id("abc")).unwrap());
    assert_eq!(os_broker.repository().instance_count().unwrap(), 0);
}

#[test]
fn deprovision_with_os_controller_tolerates_exited_server() {
    let f = fixture();
    f.broker.provision(&id("abc"), Plan::Shared).unwrap();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    let pid_file = f.broker.repository().layout().pid_file_path(&id("abc"));
    fs::write(&pid_file, format!("{}\n", pid)).unwrap();

    let os_broker = Broker::new(f.broker.config().clone());
    os_broker.deprovision(&id("abc")).unwrap();

    assert!(!os_broker.repository().instance_exists(&id("abc")).unwrap());
}

#[test]
fn deprovision_keeps_instance_when_kill_fails() {
    let f = fixture_with(FakeProcessController {
        fail_kill: true,
        ..FakeProcessController::default()
    });
    f.broker.provision(&id("abc"), Plan::Shared).unwrap();

    let result = f.broker.deprovision(&id("abc"));

    assert!(matches!(result, Err(Error::ProcessControl(_))));
    assert!(f.broker.repository().instance_exists(&id("abc")).unwrap());
}

#[test]
fn deprovision_frees_capacity() {
    let f = fixture();
    for i in ["1", "2", "3"] {
        f.broker.provision(&id(i), Plan::Shared).unwrap();
    }
    f.broker.deprovision(&id("2")).unwrap();

    f.broker.provision(&id("4"), Plan::Shared).unwrap();
    assert_eq!(f.broker.repository().instance_count().unwrap(), 3);
}

#[test]
fn deprovision_unknown_is_not_found() {
    let f = fixture();
    let result = f.broker.deprovision(&id("ghost"));
    assert_eq!(BrokerResponse::removal(&result).status, 404);
}

#[test]
fn ensure_all_running_restarts_only_dead_instances() {
    let f = fixture();
    f.broker.provision(&id("a"), Plan::Shared).unwrap();
    f.broker.provision(&id("b"), Plan::Shared).unwrap();
    f.controller.running.lock().unwrap().remove("a");

    let count = f.broker.ensure_all_running().unwrap();

    assert_eq!(count, 2);
    assert_eq!(f.controller.start_count(), 3);
    assert_eq!(f.controller.process_count(), 2);
}

#[test]
fn unbind_is_a_no_op() {
    let f = fixture();
    f.broker.provision(&id("abc"), Plan::Shared).unwrap();

    f.broker.unbind(&id("abc"), "binding").unwrap();
    assert!(f.broker.bind(&id("abc"), "binding").is_ok());
    assert!(matches!(
        f.broker.unbind(&id("ghost"), "binding"),
        Err(Error::InstanceNotFound(_))
    ));
}
