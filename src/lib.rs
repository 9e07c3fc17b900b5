//! redis-broker: provision isolated Redis server instances on one host
//!
//! The filesystem is the source of truth. Each shared instance is a directory
//! holding its redis.conf, and each one runs as its own redis-server process.
//! The repository manages on-disk state, the process controller manages OS
//! processes, and the broker composes both into provision, bind and
//! deprovision flows.

pub mod backup;
pub mod broker;
pub mod config;
pub mod error;
pub mod layout;
pub mod process;
pub mod redisconf;
pub mod repository;
pub mod types;

pub use backup::{Artifact, Snapshotter};
pub use broker::{Broker, BrokerResponse};
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use process::ProcessController;
pub use repository::InstanceRepository;
pub use types::{Instance, InstanceCredentials, InstanceId, Plan};
