//! Core types for redis-broker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Service plan an instance is provisioned under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Local redis-server process drawn from the capacity-bounded pool
    Shared,
    /// Whole node from the dedicated host list
    Dedicated,
}

impl Plan {
    /// Get the plan name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Shared => "shared",
            Plan::Dedicated => "dedicated",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(Plan::Shared),
            "dedicated" => Ok(Plan::Dedicated),
            _ => Err(format!(
                "Invalid plan '{}'. Must be shared or dedicated",
                s
            )),
        }
    }
}

/// Caller-supplied instance identifier, also used as a directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new instance id
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.is_empty() {
            return Err("Instance id cannot be empty".to_string());
        }
        if id == "." || id == ".." {
            return Err(format!("Instance id cannot be '{}'", id));
        }
        if id.contains('/') || id.contains('\0') {
            return Err("Instance id cannot contain '/' or NUL".to_string());
        }
        Ok(InstanceId(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceId::new(s)
    }
}

impl TryFrom<String> for InstanceId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        InstanceId::new(s)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

/// One provisioned redis server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Instance {
    /// `host:port` address the server listens on
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection details handed to a binding
    pub fn credentials(&self) -> InstanceCredentials {
        InstanceCredentials {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
        }
    }
}

/// What a consumer needs to connect to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCredentials {
    pub host: String,
    pub port: u16,
    pub password: String,
}
