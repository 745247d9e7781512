//! Endpoint configuration.
//!
//! Configuration lives in a JSON file whose top-level object is keyed by
//! endpoint name, so one file can describe several endpoints:
//!
//! ```json
//! {
//!   "server": { "type": "server", "host": "0.0.0.0", "port": 9001, "backlog": 128 },
//!   "client": { "type": "client", "host": "127.0.0.1", "port": 9001 }
//! }
//! ```
//!
//! Every field has a default, so an empty section is a valid configuration.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dispatcher::default_workers;
use crate::error::{EndpointError, Result};
use crate::message::{Category, CategorySet};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9001;
pub const DEFAULT_BACKLOG: u32 = 128;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Which side of the connection this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

impl FromStr for Role {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            other => Err(EndpointError::Config(format!(
                "unknown role {:?}, expected server or client",
                other
            ))),
        }
    }
}

/// One endpoint's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    #[serde(rename = "type")]
    pub role: Option<Role>,
    pub host: String,
    pub port: u16,
    /// Dispatcher size; defaults to host parallelism.
    pub workers: usize,
    pub backlog: u32,
    /// Registered category tags.
    pub categories: Vec<String>,
    /// Whether client REQUEST sends wait for their RESPONSE.
    pub await_responses: bool,
    pub max_payload_size: u32,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: u64,
    /// Payload the server's auto-reply handler answers REQUESTs with.
    pub reply: Value,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            role: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: default_workers(),
            backlog: DEFAULT_BACKLOG,
            categories: vec![
                Category::Request.to_string(),
                Category::Response.to_string(),
            ],
            await_responses: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_timeout_ms: None,
            write_timeout_ms: None,
            connect_timeout_ms: None,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            reply: json!({"text": "thanks"}),
        }
    }
}

impl EndpointConfig {
    /// Load one named section from a JSON configuration file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `Json` if it does not parse, `Config`
    /// if the section is missing or its values are invalid.
    pub fn load(path: impl AsRef<Path>, section: &str) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), section, "loading configuration");
        Self::from_json(&text, section)
    }

    /// Parse one named section from JSON text.
    pub fn from_json(text: &str, section: &str) -> Result<Self> {
        let mut sections: serde_json::Map<String, Value> = serde_json::from_str(text)?;
        let value = sections
            .remove(section)
            .ok_or_else(|| EndpointError::Config(format!("no section named {:?}", section)))?;

        let config: EndpointConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Switch to the five-category profile.
    pub fn extended(mut self) -> Self {
        self.categories = CategorySet::extended().iter().map(|c| c.to_string()).collect();
        self
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        let categories = self.category_set()?;
        for required in [Category::Request, Category::Response] {
            if !categories.contains(required) {
                return Err(EndpointError::Config(format!(
                    "categories must include {}",
                    required
                )));
            }
        }

        if self.max_payload_size == 0 {
            return Err(EndpointError::Config(
                "max_payload_size must be positive".to_string(),
            ));
        }

        if !self.reply.is_object() {
            return Err(EndpointError::Config("reply must be a JSON object".to_string()));
        }

        Ok(())
    }

    pub fn category_set(&self) -> Result<CategorySet> {
        CategorySet::from_tags(&self.categories)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
