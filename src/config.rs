//! Configuration loaded from `dispatch.toml`.
//!
//! Every key has a default, so a missing file or a partial file is fine.
//! `DISPATCH_SUPER_ADMIN_ROLE_ID` and `DISPATCH_ADMIN_ROLE_ID` take precedence
//! over the file for the elevated role ids.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::notify::{Channel, WorkerProfile};
use crate::policy::AccessPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "dispatch.toml";

const SUPER_ADMIN_ENV: &str = "DISPATCH_SUPER_ADMIN_ROLE_ID";
const ADMIN_ENV: &str = "DISPATCH_ADMIN_ROLE_ID";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub roles: RoleConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Workers registered in the roster at start-up.
    #[serde(default)]
    pub workers: Vec<WorkerProfile>,
}

/// Numeric user-type ids as issued by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default = "default_super_admin_role_id")]
    pub super_admin_role_id: u32,

    #[serde(default = "default_admin_role_id")]
    pub admin_role_id: u32,

    #[serde(default = "default_customer_role_id")]
    pub customer_role_id: u32,

    #[serde(default = "default_worker_role_id")]
    pub worker_role_id: u32,
}

fn default_super_admin_role_id() -> u32 {
    1
}

fn default_admin_role_id() -> u32 {
    2
}

fn default_customer_role_id() -> u32 {
    3
}

fn default_worker_role_id() -> u32 {
    4
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            super_admin_role_id: default_super_admin_role_id(),
            admin_role_id: default_admin_role_id(),
            customer_role_id: default_customer_role_id(),
            worker_role_id: default_worker_role_id(),
        }
    }
}

impl RoleConfig {
    /// Each role must map to its own id, otherwise resolution is ambiguous.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = [
            self.super_admin_role_id,
            self.admin_role_id,
            self.customer_role_id,
            self.worker_role_id,
        ];
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::Roles(format!(
                "role ids must be distinct, got {ids:?}"
            )));
        }
        Ok(())
    }
}

/// Channels used for offers and for messages to a single worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_channel")]
    pub broadcast_channel: Channel,

    #[serde(default = "default_channel")]
    pub direct_channel: Channel,

    /// Upper bound on sends in flight for one fan-out. Zero is treated as one.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_channel() -> Channel {
    Channel::Push
}

fn default_max_in_flight() -> usize {
    16
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            broadcast_channel: default_channel(),
            direct_channel: default_channel(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl DispatchConfig {
    /// Load from `path`, or from `dispatch.toml` in the working directory.
    /// Falls back to defaults when the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml_str(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|var| std::env::var(var).ok())?;
        config.roles.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str::<DispatchConfig>(contents)?)
    }

    /// Override the elevated role ids from the environment. Empty values are
    /// ignored; non-numeric values are an error.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, slot) in [
            (SUPER_ADMIN_ENV, &mut self.roles.super_admin_role_id),
            (ADMIN_ENV, &mut self.roles.admin_role_id),
        ] {
            let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            *slot = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var, value })?;
        }
        Ok(())
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.roles.clone())
    }
}
