//! Configuration for the resolver and the lifecycle coordinator.
//!
//! Both types deserialize with `serde` (durations in humantime notation, e.g.
//! `"30s"`) and can be built in code through a validating builder:
//!
//! ```
//! use std::time::Duration;
//!
//! use gateway_common_authn::CoordinatorConfig;
//!
//! let config = CoordinatorConfig::builder()
//!     .node_id("gateway-1")
//!     .dispatch_timeout(Duration::from_secs(5))
//!     .build()
//!     .expect("valid configuration");
//! assert_eq!(config.node_id(), "gateway-1");
//! ```

use std::time::Duration;

use gateway_common_cache::ConfigError;
use serde::{Deserialize, Serialize};

/// Default bound on a single subscription dispatch.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default lifetime of a failure command.
pub const DEFAULT_COMMAND_TTL: Duration = Duration::from_secs(3_600);

/// Organization and environment used when a subscription carries none.
pub const DEFAULT_SCOPE_ID: &str = "DEFAULT";

const MIN_DISPATCH_TIMEOUT: Duration = Duration::from_millis(1);
const MIN_COMMAND_TTL: Duration = Duration::from_secs(1);

// ── ResolverConfig ──────────────────────────────────────────────────────

/// Fallback behaviour of the security-token resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// When a client id is resolved with a plan and no subscription matches
    /// that plan, retry without the plan.
    #[serde(default)]
    #[builder(default)]
    pub client_id_plan_fallback: bool,

    /// When no trust store is bound for the API, look the certificate up in
    /// the subscription index.
    #[serde(default = "default_certificate_index_fallback")]
    #[builder(default = default_certificate_index_fallback())]
    pub certificate_index_fallback: bool,
}

fn default_certificate_index_fallback() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            client_id_plan_fallback: false,
            certificate_index_fallback: default_certificate_index_fallback(),
        }
    }
}

// ── CoordinatorConfig ───────────────────────────────────────────────────

/// Settings of the subscription lifecycle coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    node_id: String,

    #[serde(with = "humantime_serde", default = "default_dispatch_timeout")]
    dispatch_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_command_ttl")]
    command_ttl: Duration,

    #[serde(default = "default_scope_id")]
    default_organization_id: String,

    #[serde(default = "default_scope_id")]
    default_environment_id: String,
}

fn default_dispatch_timeout() -> Duration {
    DEFAULT_DISPATCH_TIMEOUT
}

fn default_command_ttl() -> Duration {
    DEFAULT_COMMAND_TTL
}

fn default_scope_id() -> String {
    DEFAULT_SCOPE_ID.to_owned()
}

#[bon::bon]
impl CoordinatorConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `node_id` is empty, `dispatch_timeout` is
    /// below 1ms or `command_ttl` is below 1s.
    #[builder]
    pub fn new(
        #[builder(into)] node_id: String,
        #[builder(default = DEFAULT_DISPATCH_TIMEOUT)] dispatch_timeout: Duration,
        #[builder(default = DEFAULT_COMMAND_TTL)] command_ttl: Duration,
        #[builder(into, default = default_scope_id())] default_organization_id: String,
        #[builder(into, default = default_scope_id())] default_environment_id: String,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            node_id,
            dispatch_timeout,
            command_ttl,
            default_organization_id,
            default_environment_id,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations bypass the builder; the coordinator calls
    /// this before accepting one.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Missing { field: "node_id" });
        }
        if self.dispatch_timeout < MIN_DISPATCH_TIMEOUT {
            return Err(ConfigError::BelowMinimum {
                field: "dispatch_timeout",
                min: format!("{MIN_DISPATCH_TIMEOUT:?}"),
                value: format!("{:?}", self.dispatch_timeout),
            });
        }
        if self.command_ttl < MIN_COMMAND_TTL {
            return Err(ConfigError::BelowMinimum {
                field: "command_ttl",
                min: format!("{MIN_COMMAND_TTL:?}"),
                value: format!("{:?}", self.command_ttl),
            });
        }
        Ok(())
    }

    /// Identifier of this gateway node, used as the sender of commands.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Upper bound on a single dispatch.
    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        self.dispatch_timeout
    }

    /// Lifetime of failure commands.
    #[must_use]
    pub fn command_ttl(&self) -> Duration {
        self.command_ttl
    }

    /// Organization used for subscriptions that carry none.
    #[must_use]
    pub fn default_organization_id(&self) -> &str {
        &self.default_organization_id
    }

    /// Environment used for subscriptions that carry none.
    #[must_use]
    pub fn default_environment_id(&self) -> &str {
        &self.default_environment_id
    }
}
