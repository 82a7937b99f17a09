//! Endpoint configuration, shared by the querier and the responder.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Error;
use crate::interfaces::NetInterface;

/// Selects which interfaces an endpoint binds.
pub type InterfacePredicate = dyn Fn(&NetInterface) -> bool + Send + Sync;

pub struct Config {
    /// Bind exactly these interfaces, by name.  Overrides
    /// `interface_filter`.  `None` means filter the enumerated
    /// interfaces instead.
    pub interfaces: Option<Vec<String>>,

    /// Predicate over enumerated interfaces.  `None` means the
    /// default filter (drop loopback, VPN tunnels, container
    /// bridges).
    pub interface_filter: Option<Arc<InterfacePredicate>>,

    /// Whether the per-source rate limiter runs at all.  The size and
    /// source-scope checks always run.
    pub rate_limit_enabled: bool,

    /// Queries per second per source before it is put in cooldown.
    pub rate_limit_threshold: u32,

    /// How long a source stays in cooldown once it crosses the
    /// threshold.
    pub rate_limit_cooldown: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interfaces: None,
            interface_filter: None,
            rate_limit_enabled: true,
            rate_limit_threshold: 100,
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// # Errors
    ///
    /// If a rate-limit parameter is non-positive.
    pub fn validate(&self) -> Result<(), Error> {
        if self.rate_limit_enabled {
            if self.rate_limit_threshold == 0 {
                return Err(Error::validation(
                    "rate_limit_threshold",
                    "must be positive",
                ));
            }
            if self.rate_limit_cooldown.is_zero() {
                return Err(Error::validation("rate_limit_cooldown", "must be positive"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("interfaces", &self.interfaces)
            .field(
                "interface_filter",
                &self.interface_filter.as_ref().map(|_| "<predicate>"),
            )
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("rate_limit_threshold", &self.rate_limit_threshold)
            .field("rate_limit_cooldown", &self.rate_limit_cooldown)
            .finish()
    }
}
