//! Instance location: which MalmoEnv service a session talks to.

use tracing::info;

use malmo_core::config::InstanceConfig;
use malmo_core::error::MalmoError;
use malmo_core::transport::Endpoint;

/// A located service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Head endpoint carrying the session connection.
    pub primary: Endpoint,
    /// Endpoint receiving exit requests.
    pub secondary: Endpoint,
    /// Whether the instance is owned by the locator and must be released.
    pub running: bool,
}

/// Supplies service instances and takes them back.
///
/// The endpoint returned by [`locate`](Self::locate) is used unchanged for
/// the whole connection attempt.
pub trait InstanceLocator: Send {
    fn locate(&mut self) -> Result<Instance, MalmoError>;

    /// Release an instance handed out by [`locate`](Self::locate).
    fn release(&mut self, instance: &Instance) -> Result<(), MalmoError>;
}

/// Locator for an externally managed service at fixed endpoints.
#[derive(Debug, Clone)]
pub struct StaticLocator {
    instance: Instance,
}

impl StaticLocator {
    pub fn new(config: &InstanceConfig) -> Self {
        Self {
            instance: Instance {
                primary: config.primary(),
                secondary: config.secondary(),
                running: false,
            },
        }
    }
}

impl InstanceLocator for StaticLocator {
    fn locate(&mut self) -> Result<Instance, MalmoError> {
        Ok(self.instance.clone())
    }

    fn release(&mut self, instance: &Instance) -> Result<(), MalmoError> {
        info!(primary = %instance.primary, "instance left running (externally managed)");
        Ok(())
    }
}
