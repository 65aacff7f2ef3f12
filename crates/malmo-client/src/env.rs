//! Gymnasium-style environment over a MalmoEnv session.
//!
//! [`MalmoEnv`] owns the [`Session`] and wires the protocol pieces together:
//! reset drains the previous episode, performs the handshake and waits for
//! the first frame; step runs one exchange; the management operations talk
//! to the service on side connections.

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use malmo_core::config::EnvConfig;
use malmo_core::error::MalmoError;
use malmo_core::transport::Connector;
use malmo_core::types::{Action, ResetResult, Space, StepResult};

use crate::descriptor::{self, MissionTemplate};
use crate::engine;
use crate::handshake;
use crate::locator::{Instance, InstanceLocator, StaticLocator};
use crate::protocol::{Request, StepOptions};
use crate::recovery;
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::tcp::TcpConnector;

// ---------------------------------------------------------------------------
// MalmoEnv
// ---------------------------------------------------------------------------

/// One agent's environment on a MalmoEnv service.
///
/// Calls must come from one thread at a time; there is exactly one session
/// and at most one episode in flight.
pub struct MalmoEnv {
    config: EnvConfig,
    template: MissionTemplate,
    session: Session,
    locator: Box<dyn InstanceLocator>,
    connector: Box<dyn Connector>,
    instance: Option<Instance>,
}

impl MalmoEnv {
    /// Environment talking TCP to the configured endpoints.
    ///
    /// Loads the mission template and derives the frame geometry up front,
    /// so template errors surface here rather than on the first reset.
    pub fn new(config: EnvConfig) -> Result<Self, MalmoError> {
        config.validate()?;
        let template =
            MissionTemplate::load(&config.mission_file, &config.resolved_missions_dir())?;
        let locator = StaticLocator::new(&config.instance);
        let connector = TcpConnector::new(config.timing.read_timeout());
        Self::with_parts(config, template, Box::new(locator), Box::new(connector))
    }

    /// Environment with an explicit template, locator and connector.
    pub fn with_parts(
        config: EnvConfig,
        template: MissionTemplate,
        locator: Box<dyn InstanceLocator>,
        connector: Box<dyn Connector>,
    ) -> Result<Self, MalmoError> {
        config.validate()?;
        let geometry = template.frame_geometry(config.role)?;
        let step_options = StepOptions::try_from(config.step_options)?;
        let experiment_id = config
            .experiment_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session::new(
            config.role,
            template.agent_count(),
            experiment_id,
            config.episode,
            step_options,
            config.synchronous,
            geometry,
        );
        info!(
            experiment_id = %session.experiment_id(),
            role = config.role,
            agents = session.agent_count(),
            turn_based = template.is_turn_based(),
            width = geometry.width,
            height = geometry.height,
            depth = geometry.depth,
            "environment created"
        );
        Ok(Self {
            config,
            template,
            session,
            locator,
            connector,
            instance: None,
        })
    }

    // -- accessors --

    pub const fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub const fn session(&self) -> &Session {
        &self.session
    }

    pub const fn template(&self) -> &MissionTemplate {
        &self.template
    }

    pub const fn action_space(&self) -> &Space {
        &self.config.action_space
    }

    pub const fn observation_space(&self) -> &Space {
        &self.config.observation_space
    }

    pub fn experiment_id(&self) -> &str {
        self.session.experiment_id()
    }

    pub fn resets(&self) -> u64 {
        self.session.resets()
    }

    pub fn is_done(&self) -> bool {
        self.session.is_done()
    }

    fn instance(&mut self) -> Result<Instance, MalmoError> {
        if let Some(instance) = &self.instance {
            return Ok(instance.clone());
        }
        let instance = self.locator.locate()?;
        info!(primary = %instance.primary, secondary = %instance.secondary, "instance located");
        self.instance = Some(instance.clone());
        Ok(instance)
    }

    // -- episode --

    /// Start a new episode and return its first observation.
    ///
    /// Exits and resyncs the service first when the resync period is due,
    /// then quits any running episode before the mission handshake.
    pub fn reset(&mut self) -> Result<ResetResult, MalmoError> {
        let instance = self.instance()?;
        let period = self.config.resync_period;
        if period > 0 && (self.session.resets + 1) % period == 0 {
            info!(resets = self.session.resets, period, "periodic exit and resync");
            self.exit_and_resync()?;
        }
        engine::drain(&mut self.session, &self.config.timing)?;

        let result = self.start_episode(&instance);
        if let Err(e) = &result {
            if e.breaks_connection() && self.session.is_connected() {
                warn!(error = %e, "reset failed, dropping session connection");
                self.session.disconnect();
            }
        }
        result
    }

    fn start_episode(&mut self, instance: &Instance) -> Result<ResetResult, MalmoError> {
        self.session.resets += 1;
        let mut descriptor = descriptor::build(
            &self.template,
            self.session.role,
            &self.session.experiment_id,
            self.session.resets,
        )?;
        debug!(token = %descriptor.token(), "episode descriptor built");

        if self.session.role != 0 {
            let port = handshake::find_server(
                self.connector.as_ref(),
                &instance.primary,
                &descriptor.token(),
                &self.config.timing,
            )?;
            descriptor.set_server_connection(&instance.primary.host, port);
        }
        if !self.session.is_connected() {
            let retry = RetryPolicy::connect(&self.config.timing);
            let transport = handshake::connect(self.connector.as_ref(), &instance.primary, &retry)?;
            self.session.attach(transport);
        }
        handshake::init_mission(&mut self.session, &descriptor, &self.config.timing)?;
        engine::peek(
            &mut self.session,
            &self.config.observation_space,
            &self.config.timing,
        )
    }

    /// Act once. See [`engine::step`].
    pub fn step(&mut self, action: &Action) -> Result<StepResult, MalmoError> {
        engine::step(
            &mut self.session,
            action,
            &self.config.action_space,
            &self.config.observation_space,
        )
    }

    /// Purge the last token from the head node, drop the session connection
    /// and release the instance. Never fails; errors are logged.
    pub fn close(&mut self) {
        let Some(instance) = self.instance.take() else {
            self.session.disconnect();
            return;
        };
        let close = Request::Close {
            token: self.session.episode_token(),
        };
        match recovery::acknowledge(self.connector.as_ref(), &instance.primary, &close) {
            Ok(true) => debug!("close acknowledged"),
            Ok(false) => warn!("close not acknowledged"),
            Err(e) => error!(error = %e, "close request failed"),
        }
        self.session.disconnect();
        if instance.running {
            if let Err(e) = self.locator.release(&instance) {
                error!(error = %e, "releasing instance failed");
            }
        }
        info!("environment closed");
    }

    // -- management --

    /// Reset the experiment's episode count on the service. On
    /// acknowledgement the local counter returns to zero as well.
    pub fn reinit(&mut self) -> Result<bool, MalmoError> {
        let instance = self.instance()?;
        let init = Request::Init {
            token: self.session.episode_token(),
        };
        let acknowledged = recovery::acknowledge(self.connector.as_ref(), &instance.primary, &init)?;
        if acknowledged {
            info!(previous = self.session.resets, "episode counter reinitialized");
            self.session.resets = 0;
        }
        Ok(acknowledged)
    }

    /// Status string of the head node (`head`) or the assigned node.
    pub fn status(&mut self, head: bool) -> Result<String, MalmoError> {
        let instance = self.instance()?;
        let endpoint = if head {
            &instance.primary
        } else {
            &instance.secondary
        };
        recovery::status(self.connector.as_ref(), endpoint)
    }

    /// Ask the service to exit. Communication errors are logged and reported
    /// as an unacknowledged exit; only locating the instance can fail.
    pub fn exit(&mut self) -> Result<bool, MalmoError> {
        let instance = self.instance()?;
        Ok(recovery::exit(
            self.connector.as_ref(),
            &instance.secondary,
            &self.session.episode_token(),
        ))
    }

    /// Wait until both endpoints answer status requests.
    pub fn resync(&mut self) -> Result<(), MalmoError> {
        let instance = self.instance()?;
        recovery::resync(
            self.connector.as_ref(),
            &instance.primary,
            &instance.secondary,
            &self.config.timing,
        )
    }

    /// Drop the session, make the service exit, wait, then resync.
    pub fn exit_and_resync(&mut self) -> Result<(), MalmoError> {
        let instance = self.instance()?;
        info!("exit and resync");
        self.session.disconnect();
        recovery::exit_and_resync(
            self.connector.as_ref(),
            &instance.primary,
            &instance.secondary,
            &self.session.episode_token(),
            &self.config.timing,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use malmo_core::config::TimingConfig;
    use malmo_test_utils::{ScriptedConnector, mission_xml, two_agent_mission_xml};

    fn config() -> EnvConfig {
        let mut config = EnvConfig::new("mission.xml");
        config.timing = TimingConfig::immediate();
        config
    }

    fn env_with(config: EnvConfig, xml: &str) -> Result<MalmoEnv, MalmoError> {
        let template = MissionTemplate::parse(xml, Path::new(".")).unwrap();
        let locator = StaticLocator::new(&config.instance);
        MalmoEnv::with_parts(
            config,
            template,
            Box::new(locator),
            Box::new(ScriptedConnector::new()),
        )
    }

    #[test]
    fn generates_experiment_id_when_absent() {
        let a = env_with(config(), &mission_xml(4, 4)).unwrap();
        let b = env_with(config(), &mission_xml(4, 4)).unwrap();
        assert_eq!(a.experiment_id().len(), 36);
        assert_ne!(a.experiment_id(), b.experiment_id());
    }

    #[test]
    fn keeps_configured_experiment_id_and_episode() {
        let mut config = config();
        config.experiment_id = Some("exp".into());
        config.episode = 7;
        let env = env_with(config, &mission_xml(4, 4)).unwrap();
        assert_eq!(env.experiment_id(), "exp");
        assert_eq!(env.resets(), 7);
        assert!(env.is_done());
    }

    #[test]
    fn role_out_of_range_is_config_error() {
        let mut config = config();
        config.role = 1;
        let err = env_with(config, &mission_xml(4, 4)).err().unwrap();
        assert!(matches!(err, MalmoError::Config(_)));
    }

    #[test]
    fn second_role_of_two_agent_mission() {
        let mut config = config();
        config.role = 1;
        let env = env_with(config, &two_agent_mission_xml(4, 4)).unwrap();
        assert_eq!(env.session().agent_count(), 2);
        assert_eq!(env.session().geometry().depth, 3);
    }

    #[test]
    fn missing_template_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = EnvConfig::new(dir.path().join("absent.xml"));
        let err = MalmoEnv::new(config).err().unwrap();
        assert!(matches!(err, MalmoError::Config(_)));
    }

    #[test]
    fn close_before_reset_does_no_io() {
        let connector = ScriptedConnector::new();
        let config = config();
        let template = MissionTemplate::parse(&mission_xml(4, 4), Path::new(".")).unwrap();
        let locator = StaticLocator::new(&config.instance);
        let mut env =
            MalmoEnv::with_parts(config, template, Box::new(locator), Box::new(connector.clone()))
                .unwrap();
        env.close();
        assert!(connector.attempts().is_empty());
    }

    #[test]
    fn unreachable_exit_is_not_an_error() {
        let connector = ScriptedConnector::new();
        let config = config();
        let template = MissionTemplate::parse(&mission_xml(4, 4), Path::new(".")).unwrap();
        let locator = StaticLocator::new(&config.instance);
        let mut env =
            MalmoEnv::with_parts(config, template, Box::new(locator), Box::new(connector.clone()))
                .unwrap();
        assert!(!env.exit().unwrap());
        assert_eq!(connector.attempts().len(), 1);
    }
}
