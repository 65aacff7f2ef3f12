//! Per-environment session state passed to every protocol operation.

use std::io;

use tracing::{debug, warn};

use malmo_core::transport::Transport;
use malmo_core::types::{FrameGeometry, Observation};

use crate::protocol::{StepOptions, episode_token, mission_token};
use crate::state_machine::EpisodeStateMachine;

/// State of one agent's session with a MalmoEnv service.
///
/// Owns the session connection exclusively. `None` means disconnected; the
/// next reset reconnects from scratch.
pub struct Session {
    connection: Option<Box<dyn Transport>>,
    pub(crate) role: u32,
    pub(crate) agent_count: usize,
    pub(crate) experiment_id: String,
    /// Episode counter. Incremented once per reset, zeroed only by reinit.
    pub(crate) resets: u64,
    /// Latest turn key from the backend; empty when turns are not enforced.
    pub(crate) turn_key: String,
    pub(crate) my_turn: bool,
    pub(crate) machine: EpisodeStateMachine,
    pub(crate) step_options: StepOptions,
    pub(crate) synchronous: bool,
    pub(crate) geometry: FrameGeometry,
    pub(crate) last_observation: Option<Observation>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.connection.is_some())
            .field("role", &self.role)
            .field("experiment_id", &self.experiment_id)
            .field("resets", &self.resets)
            .field("phase", &self.machine.phase())
            .field("turn_key", &self.turn_key)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        role: u32,
        agent_count: usize,
        experiment_id: impl Into<String>,
        resets: u64,
        step_options: StepOptions,
        synchronous: bool,
        geometry: FrameGeometry,
    ) -> Self {
        Self {
            connection: None,
            role,
            agent_count,
            experiment_id: experiment_id.into(),
            resets,
            turn_key: String::new(),
            my_turn: false,
            machine: EpisodeStateMachine::new(),
            step_options,
            synchronous,
            geometry,
            last_observation: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Install a freshly greeted connection.
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        if self.connection.is_some() {
            warn!("replacing an existing session connection");
            self.disconnect();
        }
        self.connection = Some(transport);
    }

    /// Drop the connection, best effort, and forget the episode.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.connection.take() {
            if let Err(e) = transport.shutdown() {
                debug!(error = %e, "shutdown of session connection failed");
            }
        }
        self.machine.abandon();
    }

    /// The live connection.
    pub fn connection(&mut self) -> io::Result<&mut (dyn Transport + 'static)> {
        self.connection
            .as_deref_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no session connection"))
    }

    /// `experimentId:role:resets` of the current episode.
    pub fn episode_token(&self) -> String {
        episode_token(&self.experiment_id, self.role, self.resets)
    }

    /// Identity token sent after the mission descriptor.
    pub fn mission_token(&self) -> String {
        mission_token(
            &self.experiment_id,
            self.role,
            self.resets,
            self.agent_count,
            self.synchronous,
        )
    }

    pub fn role(&self) -> u32 {
        self.role
    }

    pub fn agent_count(&self) -> usize {
        self.agent_count
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn turn_key(&self) -> &str {
        &self.turn_key
    }

    pub fn my_turn(&self) -> bool {
        self.my_turn
    }

    pub fn is_done(&self) -> bool {
        self.machine.is_done()
    }

    pub fn machine(&self) -> &EpisodeStateMachine {
        &self.machine
    }

    pub fn step_options(&self) -> StepOptions {
        self.step_options
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.last_observation.as_ref()
    }
}
