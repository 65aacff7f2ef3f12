//! Client session layer for MalmoEnv simulation services.
//!
//! The service speaks a strictly positional request/response protocol over
//! one long-lived stream per agent:
//!
//! - [`framing`]: 4-byte big-endian length-prefixed frames
//! - [`protocol`]: request messages, step options, reply decoders, tokens
//! - [`descriptor`]: mission templates and the per-episode `MissionInit`
//! - [`codec`]: action encoding and observation decoding against spaces
//! - [`state_machine`]: [`EpisodeStateMachine`] enforcing exchange order
//! - [`session`]: the owned [`Session`] every operation works on
//! - [`handshake`]: connect, greet, find the mission server, init the mission
//! - [`engine`]: peek, step and quit exchanges
//! - [`recovery`]: status, exit and resync on side connections
//! - [`locator`]: where the service runs
//! - [`tcp`]: the default transport
//! - [`env`](mod@env): [`MalmoEnv`], the `reset`/`step`/`close` surface

pub mod codec;
pub mod descriptor;
pub mod engine;
pub mod env;
pub mod framing;
pub mod handshake;
pub mod locator;
pub mod protocol;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod state_machine;
pub mod tcp;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use descriptor::{EpisodeDescriptor, MissionTemplate};
pub use env::MalmoEnv;
pub use locator::{Instance, InstanceLocator, StaticLocator};
pub use protocol::{MALMO_VERSION, Request, StepOptions};
pub use retry::RetryPolicy;
pub use session::Session;
pub use state_machine::{EpisodePhase, EpisodeStateMachine};
pub use tcp::{TcpConnector, TcpTransport};

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        EpisodePhase, Instance, InstanceLocator, MalmoEnv, MissionTemplate, StaticLocator,
        StepOptions, TcpConnector,
    };
    pub use malmo_core::prelude::*;
}
