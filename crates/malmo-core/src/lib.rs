// malmo-core: types, spaces, config, errors and transport traits for the Malmo session client.

pub mod config;
pub mod error;
pub mod transport;
pub mod types;

pub mod prelude {
    pub use crate::config::{EnvConfig, InstanceConfig, TimingConfig};
    pub use crate::error::{ConfigError, InvalidActionError, MalmoError, ProtocolError};
    pub use crate::transport::{Connector, Endpoint, Transport};
    pub use crate::types::{
        Action, ActionValue, BoxDtype, Frame, FrameGeometry, Info, Observation, ResetResult,
        Space, StepResult,
    };
}
