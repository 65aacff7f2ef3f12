use thiserror::Error;

/// Top-level error type for the Malmo session client.
#[derive(Debug, Error)]
pub enum MalmoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid action: {0}")]
    InvalidAction(#[from] InvalidActionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A wait ceiling elapsed during mission start. The connection has been
    /// discarded and the caller must reset again.
    #[error("Mission init error: {0}")]
    MissionInit(String),

    /// The service could not be reached after exhausting recovery attempts.
    #[error("Environment error: {0}")]
    Env(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl MalmoError {
    /// Whether the error leaves the session connection unusable.
    pub const fn breaks_connection(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Transport(_) | Self::MissionInit(_)
        )
    }
}

/// Configuration and mission template errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Mission xml must contain a <Mission> element")]
    MissingMissionElement,

    #[error("Missing required slot <{0}> in mission init document")]
    MissingSlot(String),

    #[error("Expected {expected} VideoProducer elements, found {found}")]
    VideoProducerCount { expected: usize, found: usize },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// An action that does not fit its declared space. Raised before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidActionError {
    #[error("action field {0} is not declared in the action space")]
    UnknownField(String),

    #[error("invalid value for enum action {field}: {value}")]
    NotEnumMember { field: String, value: String },

    #[error("enum action {field} index {index} out of range for {len} values")]
    IndexOutOfRange { field: String, index: i64, len: usize },

    #[error("enum action {0} must be a string or an index")]
    EnumExpectsIndexOrString(String),

    #[error("box action {field} is a string, expected numbers: {value}")]
    StringForContinuous { field: String, value: String },

    #[error("action field {0} is a nested mapping and cannot be encoded")]
    NestedField(String),
}

/// Lock-step violations on the wire. A connection that produced one of these
/// cannot be resumed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected reply size: expected {expected} bytes, got {got}")]
    ReplySize { expected: usize, got: usize },

    #[error("frame size mismatch: expected {expected} bytes, got {got}")]
    FrameSize { expected: usize, got: usize },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("reply is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid info payload: {0}")]
    InvalidInfo(#[from] serde_json::Error),

    #[error("{message} not allowed in state {phase}")]
    UnexpectedMessage { phase: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
