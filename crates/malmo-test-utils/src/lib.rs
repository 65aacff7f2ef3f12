//! Shared test fixtures and utilities for the Malmo session client.
//!
//! Provides scripted transports and connectors that replay canned backend
//! replies, wire-encoded reply builders, mission templates and spaces, and
//! deterministic RNG setup.

pub mod fixtures;
pub mod replies;
pub mod rng;
pub mod scripted;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use fixtures::{
    mission_xml, navigate_action_space, navigate_observation_space, two_agent_mission_xml,
};
pub use rng::seeded_rng;
pub use scripted::{ScriptedConnector, ScriptedTransport};
