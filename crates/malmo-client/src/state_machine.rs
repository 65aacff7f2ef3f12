//! Episode state machine enforcing the lock-step exchange order.
//!
//! [`EpisodeStateMachine`] tracks the current [`EpisodePhase`] and validates
//! outgoing requests against it. Each reply kind has one transition
//! function, so the machine can be driven from canned bytes without a
//! connection.

use std::fmt;

use malmo_core::error::ProtocolError;

use crate::protocol::{Request, StepReply};

/// Where the current episode stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpisodePhase {
    /// Mission accepted, no frame delivered yet.
    AwaitingPeek,
    /// Steps may be exchanged.
    Running,
    /// No episode in progress. Initial phase.
    Done,
}

impl fmt::Display for EpisodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AwaitingPeek => "awaiting_peek",
            Self::Running => "running",
            Self::Done => "done",
        })
    }
}

/// Result of applying a peek reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekOutcome {
    /// A frame arrived; the episode is running.
    Ready,
    /// No frame yet; peek again.
    NotReady,
    /// The episode ended before delivering a frame.
    Ended,
}

/// Tracks the episode phase and enforces valid transitions.
#[derive(Debug)]
pub struct EpisodeStateMachine {
    phase: EpisodePhase,
}

impl EpisodeStateMachine {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: EpisodePhase::Done,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> EpisodePhase {
        self.phase
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.phase, EpisodePhase::Done)
    }

    /// Validate an outgoing request against the current phase.
    ///
    /// Management requests (`hello`, `find`, `status`, ...) travel on their
    /// own connections and are always allowed.
    pub fn on_request(&self, request: &Request) -> Result<(), ProtocolError> {
        let allowed = match request {
            Request::Peek => self.phase == EpisodePhase::AwaitingPeek,
            Request::Step { .. } => self.phase == EpisodePhase::Running,
            Request::Quit => self.phase != EpisodePhase::Done,
            _ => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedMessage {
                phase: self.phase.to_string(),
                message: request.name().to_owned(),
            })
        }
    }

    /// The backend accepted the mission.
    pub const fn on_mission_started(&mut self) {
        self.phase = EpisodePhase::AwaitingPeek;
    }

    /// Apply a peek reply given its frame length and done flag.
    pub const fn on_peek(&mut self, frame_len: usize, done: bool) -> PeekOutcome {
        if done {
            self.phase = EpisodePhase::Done;
            PeekOutcome::Ended
        } else if frame_len == 0 {
            PeekOutcome::NotReady
        } else {
            self.phase = EpisodePhase::Running;
            PeekOutcome::Ready
        }
    }

    pub const fn on_step(&mut self, reply: &StepReply) {
        if reply.done {
            self.phase = EpisodePhase::Done;
        }
    }

    /// Apply a quit status. Returns whether the episode has terminated.
    pub const fn on_quit(&mut self, status: u32) -> bool {
        if status != 0 {
            self.phase = EpisodePhase::Done;
        }
        status != 0
    }

    /// Forget the episode, e.g. after the connection was dropped.
    pub const fn abandon(&mut self) {
        self.phase = EpisodePhase::Done;
    }
}

impl Default for EpisodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the turn fields of a step reply and return whether it is our turn.
///
/// A non-empty `new_key` always replaces `held`. Either way the turn is ours
/// exactly when the backend did not forward the command (`sent == 0`): a
/// forwarded command passes the turn on, and without a new key the turn
/// follows `sent` alone.
pub fn resolve_turn(sent: u8, new_key: &str, held: &mut String) -> bool {
    if !new_key.is_empty() {
        new_key.clone_into(held);
    }
    sent == 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StepOptions;
    use malmo_test_utils::replies;

    fn step_request() -> Request {
        Request::Step {
            options: StepOptions::default(),
            command: String::new(),
        }
    }

    fn step_reply(done: bool, sent: u8) -> StepReply {
        StepReply::decode(&replies::step(0.0, done, sent)).unwrap()
    }

    #[test]
    fn initial_phase_is_done() {
        let sm = EpisodeStateMachine::new();
        assert!(sm.is_done());
        assert!(sm.on_request(&step_request()).is_err());
        assert!(sm.on_request(&Request::Peek).is_err());
        assert!(sm.on_request(&Request::Quit).is_err());
        assert!(sm.on_request(&Request::Hello).is_ok());
    }

    #[test]
    fn full_episode() {
        let mut sm = EpisodeStateMachine::new();
        sm.on_mission_started();
        assert_eq!(sm.phase(), EpisodePhase::AwaitingPeek);
        assert!(sm.on_request(&Request::Peek).is_ok());
        assert!(sm.on_request(&step_request()).is_err());

        assert_eq!(sm.on_peek(0, false), PeekOutcome::NotReady);
        assert_eq!(sm.phase(), EpisodePhase::AwaitingPeek);
        assert_eq!(sm.on_peek(48, false), PeekOutcome::Ready);
        assert_eq!(sm.phase(), EpisodePhase::Running);
        assert!(sm.on_request(&step_request()).is_ok());
        assert!(sm.on_request(&Request::Peek).is_err());

        sm.on_step(&step_reply(false, 0));
        assert_eq!(sm.phase(), EpisodePhase::Running);
        sm.on_step(&step_reply(true, 0));
        assert!(sm.is_done());
    }

    #[test]
    fn peek_reporting_done_ends_episode() {
        let mut sm = EpisodeStateMachine::new();
        sm.on_mission_started();
        assert_eq!(sm.on_peek(0, true), PeekOutcome::Ended);
        assert!(sm.is_done());
    }

    #[test]
    fn quit_status_drives_termination() {
        let mut sm = EpisodeStateMachine::new();
        sm.on_mission_started();
        sm.on_peek(1, false);
        assert!(sm.on_request(&Request::Quit).is_ok());
        assert!(!sm.on_quit(0));
        assert_eq!(sm.phase(), EpisodePhase::Running);
        assert!(sm.on_quit(1));
        assert!(sm.is_done());
    }

    #[test]
    fn unexpected_message_names_phase() {
        let sm = EpisodeStateMachine::new();
        let err = sm.on_request(&step_request()).unwrap_err();
        assert_eq!(err.to_string(), "step not allowed in state done");
    }

    #[test]
    fn abandon_from_any_phase() {
        let mut sm = EpisodeStateMachine::new();
        sm.on_mission_started();
        sm.abandon();
        assert!(sm.is_done());
    }

    // ---- Turn resolution ----

    #[test]
    fn turn_table() {
        let cases = [
            // (sent, new key, held before, my turn, held after)
            (0, "", "tk0", true, "tk0"),
            (1, "", "tk0", false, "tk0"),
            (0, "tk1", "tk0", true, "tk1"),
            (1, "tk1", "tk0", false, "tk1"),
        ];
        for (sent, new_key, before, turn, after) in cases {
            let mut held = before.to_owned();
            assert_eq!(resolve_turn(sent, new_key, &mut held), turn, "sent={sent} key={new_key:?}");
            assert_eq!(held, after);
        }
    }

    #[test]
    fn turn_from_canned_step_reply() {
        let reply = StepReply::decode(&replies::step(1.0, false, 1)).unwrap();
        let mut held = String::new();
        assert!(!resolve_turn(reply.sent, "tk1", &mut held));
        assert_eq!(held, "tk1");
    }
}
