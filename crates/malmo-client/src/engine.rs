//! Episode exchanges over the session connection: peek, step and quit.
//!
//! Every exchange is validated against the session's state machine before
//! anything is sent. An error that leaves the stream out of step drops the
//! connection so that the next reset reconnects from scratch.

use std::thread;
use std::time::Instant;

use tracing::{debug, trace, warn};

use malmo_core::config::TimingConfig;
use malmo_core::error::MalmoError;
use malmo_core::types::{Action, Info, ResetResult, Space, StepResult};

use crate::codec::{decode_observation, encode_action, zeroed_observation};
use crate::protocol::{Request, StepReply, decode_done_flag, decode_status, decode_text};
use crate::session::Session;
use crate::state_machine::{PeekOutcome, resolve_turn};

fn drop_on_break<T>(session: &mut Session, result: Result<T, MalmoError>) -> Result<T, MalmoError> {
    if let Err(e) = &result {
        if e.breaks_connection() && session.is_connected() {
            warn!(error = %e, "dropping session connection");
            session.disconnect();
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Peek
// ---------------------------------------------------------------------------

/// Wait for the first frame of a freshly started episode.
///
/// Peeks until a frame arrives or the backend reports the episode done. An
/// empty frame past the wait ceiling is a mission init error and the
/// connection is discarded.
pub fn peek(
    session: &mut Session,
    observation_space: &Space,
    timing: &TimingConfig,
) -> Result<ResetResult, MalmoError> {
    let result = peek_until_ready(session, observation_space, timing);
    drop_on_break(session, result)
}

fn peek_until_ready(
    session: &mut Session,
    observation_space: &Space,
    timing: &TimingConfig,
) -> Result<ResetResult, MalmoError> {
    let started = Instant::now();
    let request = Request::Peek.encode();
    loop {
        session.machine.on_request(&Request::Peek)?;
        let transport = session.connection()?;
        transport.send(&request)?;
        let frame = transport.receive()?;
        let info = decode_text(transport.receive()?)?;
        let done = decode_done_flag(&transport.receive()?)?;

        match session.machine.on_peek(frame.len(), done) {
            PeekOutcome::NotReady => {
                if started.elapsed() >= timing.max_wait() {
                    return Err(MalmoError::MissionInit(
                        "too long waiting for first observation".into(),
                    ));
                }
                trace!("first frame not ready");
                thread::sleep(timing.peek_interval());
            }
            outcome => {
                debug!(?outcome, bytes = frame.len(), "peek");
                let observation =
                    decode_observation(frame, &info, observation_space, session.geometry)?;
                session.last_observation = Some(observation.clone());
                return Ok(ResetResult {
                    observation,
                    info: Info::new(),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Act once.
///
/// The action is encoded before anything else, so an invalid action causes
/// no I/O. While the episode is done no exchange happens: the last delivered
/// observation (or a zeroed one) comes back with zero reward and `done`.
pub fn step(
    session: &mut Session,
    action: &Action,
    action_space: &Space,
    observation_space: &Space,
) -> Result<StepResult, MalmoError> {
    let command = encode_action(action, action_space)?;
    if session.is_done() {
        debug!("step while no episode is running");
        let observation = session
            .last_observation
            .clone()
            .unwrap_or_else(|| zeroed_observation(observation_space, session.geometry));
        return Ok(StepResult {
            observation,
            reward: 0.0,
            done: true,
            info: Info::new(),
        });
    }
    let result = exchange_step(session, command, observation_space);
    drop_on_break(session, result)
}

fn exchange_step(
    session: &mut Session,
    command: String,
    observation_space: &Space,
) -> Result<StepResult, MalmoError> {
    let options = session.step_options;
    let request = Request::Step { options, command };
    session.machine.on_request(&request)?;
    let held_key = session.turn_key.clone();

    let transport = session.connection()?;
    transport.send(&request.encode())?;
    if options.with_turn_key() {
        transport.send(held_key.as_bytes())?;
    }
    let frame = transport.receive()?;
    let reply = StepReply::decode(&transport.receive()?)?;
    let info = if options.with_info() {
        decode_text(transport.receive()?)?
    } else {
        String::new()
    };
    let new_key = if options.with_turn_key() {
        decode_text(transport.receive()?)?
    } else {
        String::new()
    };

    session.machine.on_step(&reply);
    session.my_turn = resolve_turn(reply.sent, &new_key, &mut session.turn_key);
    trace!(
        reward = reply.reward,
        done = reply.done,
        sent = reply.sent,
        my_turn = session.my_turn,
        "step"
    );

    let observation = decode_observation(frame, &info, observation_space, session.geometry)?;
    session.last_observation = Some(observation.clone());
    Ok(StepResult {
        observation,
        reward: reply.reward,
        done: reply.done,
        info: Info::new(),
    })
}

// ---------------------------------------------------------------------------
// Quit
// ---------------------------------------------------------------------------

/// Ask the backend to end the episode. Returns whether it has terminated.
pub fn quit(session: &mut Session) -> Result<bool, MalmoError> {
    let result = send_quit(session);
    drop_on_break(session, result)
}

fn send_quit(session: &mut Session) -> Result<bool, MalmoError> {
    session.machine.on_request(&Request::Quit)?;
    let transport = session.connection()?;
    transport.send(&Request::Quit.encode())?;
    let status = decode_status(&transport.receive()?)?;
    Ok(session.machine.on_quit(status))
}

/// Quit until the backend confirms the running episode has ended.
///
/// An episode without a connection has nothing left to drain.
pub fn drain(session: &mut Session, timing: &TimingConfig) -> Result<(), MalmoError> {
    while !session.is_done() {
        if !session.is_connected() {
            session.machine.abandon();
            break;
        }
        if quit(session)? {
            break;
        }
        thread::sleep(timing.quit_interval());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
