//! Service management over side connections: status, exit and resync.
//!
//! A crashed or wedged service is recovered by asking it to exit (its
//! supervisor restarts it) and then polling both endpoints until they answer
//! a status request again.

use std::thread;

use tracing::{error, info, warn};

use malmo_core::config::TimingConfig;
use malmo_core::error::MalmoError;
use malmo_core::transport::{Connector, Endpoint};

use crate::handshake::open_side_channel;
use crate::protocol::{Request, decode_status, decode_text};

/// Send one request on a fresh side connection and return the single reply.
fn side_request(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    request: &Request,
) -> Result<Vec<u8>, MalmoError> {
    let mut transport = open_side_channel(connector, endpoint)?;
    transport.send(&request.encode())?;
    let reply = transport.receive()?;
    let _ = transport.shutdown();
    Ok(reply)
}

/// Send a token request (`<Init>`, `<Close>`, `<Exit>`) and return whether
/// the service acknowledged it.
pub fn acknowledge(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    request: &Request,
) -> Result<bool, MalmoError> {
    let reply = side_request(connector, endpoint, request)?;
    Ok(decode_status(&reply)? != 0)
}

/// Status string reported by the service at `endpoint`.
pub fn status(connector: &dyn Connector, endpoint: &Endpoint) -> Result<String, MalmoError> {
    let reply = side_request(connector, endpoint, &Request::Status)?;
    Ok(decode_text(reply)?)
}

/// Ask the service behind `secondary` to exit and return whether it
/// acknowledged.
///
/// Failures are expected (the service may die mid-reply) and are logged
/// rather than returned.
pub fn exit(connector: &dyn Connector, secondary: &Endpoint, token: &str) -> bool {
    info!(%secondary, %token, "requesting service exit");
    let request = Request::Exit {
        token: token.to_owned(),
    };
    match acknowledge(connector, secondary, &request) {
        Ok(acknowledged) => acknowledged,
        Err(e) => {
            error!(%secondary, error = %e, "exit request failed");
            false
        }
    }
}

/// Poll the primary, then the secondary endpoint, until each answers a
/// status request.
///
/// Each endpoint gets the configured number of attempts. Fails when either
/// stays unreachable; the message names the head when not even the primary
/// answered.
pub fn resync(
    connector: &dyn Connector,
    primary: &Endpoint,
    secondary: &Endpoint,
    timing: &TimingConfig,
) -> Result<(), MalmoError> {
    let mut reached = 0;
    for endpoint in [primary, secondary] {
        for attempt in 1..=timing.resync_attempts {
            match status(connector, endpoint) {
                Ok(status) => {
                    info!(%endpoint, attempt, %status, "service reachable");
                    reached += 1;
                    break;
                }
                Err(e) => {
                    warn!(%endpoint, attempt, error = %e, "service not reachable");
                    thread::sleep(timing.resync_interval());
                }
            }
        }
    }
    match reached {
        2 => Ok(()),
        0 => Err(MalmoError::Env("Failed to contact service head".into())),
        _ => Err(MalmoError::Env("Failed to contact service".into())),
    }
}

/// Ask the service to exit, wait for its replacement, then resync.
///
/// The restart pause applies whether or not the exit was acknowledged.
pub fn exit_and_resync(
    connector: &dyn Connector,
    primary: &Endpoint,
    secondary: &Endpoint,
    token: &str,
    timing: &TimingConfig,
) -> Result<(), MalmoError> {
    let acknowledged = exit(connector, secondary, token);
    info!(acknowledged, pause = ?timing.exit_pause(), "pausing for service restart");
    thread::sleep(timing.exit_pause());
    resync(connector, primary, secondary, timing)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
