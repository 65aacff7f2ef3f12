//! Connection establishment and mission initialization.

use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use malmo_core::config::TimingConfig;
use malmo_core::error::MalmoError;
use malmo_core::transport::{Connector, Endpoint, Transport};

use crate::descriptor::EpisodeDescriptor;
use crate::protocol::{MISSION_ACCEPTED, Request, decode_status, decode_text};
use crate::retry::RetryPolicy;
use crate::session::Session;

/// Send the protocol greeting. The service does not reply.
pub fn hello(transport: &mut dyn Transport) -> Result<(), MalmoError> {
    transport.send(&Request::Hello.encode())?;
    Ok(())
}

/// Connect and greet once, without retry. Used for side connections.
pub fn open_side_channel(
    connector: &dyn Connector,
    endpoint: &Endpoint,
) -> Result<Box<dyn Transport>, MalmoError> {
    let mut transport = connector.connect(endpoint)?;
    hello(transport.as_mut())?;
    Ok(transport)
}

/// Connect and greet under `retry`. The whole sequence is retried.
pub fn connect(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    retry: &RetryPolicy,
) -> Result<Box<dyn Transport>, MalmoError> {
    let transport = retry.run("connect", |attempt| {
        debug!(%endpoint, attempt, "connecting");
        open_side_channel(connector, endpoint)
    })?;
    info!(%endpoint, "connected");
    Ok(transport)
}

/// Send the mission descriptor and identity token until the service accepts
/// the mission. There is no ceiling; the service answers once it can host it.
///
/// The returned turn key becomes the session's turn state.
pub fn init_mission(
    session: &mut Session,
    descriptor: &EpisodeDescriptor,
    timing: &TimingConfig,
) -> Result<(), MalmoError> {
    let xml = descriptor.to_xml();
    let token = session.mission_token();
    loop {
        let transport = session.connection()?;
        transport.send(xml.as_bytes())?;
        transport.send(token.as_bytes())?;

        let status = decode_status(&transport.receive()?)?;
        let turn_key = decode_text(transport.receive()?)?;
        session.turn_key = turn_key;
        if status == MISSION_ACCEPTED {
            break;
        }
        debug!(status, %token, "mission not accepted yet");
        thread::sleep(timing.init_retry());
    }
    session.my_turn = true;
    session.machine.on_mission_started();
    info!(token = %token, turn_key = %session.turn_key, "mission started");
    Ok(())
}

/// Poll the head node for the port of the mission this agent joins.
///
/// Runs on its own connection to `head`. Gives up after the wait ceiling
/// with a mission init error.
pub fn find_server(
    connector: &dyn Connector,
    head: &Endpoint,
    token: &str,
    timing: &TimingConfig,
) -> Result<u32, MalmoError> {
    let mut transport = open_side_channel(connector, head)?;
    let find = Request::Find {
        token: token.to_owned(),
    }
    .encode();
    let started = Instant::now();
    let port = loop {
        transport.send(&find)?;
        let port = decode_status(&transport.receive()?)?;
        if port != 0 {
            break port;
        }
        if started.elapsed() >= timing.max_wait() {
            warn!(%head, %token, "no mission to join before the wait ceiling");
            let _ = transport.shutdown();
            return Err(MalmoError::MissionInit(
                "too long finding mission to join".into(),
            ));
        }
        thread::sleep(timing.find_interval());
    };
    let _ = transport.shutdown();
    info!(%head, port, "found mission server");
    Ok(port)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::descriptor::{self, MissionTemplate};
    use crate::protocol::StepOptions;
    use malmo_core::types::FrameGeometry;
    use malmo_test_utils::{ScriptedConnector, ScriptedTransport, mission_xml};

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 9000)
    }

    fn session() -> Session {
        Session::new(
            0,
            1,
            "exp",
            1,
            StepOptions::default(),
            true,
            FrameGeometry::new(4, 4, 3),
        )
    }

    #[test]
    fn connect_greets_first() {
        let script = ScriptedTransport::new();
        let connector = ScriptedConnector::new();
        connector.accept(&endpoint(), &script);
        let policy = RetryPolicy::connect(&TimingConfig::immediate());

        connect(&connector, &endpoint(), &policy).unwrap();
        assert_eq!(script.sent_text(), vec!["<MalmoEnv0.37.0/>".to_owned()]);
    }

    #[test]
    fn connect_retries_then_gives_up() {
        let connector = ScriptedConnector::new();
        let timing = TimingConfig {
            connect_attempts: 3,
            ..TimingConfig::immediate()
        };
        let err = connect(&connector, &endpoint(), &RetryPolicy::connect(&timing))
            .err()
            .unwrap();
        assert!(matches!(err, MalmoError::Transport(_)));
        assert_eq!(connector.attempts_to(&endpoint()), 3);
    }

    #[test]
    fn init_mission_resends_until_accepted() {
        let template = MissionTemplate::parse(&mission_xml(4, 4), Path::new(".")).unwrap();
        let descriptor = descriptor::build(&template, 0, "exp", 1).unwrap();
        let script = ScriptedTransport::new();
        script.init_reply(0, "").init_reply(1, "tk0");

        let mut session = session();
        session.attach(Box::new(script.clone()));
        init_mission(&mut session, &descriptor, &TimingConfig::immediate()).unwrap();

        let sent = script.sent_text();
        assert_eq!(sent.len(), 4);
        assert!(sent[0].starts_with("<MissionInit"));
        assert_eq!(sent[1], "exp:0:1:1:true");
        assert_eq!(sent[2], sent[0]);
        assert_eq!(session.turn_key(), "tk0");
        assert_eq!(
            session.machine().phase(),
            crate::state_machine::EpisodePhase::AwaitingPeek
        );
    }

    #[test]
    fn find_server_polls_until_port() {
        let script = ScriptedTransport::new();
        script.status_reply(0).status_reply(0).status_reply(25565);
        let connector = ScriptedConnector::new();
        connector.accept(&endpoint(), &script);

        let port = find_server(&connector, &endpoint(), "exp:1:1", &TimingConfig::immediate())
            .unwrap();
        assert_eq!(port, 25565);
        assert_eq!(script.sent_count("<Find>exp:1:1</Find>"), 3);
        assert!(script.is_shut_down());
    }

    #[test]
    fn find_server_times_out() {
        let script = ScriptedTransport::new();
        script.status_reply(0);
        let connector = ScriptedConnector::new();
        connector.accept(&endpoint(), &script);
        let timing = TimingConfig {
            max_wait_secs: 0,
            ..TimingConfig::immediate()
        };

        let err = find_server(&connector, &endpoint(), "exp:1:1", &timing).unwrap_err();
        assert!(matches!(err, MalmoError::MissionInit(_)));
    }
}
