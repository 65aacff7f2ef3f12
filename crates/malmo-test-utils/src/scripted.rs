//! Scripted stand-ins for the transport and connector.
//!
//! A [`ScriptedTransport`] replays a queue of canned replies and records
//! every payload sent through it. Clones share the same script, so a test
//! keeps one handle for assertions while the environment owns another.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use malmo_core::transport::{Connector, Endpoint, Transport};

use crate::replies;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    shut_down: bool,
}

/// In-memory transport replaying canned replies.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one raw reply.
    pub fn reply(&self, bytes: impl Into<Vec<u8>>) -> &Self {
        lock(&self.inner).replies.push_back(bytes.into());
        self
    }

    /// Queue the mission init reply: status then turn token.
    pub fn init_reply(&self, status: u32, turn_key: &str) -> &Self {
        self.reply(replies::status(status)).reply(turn_key)
    }

    /// Queue a peek reply: observation, info, done flag.
    pub fn peek_reply(&self, obs: &[u8], info: &str, done: bool) -> &Self {
        self.reply(obs).reply(info).reply(replies::done_flag(done))
    }

    /// Queue a step reply. `info` and `turn_key` are only queued when given,
    /// matching step options that request them.
    pub fn step_reply(
        &self,
        obs: &[u8],
        reward: f64,
        done: bool,
        sent: u8,
        info: Option<&str>,
        turn_key: Option<&str>,
    ) -> &Self {
        self.reply(obs).reply(replies::step(reward, done, sent));
        if let Some(info) = info {
            self.reply(info);
        }
        if let Some(key) = turn_key {
            self.reply(key);
        }
        self
    }

    /// Queue a 4-byte status reply (quit, find, close, init, exit).
    pub fn status_reply(&self, status: u32) -> &Self {
        self.reply(replies::status(status))
    }

    /// Every payload sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).sent.clone()
    }

    /// Sent payloads decoded lossily as UTF-8.
    pub fn sent_text(&self) -> Vec<String> {
        lock(&self.inner)
            .sent
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Number of sent payloads starting with `prefix`.
    pub fn sent_count(&self, prefix: &str) -> usize {
        self.sent_text()
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }

    /// Replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        lock(&self.inner).replies.len()
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.inner).shut_down
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut script = lock(&self.inner);
        if script.shut_down {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport shut down"));
        }
        script.sent.push(payload.to_vec());
        Ok(())
    }

    fn receive(&mut self) -> io::Result<Vec<u8>> {
        let mut script = lock(&self.inner);
        if script.shut_down {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport shut down"));
        }
        script
            .replies
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        lock(&self.inner).shut_down = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedConnector
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Dial {
    Accept(ScriptedTransport),
    Refuse,
}

#[derive(Debug, Default)]
struct Switchboard {
    queues: HashMap<Endpoint, VecDeque<Dial>>,
    attempts: Vec<Endpoint>,
}

/// Connector handing out scripted transports per endpoint, in queue order.
///
/// A connect to an endpoint with an empty queue is refused.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<Mutex<Switchboard>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the next connect to `endpoint` with `transport`.
    pub fn accept(&self, endpoint: &Endpoint, transport: &ScriptedTransport) -> &Self {
        lock(&self.inner)
            .queues
            .entry(endpoint.clone())
            .or_default()
            .push_back(Dial::Accept(transport.clone()));
        self
    }

    /// Refuse the next `times` connects to `endpoint`.
    pub fn refuse(&self, endpoint: &Endpoint, times: usize) -> &Self {
        let mut board = lock(&self.inner);
        let queue = board.queues.entry(endpoint.clone()).or_default();
        for _ in 0..times {
            queue.push_back(Dial::Refuse);
        }
        self
    }

    /// Every connect attempt, in order.
    pub fn attempts(&self) -> Vec<Endpoint> {
        lock(&self.inner).attempts.clone()
    }

    /// Connect attempts made to `endpoint`.
    pub fn attempts_to(&self, endpoint: &Endpoint) -> usize {
        lock(&self.inner)
            .attempts
            .iter()
            .filter(|e| *e == endpoint)
            .count()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>> {
        let mut board = lock(&self.inner);
        board.attempts.push(endpoint.clone());
        match board.queues.get_mut(endpoint).and_then(VecDeque::pop_front) {
            Some(Dial::Accept(transport)) => Ok(Box::new(transport)),
            Some(Dial::Refuse) | None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection to {endpoint} refused"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_replays_in_order() {
        let script = ScriptedTransport::new();
        script.reply("a").reply("b");
        let mut t = script.clone();
        assert_eq!(t.receive().unwrap(), b"a");
        assert_eq!(t.receive().unwrap(), b"b");
        assert_eq!(
            t.receive().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn transport_records_sent() {
        let script = ScriptedTransport::new();
        let mut t = script.clone();
        t.send(b"<Peek/>").unwrap();
        assert_eq!(script.sent_text(), vec!["<Peek/>".to_string()]);
        assert_eq!(script.sent_count("<Peek"), 1);
    }

    #[test]
    fn shutdown_fails_further_io() {
        let script = ScriptedTransport::new();
        let mut t = script.clone();
        t.shutdown().unwrap();
        assert!(script.is_shut_down());
        assert!(t.send(b"x").is_err());
    }

    #[test]
    fn connector_refuses_then_accepts() {
        let ep = Endpoint::new("localhost", 9000);
        let script = ScriptedTransport::new();
        let connector = ScriptedConnector::new();
        connector.refuse(&ep, 2).accept(&ep, &script);

        assert!(connector.connect(&ep).is_err());
        assert!(connector.connect(&ep).is_err());
        assert!(connector.connect(&ep).is_ok());
        assert!(connector.connect(&ep).is_err());
        assert_eq!(connector.attempts_to(&ep), 4);
    }
}
