//! Transport seams consumed by the session protocol.
//!
//! The protocol only needs to push an opaque payload and pull the next one,
//! strictly in order. [`Transport`] is that pair of operations over one
//! connected stream; [`Connector`] opens new streams to an [`Endpoint`].

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

/// A reachable `host:port` of a MalmoEnv service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Framed, ordered message exchange over one connected stream.
pub trait Transport: Send {
    /// Send one complete message.
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Block until the next complete message arrives.
    fn receive(&mut self) -> io::Result<Vec<u8>>;

    /// Close the underlying stream. Further calls fail.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        (**self).send(payload)
    }

    fn receive(&mut self) -> io::Result<Vec<u8>> {
        (**self).receive()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// Opens connections to service endpoints.
pub trait Connector: Send {
    fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>>;
}
