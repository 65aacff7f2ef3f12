//! Default TCP transport.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use malmo_core::transport::{Connector, Endpoint, Transport};

use crate::framing::FramedStream;

/// Length-prefixed frames over a `TcpStream` with `TCP_NODELAY` set.
#[derive(Debug)]
pub struct TcpTransport {
    inner: FramedStream<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, read_timeout: Option<Duration>) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(read_timeout)?;
        Ok(Self {
            inner: FramedStream::new(stream),
        })
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.inner.get_ref().peer_addr()
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        self.inner.send(payload)
    }

    fn receive(&mut self) -> io::Result<Vec<u8>> {
        self.inner.receive()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.inner.get_ref().shutdown(Shutdown::Both)
    }
}

/// Opens [`TcpTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector {
    read_timeout: Option<Duration>,
}

impl TcpConnector {
    pub const fn new(read_timeout: Option<Duration>) -> Self {
        Self { read_timeout }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Transport>> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))?;
        Ok(Box::new(TcpTransport::new(stream, self.read_timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;
    use crate::framing::{read_frame, write_frame};

    #[test]
    fn exchanges_frames_with_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, &1u32.to_be_bytes()).unwrap();
            request
        });

        let connector = TcpConnector::new(Some(Duration::from_secs(5)));
        let mut transport = connector.connect(&Endpoint::new("127.0.0.1", port)).unwrap();
        transport.send(b"<Quit/>").unwrap();
        assert_eq!(transport.receive().unwrap(), vec![0, 0, 0, 1]);
        transport.shutdown().unwrap();

        assert_eq!(handle.join().unwrap(), b"<Quit/>");
    }

    #[test]
    fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TcpConnector::default();
        assert!(connector.connect(&Endpoint::new("127.0.0.1", port)).is_err());
    }
}
