//! Blocking command-channel client.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{MeterResult, TransportError};

/// A connection to a running command channel.
#[derive(Debug)]
pub struct CommandClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl CommandClient {
    /// Connect to `addr`.
    pub fn connect(addr: impl ToSocketAddrs) -> MeterResult<Self> {
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::ConnectionFailed {
            message: e.to_string(),
        })?;
        let reader = BufReader::new(stream.try_clone().map_err(TransportError::Io)?);
        Ok(Self { writer: stream, reader })
    }

    /// Fail reads that take longer than `timeout`.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> MeterResult<()> {
        self.writer.set_read_timeout(timeout).map_err(TransportError::Io)?;
        Ok(())
    }

    /// Send one command and wait for its response line.
    ///
    /// Blank commands are not sent: the server treats them as a hang-up.
    pub fn send(&mut self, command: &str) -> MeterResult<String> {
        let command = command.trim();
        if command.is_empty() {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
            .into());
        }

        writeln!(self.writer, "{command}").map_err(TransportError::Io)?;
        self.writer.flush().map_err(TransportError::Io)?;

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).map_err(TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::ClosedByPeer.into());
        }
        Ok(line.trim_end().to_string())
    }
}

/// Connect, send one command, return the response.
pub fn send_command(addr: impl ToSocketAddrs, command: &str) -> MeterResult<String> {
    CommandClient::connect(addr)?.send(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn blank_command_is_rejected_locally() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = CommandClient::connect(addr).unwrap();
        assert!(client.send("   ").unwrap_err().is_transport());
    }

    #[test]
    fn connect_refused_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = CommandClient::connect(addr).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn closed_peer_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });
        let mut client = CommandClient::connect(addr).unwrap();
        server.join().unwrap();
        let err = client.send("status").unwrap_err();
        assert!(err.is_transport());
    }
}
