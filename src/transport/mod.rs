//! TCP transport for the command channel.
//!
//! Each accepted connection gets its own task. A read carries one command,
//! or several separated by newlines; every command is answered with one
//! response line. After the first newline a partial line is buffered until
//! it is terminated. Blank input, invalid UTF-8 or a peer hang-up ends the
//! connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use crate::error::{MeterResult, TransportError};
use crate::meter::Meter;

/// Maximum bytes consumed per read.
const MAX_READ_BYTES: usize = 1024;

/// Command-channel server bound to a TCP address.
#[derive(Debug)]
pub struct CommandServer {
    listener: TcpListener,
    meter: Arc<Meter>,
}

impl CommandServer {
    /// Bind the listener.
    pub async fn bind(addr: SocketAddr, meter: Arc<Meter>) -> MeterResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| TransportError::BindFailed {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { listener, meter })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> MeterResult<SocketAddr> {
        Ok(self.listener.local_addr().map_err(TransportError::Io)?)
    }

    /// Accept connections until `shutdown` completes.
    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> MeterResult<()> {
        tokio::pin!(shutdown);
        tracing::info!(addr = ?self.listener.local_addr().ok(), "command channel listening");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let meter = Arc::clone(&self.meter);
                        tokio::spawn(handle_connection(stream, peer, meter));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
            }
        }

        tracing::info!("command channel stopped");
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, meter: Arc<Meter>) {
    let conn_id = Uuid::new_v4();
    tracing::debug!(%conn_id, %peer, "client connected");
    match serve_client(stream, &meter).await {
        Ok(()) => {}
        Err(e @ TransportError::ProtocolViolation { .. }) => {
            tracing::warn!(%conn_id, %peer, error = %e, "closing connection");
        }
        Err(e) => tracing::debug!(%conn_id, error = %e, "connection ended with error"),
    }
    tracing::debug!(%conn_id, "client disconnected");
}

async fn serve_client(mut stream: TcpStream, meter: &Meter) -> Result<(), TransportError> {
    let mut buf = vec![0u8; MAX_READ_BYTES];
    let mut pending: Vec<u8> = Vec::new();
    // Set once the peer terminates a command with a newline; from then on a
    // trailing partial line waits for the rest instead of being answered.
    let mut line_framed = false;

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);

        let complete: Vec<u8> = match pending.iter().rposition(|&b| b == b'\n') {
            Some(end) => {
                line_framed = true;
                pending.drain(..=end).collect()
            }
            None if !line_framed => std::mem::take(&mut pending),
            None if pending.len() > MAX_READ_BYTES => {
                return Err(TransportError::ProtocolViolation {
                    message: format!("command line exceeds {MAX_READ_BYTES} bytes"),
                });
            }
            None => continue,
        };

        let commands = split_commands(&complete)?;
        if commands.is_empty() {
            if pending.is_empty() {
                return Ok(());
            }
            continue;
        }

        let mut out = String::new();
        for command in commands {
            out.push_str(&meter.handle_line(command));
            out.push('\n');
        }
        stream.write_all(out.as_bytes()).await?;
    }
}

/// Split received bytes into trimmed, non-empty command lines.
fn split_commands(bytes: &[u8]) -> Result<Vec<&str>, TransportError> {
    let text = std::str::from_utf8(bytes).map_err(|e| TransportError::ProtocolViolation {
        message: format!("command is not valid UTF-8: {e}"),
    })?;
    Ok(text.split('\n').map(str::trim).filter(|l| !l.is_empty()).collect())
}
