use crate::codec::HeosCodec;
use crate::error::{HeosError, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// One framed TCP connection to a player
///
/// Carries no protocol semantics beyond line framing. The socket is released
/// by [`Transport::close`] or when the transport is dropped.
pub struct Transport {
    peer: String,
    framed: Option<Framed<TcpStream, HeosCodec>>,
}

impl Transport {
    /// Open a connection to `host:port`
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        max_frame_length: usize,
    ) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        tracing::debug!("Opening connection to {}", peer);

        let stream = match timeout(connect_timeout, TcpStream::connect(&peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(HeosError::Connection(format!(
                    "Unable to connect to {}: {}",
                    peer, e
                )))
            }
            Err(_) => {
                return Err(HeosError::Connection(format!(
                    "Timed out connecting to {}",
                    peer
                )))
            }
        };
        stream.set_nodelay(true)?;

        Ok(Self {
            peer,
            framed: Some(Framed::new(stream, HeosCodec::new(max_frame_length))),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    /// Write one frame
    pub async fn send(&mut self, line: &str) -> Result<()> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| HeosError::Connection(format!("Connection to {} is closed", self.peer)))?;

        framed
            .send(line.to_string())
            .await
            .map_err(|e| HeosError::Connection(format!("Write to {} failed: {}", self.peer, e)))
    }

    /// Wait for the next complete frame
    ///
    /// Cancel safe: a partially received frame stays buffered.
    pub async fn receive(&mut self) -> Result<String> {
        let framed = self.framed.as_mut().ok_or(HeosError::ConnectionClosed)?;

        match framed.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(HeosError::Connection(format!(
                "Read from {} failed: {}",
                self.peer, e
            ))),
            None => Err(HeosError::ConnectionClosed),
        }
    }

    /// Shut the connection down; calling it again is a no-op
    pub async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            if let Err(e) = framed.close().await {
                tracing::debug!("Error closing connection to {}: {}", self.peer, e);
            }
            tracing::debug!("Closed connection to {}", self.peer);
        }
    }
}
