use crate::error::{HeosError, Result};
use crate::types::Event;
use tokio::sync::broadcast;

/// Receiver for player updates and connection lifecycle events
///
/// Yields every [`Event::PlayerUpdated`] and [`Event::Heos`] published after
/// the receiver was created.
pub struct UpdateReceiver {
    rx: broadcast::Receiver<Event>,
}

impl UpdateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Receive the next update
    ///
    /// Fails with [`HeosError::ConnectionClosed`] once the client is dropped,
    /// or [`HeosError::ChannelError`] when this receiver fell behind; updates
    /// continue after a lag error.
    pub async fn recv(&mut self) -> Result<Event> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => HeosError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                HeosError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an update without blocking
    ///
    /// Returns `None` if no update is available.
    pub fn try_recv(&mut self) -> Result<Option<Event>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(HeosError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(HeosError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}
