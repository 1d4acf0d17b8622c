use crate::config::HeosOptions;
use crate::connection::{ConnectionState, HeosConnection};
use crate::dispatch::{Dispatcher, HandlerId};
use crate::error::Result;
use crate::player::Player;
use crate::protocol::{Command, HeosMessage};
use crate::registry::PlayerRegistry;
use crate::subscription::UpdateReceiver;
use crate::types::{Event, PlayerId, SIGNAL_HEOS_EVENT, SIGNAL_PLAYER_UPDATED};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};

/// Client for a HEOS system
///
/// The `HeosClient` owns the session with one player of the system, the
/// registry of every player it reports, and the [`Dispatcher`] on which
/// change events and player updates are published.
pub struct HeosClient {
    connection: Arc<HeosConnection>,
    dispatcher: Dispatcher<Event>,
    players: PlayerRegistry,
    handlers: Mutex<Vec<HandlerId>>,
    updates: broadcast::Sender<Event>,
}

impl HeosClient {
    /// Create a client; nothing is opened until [`HeosClient::connect`]
    pub fn new(options: HeosOptions) -> Self {
        let (updates, _) = broadcast::channel(options.event_buffer.max(1));
        let dispatcher = Dispatcher::new();

        for signal in [SIGNAL_PLAYER_UPDATED, SIGNAL_HEOS_EVENT] {
            let updates = updates.clone();
            dispatcher.subscribe(signal, move |event: &Event| {
                // No receivers is not an error
                let _ = updates.send(event.clone());
                Ok(())
            });
        }

        Self {
            connection: HeosConnection::new(options, dispatcher.clone()),
            dispatcher,
            players: PlayerRegistry::new(),
            handlers: Mutex::new(Vec::new()),
            updates,
        }
    }

    /// Connect to the player and load every player of the system
    ///
    /// # Example
    ///
    /// ```no_run
    /// use heos::{HeosClient, HeosOptions};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = HeosClient::new(HeosOptions::new("192.168.1.100"));
    ///     client.connect().await?;
    ///     for player in client.players() {
    ///         println!("{} is {}", player, player.play_state());
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(&self) -> Result<()> {
        self.install_handlers();
        if let Err(e) = self.connection.connect().await {
            self.remove_handlers();
            return Err(e);
        }

        if let Err(e) = self.players.load_players(&self.connection).await {
            tracing::warn!("Failed to load players: {}", e);
            self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    /// Close the session and forget every player
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.remove_handlers();
        self.players.clear();
    }

    fn install_handlers(&self) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if handlers.is_empty() {
            *handlers = self
                .players
                .install_handlers(&self.connection, &self.dispatcher);
        }
    }

    // Player handlers hold the connection, which holds the dispatcher
    fn remove_handlers(&self) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        for id in handlers.drain(..) {
            self.dispatcher.unsubscribe(id);
        }
    }

    /// Get a player by id; `None` if the system has no such player
    pub fn get_player(&self, id: PlayerId) -> Option<Player> {
        self.players.get(id)
    }

    /// All players, ordered by id
    pub fn players(&self) -> Vec<Player> {
        self.players.all()
    }

    /// Reload the player list and every player's state
    pub async fn load_players(&self) -> Result<()> {
        self.players.load_players(&self.connection).await
    }

    /// The dispatcher on which events and updates are published
    ///
    /// Player updates are published under [`SIGNAL_PLAYER_UPDATED`],
    /// connection lifecycle events under [`SIGNAL_HEOS_EVENT`], and raw change
    /// events under their command name, e.g. `event/player_state_changed`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use heos::{Event, HeosClient, HeosOptions, SIGNAL_PLAYER_UPDATED};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = HeosClient::new(HeosOptions::new("192.168.1.100"));
    /// client.dispatcher().subscribe(SIGNAL_PLAYER_UPDATED, |event: &Event| {
    ///     println!("{:?}", event);
    ///     Ok(())
    /// });
    /// client.connect().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn dispatcher(&self) -> &Dispatcher<Event> {
        &self.dispatcher
    }

    /// Send a raw command and return its terminal response
    ///
    /// No command specific validation is performed.
    pub async fn send_command(&self, command: Command) -> Result<HeosMessage> {
        self.connection.send_command(command).await
    }

    /// Subscribe to player updates and connection lifecycle events
    ///
    /// Multiple receivers can be active simultaneously.
    pub fn subscribe_updates(&self) -> UpdateReceiver {
        UpdateReceiver::new(self.updates.subscribe())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch the connection state
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn options(&self) -> &HeosOptions {
        self.connection.options()
    }
}

impl Drop for HeosClient {
    fn drop(&mut self) {
        self.remove_handlers();
        self.players.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeosError;
    use crate::types::HeosEvent;

    #[tokio::test]
    async fn starts_disconnected() {
        let client = HeosClient::new(HeosOptions::new("127.0.0.1"));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(client.players().is_empty());
        assert!(client.get_player(1).is_none());
        assert!(matches!(
            client
                .send_command(Command::new("player/get_players"))
                .await,
            Err(HeosError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn forwards_lifecycle_events_to_receivers() {
        let client = HeosClient::new(HeosOptions::new("127.0.0.1"));
        let mut updates = client.subscribe_updates();

        client
            .dispatcher()
            .publish(SIGNAL_HEOS_EVENT, Event::Heos(HeosEvent::Connected));

        assert!(matches!(
            updates.try_recv(),
            Ok(Some(Event::Heos(HeosEvent::Connected)))
        ));
    }

    #[tokio::test]
    async fn failed_connect_leaves_no_handlers() {
        // Nothing listens on port 1 of the loopback interface
        let client = HeosClient::new(HeosOptions::new("127.0.0.1").with_port(1));
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            client
                .dispatcher()
                .handler_count("event/player_state_changed"),
            0
        );
    }
}
