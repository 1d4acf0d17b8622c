use crate::connection::{ConnectionState, HeosConnection};
use crate::dispatch::{Dispatcher, HandlerId};
use crate::error::{HeosError, Result};
use crate::player::Player;
use crate::protocol::{commands, Command};
use crate::types::{
    Event, HeosEvent, PlayerEvent, PlayerId, PlayerInfo, SIGNAL_HEOS_EVENT, SIGNAL_PLAYER_UPDATED,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Players known to the session, keyed by id
#[derive(Clone, Default)]
pub struct PlayerRegistry {
    players: Arc<Mutex<BTreeMap<PlayerId, Player>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn players(&self) -> MutexGuard<'_, BTreeMap<PlayerId, Player>> {
        self.players.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: PlayerId) -> Option<Player> {
        self.players().get(&id).cloned()
    }

    /// All players, ordered by id
    pub fn all(&self) -> Vec<Player> {
        self.players().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.players().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players().is_empty()
    }

    pub fn clear(&self) {
        self.players().clear();
    }

    /// Discover the players of the system and refresh their state
    ///
    /// Players whose static attributes did not change keep their existing
    /// instance, so handles held by consumers stay live across a reconnect.
    pub async fn load_players(&self, connection: &Arc<HeosConnection>) -> Result<()> {
        let response = connection
            .send_command(Command::new(commands::GET_PLAYERS))
            .await?;
        let entries = response
            .payload()
            .and_then(|payload| payload.as_array())
            .ok_or_else(|| {
                HeosError::InvalidResponse("No player list in get_players response".to_string())
            })?;

        let mut players = BTreeMap::new();
        {
            let existing = self.players();
            for entry in entries {
                let info: PlayerInfo = match serde_json::from_value(entry.clone()) {
                    Ok(info) => info,
                    Err(e) => {
                        tracing::warn!("Failed to parse player {}: {}", entry, e);
                        continue;
                    }
                };
                let player = match existing.get(&info.id) {
                    Some(player) if *player.info() == info => player.clone(),
                    _ => Player::new(connection.clone(), info),
                };
                players.insert(player.id(), player);
            }
        }
        *self.players() = players;

        for player in self.all() {
            player.refresh().await?;
        }
        tracing::debug!("Loaded {} players", self.len());
        Ok(())
    }

    /// Subscribe the handlers that keep players current
    ///
    /// Returns the handler ids so the owner can unsubscribe them on teardown.
    pub fn install_handlers(
        &self,
        connection: &Arc<HeosConnection>,
        dispatcher: &Dispatcher<Event>,
    ) -> Vec<HandlerId> {
        let all_progress_events = connection.options().all_progress_events;
        let mut ids = Vec::new();

        for event in PlayerEvent::ALL {
            let registry = self.clone();
            let publisher = dispatcher.clone();

            let id = match event {
                // Needs a follow-up fetch, so runs off the read loop
                PlayerEvent::NowPlayingChanged => {
                    dispatcher.subscribe_async(event.command(), move |payload: Event| {
                        let registry = registry.clone();
                        let publisher = publisher.clone();
                        async move {
                            let Some(player) = registry.event_target(&payload)? else {
                                return Ok(());
                            };
                            player.refresh_now_playing_media().await?;
                            publish_update(&publisher, player.id(), event);
                            Ok(())
                        }
                    })
                }
                _ => dispatcher.subscribe(event.command(), move |payload: &Event| {
                    let Some(player) = registry.event_target(payload)? else {
                        return Ok(());
                    };
                    let Event::Message(message) = payload else {
                        return Ok(());
                    };
                    if player.apply_event(event, message, all_progress_events)? {
                        publish_update(&publisher, player.id(), event);
                    }
                    Ok(())
                }),
            };
            ids.push(id);
        }

        let registry = self.clone();
        let weak = Arc::downgrade(connection);
        ids.push(dispatcher.subscribe(SIGNAL_HEOS_EVENT, move |payload: &Event| {
            if !matches!(payload, Event::Heos(HeosEvent::Disconnected)) {
                return Ok(());
            }
            // Kept while reconnecting so handles survive the reload
            let reconnecting = weak
                .upgrade()
                .is_some_and(|c| c.state() != ConnectionState::Disconnected);
            if !reconnecting {
                registry.clear();
            }
            Ok(())
        }));

        let registry = self.clone();
        let weak = Arc::downgrade(connection);
        ids.push(dispatcher.subscribe_async(SIGNAL_HEOS_EVENT, move |payload: Event| {
            let registry = registry.clone();
            let weak = weak.clone();
            async move {
                if !matches!(payload, Event::Heos(HeosEvent::Reconnected)) {
                    return Ok(());
                }
                let Some(connection) = weak.upgrade() else {
                    return Ok(());
                };
                registry.load_players(&connection).await
            }
        }));

        ids
    }

    /// Resolve the player an event frame is about
    ///
    /// `Ok(None)` for a player that is not (or no longer) known.
    fn event_target(&self, payload: &Event) -> Result<Option<Player>> {
        let Event::Message(message) = payload else {
            return Ok(None);
        };
        let player_id = message.player_id()?;
        let player = self.get(player_id);
        if player.is_none() {
            tracing::debug!("Event for unknown player {}: {}", player_id, message);
        }
        Ok(player)
    }
}

fn publish_update(dispatcher: &Dispatcher<Event>, player_id: PlayerId, event: PlayerEvent) {
    dispatcher.publish(
        SIGNAL_PLAYER_UPDATED,
        Event::PlayerUpdated { player_id, event },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeosOptions;
    use crate::protocol::HeosMessage;
    use crate::types::PlayState;

    // Publish a frame as if it arrived on the event connection
    fn inject(dispatcher: &Dispatcher<Event>, message: HeosMessage) -> usize {
        let signal = message.command().to_string();
        dispatcher.publish(&signal, Event::Message(Arc::new(message)))
    }

    fn info(id: PlayerId, name: &str) -> PlayerInfo {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "pid": id,
            "model": "HEOS Drive",
            "version": "1.493.180",
            "ip": format!("192.168.0.{}", id),
            "network": "wired",
            "lineout": 1
        }))
        .unwrap()
    }

    fn setup(all_progress_events: bool) -> (PlayerRegistry, Dispatcher<Event>, Arc<HeosConnection>) {
        let dispatcher = Dispatcher::new();
        let options = HeosOptions::new("127.0.0.1").with_all_progress_events(all_progress_events);
        let connection = HeosConnection::new(options, dispatcher.clone());
        let registry = PlayerRegistry::new();
        for (id, name) in [(1, "Back Patio"), (2, "Front Porch")] {
            let player = Player::new(connection.clone(), info(id, name));
            registry.players().insert(id, player);
        }
        registry.install_handlers(&connection, &dispatcher);
        (registry, dispatcher, connection)
    }

    fn event(command: &str, message: &str) -> HeosMessage {
        HeosMessage::parse(&format!(
            r#"{{"heos": {{"command": "{}", "message": "{}"}}}}"#,
            command, message
        ))
        .unwrap()
    }

    fn record_updates(dispatcher: &Dispatcher<Event>) -> Arc<Mutex<Vec<(PlayerId, PlayerEvent)>>> {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        dispatcher.subscribe(SIGNAL_PLAYER_UPDATED, move |payload: &Event| {
            if let Event::PlayerUpdated { player_id, event } = payload {
                sink.lock().unwrap().push((*player_id, *event));
            }
            Ok(())
        });
        updates
    }

    #[test]
    fn state_event_targets_one_player() {
        let (registry, dispatcher, _connection) = setup(true);
        let updates = record_updates(&dispatcher);

        inject(
            &dispatcher,
            event("event/player_state_changed", "pid=1&state=play"),
        );

        assert_eq!(registry.get(1).unwrap().play_state(), PlayState::Playing);
        assert_eq!(registry.get(2).unwrap().play_state(), PlayState::Stopped);
        assert_eq!(
            *updates.lock().unwrap(),
            vec![(1, PlayerEvent::StateChanged)]
        );
    }

    #[test]
    fn event_for_unknown_player_is_noop() {
        let (registry, dispatcher, _connection) = setup(true);
        let updates = record_updates(&dispatcher);

        inject(
            &dispatcher,
            event("event/player_volume_changed", "pid=99&level=10&mute=off"),
        );

        assert!(updates.lock().unwrap().is_empty());
        assert_eq!(registry.get(1).unwrap().volume(), 0);
        assert!(registry.get(99).is_none());
    }

    #[test]
    fn unrecognized_event_has_no_handler() {
        let (_registry, dispatcher, _connection) = setup(true);
        assert_eq!(
            inject(&dispatcher, event("event/groups_changed", "")),
            0
        );
    }

    #[test]
    fn progress_events_can_be_silenced() {
        let (registry, dispatcher, _connection) = setup(false);
        let updates = record_updates(&dispatcher);

        inject(
            &dispatcher,
            event(
                "event/player_now_playing_progress",
                "pid=2&cur_pos=5000&duration=180000",
            ),
        );

        let media = registry.get(2).unwrap().now_playing_media();
        assert_eq!(media.current_position, Some(5000));
        assert_eq!(media.duration, Some(180000));
        assert!(updates.lock().unwrap().is_empty());
    }

    #[test]
    fn explicit_disconnect_clears_players() {
        let (registry, dispatcher, _connection) = setup(true);
        dispatcher.publish(SIGNAL_HEOS_EVENT, Event::Heos(HeosEvent::Connected));
        assert_eq!(registry.len(), 2);

        dispatcher.publish(SIGNAL_HEOS_EVENT, Event::Heos(HeosEvent::Disconnected));
        assert!(registry.is_empty());
    }
}
