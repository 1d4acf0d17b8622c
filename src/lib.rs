//! Rust library for controlling HEOS networked media players
//!
//! This library provides an async API for the HEOS CLI protocol spoken by
//! Denon and Marantz players on TCP port 1255. It supports:
//!
//! - A command connection with one in-flight command and FIFO queuing
//! - A separate event connection registered for change events
//! - A player registry kept current by change events
//! - Playback, volume, mute, play mode and queue control
//! - Callback subscriptions through a [`Dispatcher`] and channel based
//!   subscriptions through [`UpdateReceiver`]
//! - Heart beats and optional automatic reconnect
//!
//! # Quick Start
//!
//! ```no_run
//! use heos::{Event, HeosClient, HeosOptions, PlayState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HeosClient::new(HeosOptions::new("192.168.1.100"));
//!     client.connect().await?;
//!
//!     if let Some(player) = client.players().first() {
//!         println!("Found player: {}", player);
//!
//!         // Control the player
//!         player.set_volume(20).await?;
//!         player.set_state(PlayState::Playing).await?;
//!
//!         // Wait for the resulting change event
//!         let mut updates = client.subscribe_updates();
//!         while let Ok(update) = updates.recv().await {
//!             if let Event::PlayerUpdated { player_id, event } = update {
//!                 println!("Player {} changed: {}", player_id, event);
//!                 break;
//!             }
//!         }
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! [`HeosOptions`] can also be read from `HEOS_*` environment variables (and
//! a `.env` file):
//!
//! ```no_run
//! use heos::{HeosClient, HeosOptions};
//!
//! # async fn example() -> heos::Result<()> {
//! let client = HeosClient::new(HeosOptions::from_env());
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: session ownership and player access
//! - **Player**: per-player state and command helpers
//! - **Registry**: players keyed by id, and the handlers applying change events
//! - **Connection**: command/event connections, correlation, reconnect
//! - **Dispatcher**: signal keyed publish/subscribe
//! - **Transport**: one framed TCP connection
//! - **Protocol**: command URIs and response frames
//! - **Types**: domain types and data structures

mod client;
mod codec;
mod config;
mod connection;
mod dispatch;
mod error;
mod player;
mod protocol;
mod registry;
mod subscription;
mod transport;
mod types;

// Public exports
pub use client::HeosClient;
pub use codec::HeosCodec;
pub use config::{HeosOptions, CLI_PORT};
pub use connection::{ConnectionState, HeosConnection};
pub use dispatch::{Dispatcher, HandlerId};
pub use error::{HeosError, Result};
pub use player::{Player, PlayerState};
pub use protocol::{commands, Command, HeosMessage};
pub use registry::PlayerRegistry;
pub use subscription::UpdateReceiver;
pub use transport::Transport;
pub use types::{
    Event, HeosEvent, NowPlayingMedia, INPUTS, PlayState, PlayerEvent, PlayerId, PlayerInfo, RepeatMode,
    SIGNAL_HEOS_EVENT, SIGNAL_PLAYER_UPDATED,
};
