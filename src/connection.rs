use crate::config::HeosOptions;
use crate::dispatch::Dispatcher;
use crate::error::{HeosError, Result};
use crate::protocol::{commands, Command, HeosMessage};
use crate::transport::Transport;
use crate::types::{Event, HeosEvent, SIGNAL_HEOS_EVENT};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Command and event connections to one player, run as a single session
///
/// Commands are written to the command connection one at a time; callers
/// queue on a fair lock. The event connection is registered for change
/// events and drained by a background task that publishes every event frame
/// on the [`Dispatcher`] under the frame's command name.
pub struct HeosConnection {
    options: HeosOptions,
    dispatcher: Dispatcher<Event>,
    command: Mutex<Option<Transport>>,
    /// Held while a session is being opened
    opening: Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    /// Cancelled when the current session ends
    session: StdMutex<CancellationToken>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    sequence: AtomicU64,
    last_activity: StdMutex<Instant>,
    auto_reconnect: AtomicBool,
    this: Weak<HeosConnection>,
}

impl HeosConnection {
    pub fn new(options: HeosOptions, dispatcher: Dispatcher<Event>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let auto_reconnect = AtomicBool::new(options.auto_reconnect);
        let session = CancellationToken::new();
        session.cancel();

        Arc::new_cyclic(|this| Self {
            options,
            dispatcher,
            command: Mutex::new(None),
            opening: Mutex::new(()),
            state_tx,
            session: StdMutex::new(session),
            tasks: StdMutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            last_activity: StdMutex::new(Instant::now()),
            auto_reconnect,
            this: this.clone(),
        })
    }

    pub fn options(&self) -> &HeosOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch the session state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn session_token(&self) -> CancellationToken {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_since(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Open both connections and register for change events
    ///
    /// Does nothing when already connected. Concurrent callers share one
    /// session: later ones wait for the first attempt and return once it is
    /// up. On failure every opened socket is released and the state returns
    /// to `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        let _opening = self.opening.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.state_tx.send_replace(ConnectionState::Connecting);

        if let Err(e) = self.open_session().await {
            self.state_tx.send_replace(ConnectionState::Disconnected);
            tracing::debug!("Failed to connect to {}: {}", self.options.host, e);
            return Err(e);
        }

        self.auto_reconnect
            .store(self.options.auto_reconnect, Ordering::SeqCst);
        self.state_tx.send_replace(ConnectionState::Connected);
        tracing::info!("Connected to {}", self.options.host);
        self.dispatcher
            .publish(SIGNAL_HEOS_EVENT, Event::Heos(HeosEvent::Connected));
        Ok(())
    }

    async fn open_session(&self) -> Result<()> {
        let options = &self.options;
        let mut command =
            Transport::connect(&options.host, options.port, options.timeout, options.max_frame_length)
                .await?;
        let mut events =
            match Transport::connect(&options.host, options.port, options.timeout, options.max_frame_length)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    command.close().await;
                    return Err(e);
                }
            };

        let register = self.prepare(
            Command::new(commands::REGISTER_FOR_CHANGE_EVENTS).param("enable", "on"),
        );
        let registered = match self.exchange(&mut events, &register).await {
            Ok(response) => response.error_for_result(),
            Err(e) => Err(e),
        };
        if let Err(e) = registered {
            command.close().await;
            events.close().await;
            return Err(HeosError::Connection(format!(
                "Failed to register for change events: {}",
                e
            )));
        }

        let token = CancellationToken::new();
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        *self.command.lock().await = Some(command);
        self.touch();

        self.track(tokio::spawn(Self::event_loop(
            self.this.clone(),
            events,
            token.clone(),
        )));
        if let Some(interval) = options.heart_beat.filter(|i| !i.is_zero()) {
            self.track(tokio::spawn(Self::heart_beat(
                self.this.clone(),
                interval,
                token,
            )));
        }
        Ok(())
    }

    /// Close both connections and stop background work
    ///
    /// Callers blocked in [`HeosConnection::send_command`] are released with
    /// [`HeosError::ConnectionClosed`].
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.session_token().cancel();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        if let Some(mut transport) = self.command.lock().await.take() {
            transport.close().await;
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        tracing::info!("Disconnected from {}", self.options.host);
        self.dispatcher
            .publish(SIGNAL_HEOS_EVENT, Event::Heos(HeosEvent::Disconnected));
    }

    fn prepare(&self, command: Command) -> Command {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        command.param("sequence", sequence)
    }

    /// Send a command and wait for its terminal response
    ///
    /// Only one command is in flight at a time; later callers wait their
    /// turn. Fails with [`HeosError::Command`] when the device rejects the
    /// command, [`HeosError::Timeout`] when no terminal frame arrives in
    /// time, and [`HeosError::ConnectionClosed`] when the session ends first.
    pub async fn send_command(&self, command: Command) -> Result<HeosMessage> {
        let mut guard = self.command.lock().await;
        // Numbered under the lock so sequence order is wire order
        let command = self.prepare(command);
        let token = self.session_token();
        if token.is_cancelled() || self.state() != ConnectionState::Connected {
            tracing::debug!("Command failed '{}': not connected", command);
            return Err(HeosError::ConnectionClosed);
        }
        let Some(transport) = guard.as_mut() else {
            return Err(HeosError::ConnectionClosed);
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(HeosError::ConnectionClosed),
            result = self.exchange(transport, &command) => result,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Command failed '{}': {}", command, e);
                if e.is_connection_error() && !token.is_cancelled() {
                    if let Some(mut transport) = guard.take() {
                        transport.close().await;
                    }
                    drop(guard);
                    self.connection_lost(&e).await;
                    return Err(HeosError::ConnectionClosed);
                }
                return Err(e);
            }
        };
        drop(guard);

        match response.result() {
            Some(false) => tracing::debug!("Command failed '{}': {}", command, response),
            _ => tracing::debug!("Command executed '{}': {}", command, response),
        }
        response.error_for_result()
    }

    /// Write `command` and read frames until its terminal response
    ///
    /// Frames answering some other command are discarded, as are
    /// "command under process" frames for this one; each of the latter
    /// re-arms the deadline with `under_process_timeout`.
    async fn exchange(&self, transport: &mut Transport, command: &Command) -> Result<HeosMessage> {
        transport.send(&command.to_uri()).await?;

        let keys = &self.options.correlation_keys;
        let mut deadline = Instant::now() + self.options.timeout;
        loop {
            let frame = match timeout_at(deadline, transport.receive()).await {
                Ok(frame) => frame?,
                Err(_) => return Err(HeosError::Timeout),
            };
            self.touch();

            let message = match HeosMessage::parse(&frame) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Dropping malformed frame '{}': {}", frame, e);
                    continue;
                }
            };
            if !command.is_answered_by(&message, keys) {
                tracing::debug!("Discarding unrelated frame: {}", message);
                continue;
            }
            if message.is_under_process() {
                tracing::debug!("Command under process '{}': {}", command, message);
                deadline = Instant::now() + self.options.under_process_timeout;
                continue;
            }
            return Ok(message);
        }
    }

    async fn event_loop(this: Weak<Self>, mut transport: Transport, token: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = transport.receive() => frame,
            };
            let Some(connection) = this.upgrade() else {
                break;
            };

            match frame {
                Ok(frame) => {
                    connection.touch();
                    connection.handle_event_frame(&frame);
                }
                Err(e) => {
                    transport.close().await;
                    if !token.is_cancelled() {
                        connection.connection_lost(&e).await;
                    }
                    return;
                }
            }
        }
        transport.close().await;
    }

    fn handle_event_frame(&self, frame: &str) {
        let message = match HeosMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed event frame '{}': {}", frame, e);
                return;
            }
        };
        if !message.is_event() {
            tracing::debug!("Ignoring non-event frame on event connection: {}", message);
            return;
        }

        let signal = message.command().to_string();
        let delivered = self
            .dispatcher
            .publish(&signal, Event::Message(Arc::new(message)));
        if delivered == 0 {
            tracing::debug!("Unrecognized event: {}", signal);
        }
    }

    async fn heart_beat(this: Weak<Self>, interval: std::time::Duration, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(interval / 2) => {}
            }
            let Some(connection) = this.upgrade() else {
                return;
            };
            if connection.idle_since().elapsed() < interval {
                continue;
            }
            match connection.send_command(Command::new(commands::HEART_BEAT)).await {
                Ok(_) | Err(HeosError::Command { .. }) => {}
                Err(e) => tracing::debug!("Heart beat failed: {}", e),
            }
        }
    }

    /// Tear the session down after a transport failure
    async fn connection_lost(&self, error: &HeosError) {
        let was_connected = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if !was_connected {
            return;
        }

        self.session_token().cancel();
        if let Some(mut transport) = self.command.lock().await.take() {
            transport.close().await;
        }

        if self.auto_reconnect.load(Ordering::SeqCst) {
            self.state_tx.send_replace(ConnectionState::Reconnecting);
            self.track(tokio::spawn(Self::reconnect(self.this.clone())));
        }

        tracing::info!("Disconnected from {}: {}", self.options.host, error);
        self.dispatcher
            .publish(SIGNAL_HEOS_EVENT, Event::Heos(HeosEvent::Disconnected));
    }

    // Boxed: the session tasks spawn each other in a cycle
    fn reconnect(this: Weak<Self>) -> BoxFuture<'static, ()> {
        Self::reconnect_loop(this).boxed()
    }

    async fn reconnect_loop(this: Weak<Self>) {
        loop {
            let Some(connection) = this.upgrade() else {
                return;
            };
            let delay = connection.options.reconnect_delay;
            drop(connection);
            sleep(delay).await;

            let Some(connection) = this.upgrade() else {
                return;
            };
            // A manual connect may have taken over in the meantime
            let _opening = connection.opening.lock().await;
            if connection.state() != ConnectionState::Reconnecting {
                return;
            }
            match connection.open_session().await {
                Ok(()) => {
                    connection
                        .state_tx
                        .send_replace(ConnectionState::Connected);
                    tracing::info!("Reconnected to {}", connection.options.host);
                    connection
                        .dispatcher
                        .publish(SIGNAL_HEOS_EVENT, Event::Heos(HeosEvent::Reconnected));
                    return;
                }
                Err(e) => {
                    tracing::debug!("Failed to reconnect to {}: {}", connection.options.host, e);
                }
            }
        }
    }
}

impl Drop for HeosConnection {
    fn drop(&mut self) {
        self.session_token().cancel();
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}
