#![allow(dead_code)]

use heos::{commands, Event, HeosOptions, UpdateReceiver};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// One step of a scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Frame(String),
    Delay(Duration),
}

struct Route {
    command: String,
    filter: BTreeMap<String, String>,
    replies: Vec<Reply>,
    once: bool,
}

impl Route {
    fn matches(&self, request: &ReceivedCommand) -> bool {
        self.command == request.name
            && self
                .filter
                .iter()
                .all(|(key, value)| request.params.get(key) == Some(value))
    }
}

/// A command line as received by the device
#[derive(Debug, Clone)]
pub struct ReceivedCommand {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl ReceivedCommand {
    fn parse(line: &str) -> Option<Self> {
        let uri = line.strip_prefix("heos://")?;
        let (name, query) = uri.split_once('?').unwrap_or((uri, ""));
        let params: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
        Some(Self {
            name: name.to_string(),
            params: params.into_iter().collect(),
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// One accepted client connection
pub struct MockConnection {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    commands: Mutex<Vec<ReceivedCommand>>,
    registered: AtomicBool,
}

impl MockConnection {
    pub fn commands(&self) -> Vec<ReceivedCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn commands_named(&self, name: &str) -> Vec<ReceivedCommand> {
        self.commands()
            .into_iter()
            .filter(|c| c.name == name)
            .collect()
    }

    /// Whether the client registered this connection for change events
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    async fn write(&self, frame: &str) {
        if let Some(writer) = self.writer.lock().await.as_mut() {
            let _ = writer.write_all(format!("{}\r\n", frame).as_bytes()).await;
        }
    }

    async fn close(&self) {
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

#[derive(Default)]
struct Shared {
    routes: Mutex<Vec<Route>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl Shared {
    // Newest registration wins
    fn replies_for(&self, request: &ReceivedCommand) -> Vec<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let Some(index) = routes.iter().rposition(|route| route.matches(request)) else {
            return Vec::new();
        };
        if routes[index].once {
            routes.remove(index).replies
        } else {
            routes[index].replies.clone()
        }
    }
}

/// In-process HEOS device speaking the CLI protocol on a loopback port
pub struct MockHeosDevice {
    port: u16,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl MockHeosDevice {
    /// Start a device answering the default fixtures
    pub async fn start() -> Self {
        let device = Self::start_bare().await;
        device.register_defaults();
        device
    }

    /// Start a device that answers nothing
    pub async fn start_bare() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared::default());

        let accept_shared = shared.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (read, write) = stream.into_split();
                let connection = Arc::new(MockConnection {
                    writer: tokio::sync::Mutex::new(Some(write)),
                    reader: Mutex::new(None),
                    commands: Mutex::new(Vec::new()),
                    registered: AtomicBool::new(false),
                });
                accept_shared
                    .connections
                    .lock()
                    .unwrap()
                    .push(connection.clone());
                let handle = tokio::spawn(serve(accept_shared.clone(), connection.clone(), read));
                *connection.reader.lock().unwrap() = Some(handle);
            }
        });

        Self {
            port,
            shared,
            accept,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client options pointing at this device, without heart beats
    pub fn options(&self) -> HeosOptions {
        HeosOptions::new("127.0.0.1")
            .with_port(self.port)
            .with_timeout(WAIT)
            .with_heart_beat(None)
    }

    /// Reply to `command` with `replies` whenever every `filter` pair matches
    ///
    /// `{key}` in a reply frame is replaced with the request's `key` param.
    pub fn register(&self, command: &str, filter: &[(&str, &str)], replies: Vec<Reply>) {
        self.add_route(command, filter, replies, false);
    }

    /// Same as [`MockHeosDevice::register`], consumed by the first match
    pub fn register_one_time(&self, command: &str, filter: &[(&str, &str)], replies: Vec<Reply>) {
        self.add_route(command, filter, replies, true);
    }

    /// Reply to `command` with a single frame
    pub fn register_frame(&self, command: &str, frame: Value) {
        self.register(command, &[], vec![Reply::Frame(frame.to_string())]);
    }

    fn add_route(&self, command: &str, filter: &[(&str, &str)], replies: Vec<Reply>, once: bool) {
        self.shared.routes.lock().unwrap().push(Route {
            command: command.to_string(),
            filter: filter
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            replies,
            once,
        });
    }

    fn register_defaults(&self) {
        self.register_frame(
            commands::REGISTER_FOR_CHANGE_EVENTS,
            success(
                commands::REGISTER_FOR_CHANGE_EVENTS,
                "enable={enable}&sequence={sequence}",
            ),
        );
        self.register_frame(
            commands::HEART_BEAT,
            success(commands::HEART_BEAT, "sequence={sequence}"),
        );
        self.register_frame(commands::GET_PLAYERS, players_frame());
        self.register_frame(
            commands::GET_PLAY_STATE,
            success(
                commands::GET_PLAY_STATE,
                "pid={pid}&state=stop&sequence={sequence}",
            ),
        );
        self.register_frame(commands::GET_NOW_PLAYING_MEDIA, now_playing_frame("Disney Hits"));
        self.register_frame(
            commands::GET_VOLUME,
            success(commands::GET_VOLUME, "pid={pid}&level=36&sequence={sequence}"),
        );
        self.register_frame(
            commands::GET_MUTE,
            success(commands::GET_MUTE, "pid={pid}&state=off&sequence={sequence}"),
        );
        self.register_frame(
            commands::GET_PLAY_MODE,
            success(
                commands::GET_PLAY_MODE,
                "pid={pid}&repeat=off&shuffle=off&sequence={sequence}",
            ),
        );

        for command in [
            commands::SET_PLAY_STATE,
            commands::SET_VOLUME,
            commands::VOLUME_UP,
            commands::VOLUME_DOWN,
            commands::SET_MUTE,
            commands::TOGGLE_MUTE,
            commands::SET_PLAY_MODE,
            commands::PLAY_NEXT,
            commands::PLAY_PREVIOUS,
            commands::CLEAR_QUEUE,
            commands::PLAY_STREAM,
            commands::PLAY_PRESET,
            commands::PLAY_INPUT,
        ] {
            self.register_frame(command, success(command, "pid={pid}&sequence={sequence}"));
        }
    }

    /// Connections in the order they were accepted
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.shared.connections.lock().unwrap().clone()
    }

    /// Commands named `name` received on any connection
    pub fn commands_named(&self, name: &str) -> Vec<ReceivedCommand> {
        self.connections()
            .iter()
            .flat_map(|c| c.commands_named(name))
            .collect()
    }

    /// Push an event frame to every connection registered for change events
    pub async fn write_event(&self, frame: Value) {
        let frame = frame.to_string();
        for connection in self.connections() {
            if connection.is_registered() {
                connection.write(&frame).await;
            }
        }
    }

    /// Push a raw line to every registered connection
    pub async fn write_raw_event(&self, line: &str) {
        for connection in self.connections() {
            if connection.is_registered() {
                connection.write(line).await;
            }
        }
    }

    /// Close every open connection from the device side
    pub async fn drop_connections(&self) {
        let connections: Vec<_> = self.shared.connections.lock().unwrap().drain(..).collect();
        for connection in connections {
            connection.close().await;
        }
    }
}

impl Drop for MockHeosDevice {
    fn drop(&mut self) {
        self.accept.abort();
        for connection in self.shared.connections.lock().unwrap().iter() {
            if let Some(reader) = connection.reader.lock().unwrap().take() {
                reader.abort();
            }
        }
    }
}

async fn serve(shared: Arc<Shared>, connection: Arc<MockConnection>, read: OwnedReadHalf) {
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(request) = ReceivedCommand::parse(line.trim_end_matches('\r')) else {
            continue;
        };
        if request.name == commands::REGISTER_FOR_CHANGE_EVENTS {
            connection
                .registered
                .store(request.param("enable") == Some("on"), Ordering::SeqCst);
        }
        connection.commands.lock().unwrap().push(request.clone());

        for reply in shared.replies_for(&request) {
            match reply {
                Reply::Frame(frame) => connection.write(&substitute(&frame, &request)).await,
                Reply::Delay(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

fn substitute(frame: &str, request: &ReceivedCommand) -> String {
    request
        .params
        .iter()
        .fold(frame.to_string(), |frame, (key, value)| {
            frame.replace(&format!("{{{}}}", key), value)
        })
}

// ========== Fixtures ==========

pub fn success(command: &str, message: &str) -> Value {
    json!({"heos": {"command": command, "result": "success", "message": message}})
}

pub fn failure(command: &str, message: &str) -> Value {
    json!({"heos": {"command": command, "result": "fail", "message": message}})
}

pub fn processing(command: &str) -> Value {
    success(command, "command under process&pid={pid}&sequence={sequence}")
}

pub fn event(command: &str, message: &str) -> Value {
    json!({"heos": {"command": command, "message": message}})
}

pub fn players_frame() -> Value {
    json!({
        "heos": {
            "command": commands::GET_PLAYERS,
            "result": "success",
            "message": "sequence={sequence}"
        },
        "payload": [
            {
                "name": "Back Patio",
                "pid": 1,
                "model": "HEOS Drive",
                "version": "1.493.180",
                "ip": "192.168.0.1",
                "network": "wired",
                "lineout": 1,
                "serial": "B1A2C3K"
            },
            {
                "name": "Front Porch",
                "pid": 2,
                "gid": 2,
                "model": "HEOS Drive",
                "version": "1.493.180",
                "ip": "192.168.0.2",
                "network": "wifi",
                "lineout": 1
            }
        ]
    })
}

pub fn now_playing_frame(song: &str) -> Value {
    json!({
        "heos": {
            "command": commands::GET_NOW_PLAYING_MEDIA,
            "result": "success",
            "message": "pid={pid}&sequence={sequence}"
        },
        "payload": {
            "type": "song",
            "song": song,
            "album": "Radio Disney",
            "artist": "Various",
            "image_url": "http://media/disney.jpg",
            "album_id": "",
            "mid": "catalog/playlists/genres",
            "qid": 1,
            "sid": 13
        },
        "options": []
    })
}

/// Wait for the first update accepted by `accept`
pub async fn next_update<F>(updates: &mut UpdateReceiver, mut accept: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match updates.recv().await {
                Ok(update) if accept(&update) => return update,
                Ok(_) => continue,
                Err(e) => panic!("Update channel failed: {}", e),
            }
        }
    })
    .await
    .expect("Timed out waiting for update")
}

/// Poll `condition` until it holds
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not met in time")
}
