//! Per-connection pumps.
//!
//! ```text
//!              ┌──────────── CancellationToken ────────────┐
//!              ▼                                           ▼
//!  socket ──► read_pump ── submit / resync ──► Hub ──► queue ──► write_pump ──► socket
//!            (idle timeout)                          (bounded)  (snapshot, batches,
//!                                                               keepalive pings)
//! ```
//!
//! Each pump holds a drop guard on the shared token, so whichever side ends
//! first (error, close, idle timeout, eviction) takes the other down with it.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use place_core::{Board, Identity};

use crate::hub::{HubError, HubHandle, Outbound, SessionHandle, UpdateError, UpdateEvent};
use crate::protocol::{encode_board, split_frame, ClientMessage};

/// Shortest idle timeout a session accepts.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Limits of one live connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound queue bound; a full queue gets the session evicted
    pub outbound_capacity: usize,
    /// Largest inbound frame/message accepted, in bytes
    pub max_frame_size: usize,
    /// Close the connection after this long without any inbound frame
    pub read_timeout: Duration,
    /// Keepalive ping period, shorter than `read_timeout`
    pub ping_interval: Duration,
    /// Upper bound on any single write
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::with_read_timeout(Duration::from_secs(60))
    }
}

impl SessionConfig {
    /// Defaults with the given idle timeout; pings at 9/10 of it.
    ///
    /// Timeouts below [`MIN_READ_TIMEOUT`] are raised to it.
    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        let read_timeout = read_timeout.max(MIN_READ_TIMEOUT);
        Self {
            outbound_capacity: 256,
            max_frame_size: 512,
            read_timeout,
            ping_interval: read_timeout * 9 / 10,
            write_timeout: Duration::from_secs(10),
        }
    }

    /// Check the limits before any connection is served.
    pub fn validate(&self) -> Result<(), String> {
        if self.outbound_capacity == 0 {
            return Err("outbound_capacity must be at least 1".to_string());
        }
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be at least 1".to_string());
        }
        if self.read_timeout < MIN_READ_TIMEOUT {
            return Err(format!("read_timeout must be at least {MIN_READ_TIMEOUT:?}"));
        }
        if self.ping_interval.is_zero() || self.ping_interval >= self.read_timeout {
            return Err("ping_interval must be non-zero and shorter than read_timeout".to_string());
        }
        if self.write_timeout.is_zero() {
            return Err("write_timeout must be non-zero".to_string());
        }
        Ok(())
    }

    /// WebSocket limits for the upgrade.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_frame_size))
            .max_frame_size(Some(self.max_frame_size))
    }
}

/// Why a connection ended abnormally.
#[derive(Debug)]
pub enum SessionError {
    /// Socket error, protocol violation or oversized frame
    Transport(WsError),
    /// A write did not complete within the write timeout
    WriteTimeout,
    /// The hub went away
    Hub(HubError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::WriteTimeout => write!(f, "Write timed out"),
            Self::Hub(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<WsError> for SessionError {
    fn from(e: WsError) -> Self {
        SessionError::Transport(e)
    }
}

impl From<HubError> for SessionError {
    fn from(e: HubError) -> Self {
        SessionError::Hub(e)
    }
}

/// Run one live connection to completion.
///
/// Registers with the hub, streams the registration snapshot, then pumps
/// both directions until either side stops. Always unregisters on exit.
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    identity: Identity,
    hub: HubHandle,
    config: &SessionConfig,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, queue) = SessionHandle::new(identity.clone(), config.outbound_capacity);
    let id = handle.id;
    let snapshot = hub.register(handle).await?;
    log::info!("Session {id} opened for {identity}");

    let (sink, stream) = ws.split();
    let token = CancellationToken::new();

    let writer = tokio::spawn(write_pump(
        sink,
        queue,
        snapshot,
        config.ping_interval,
        config.write_timeout,
        token.clone(),
    ));
    let read_result = read_pump(stream, id, identity, hub.clone(), config.read_timeout, token.clone()).await;

    token.cancel();
    // Unregistering drops the hub's sender, which also ends the writer
    let _ = hub.unregister(id).await;
    let write_result = match writer.await {
        Ok(result) => result,
        Err(e) => {
            log::error!("Write pump for session {id} panicked: {e}");
            Ok(())
        }
    };

    match (&read_result, &write_result) {
        (Ok(()), Ok(())) => log::info!("Session {id} closed"),
        (Err(e), _) | (_, Err(e)) => log::info!("Session {id} closed: {e}"),
    }
    read_result.and(write_result)
}

/// Inbound side: decode frames and forward them to the hub.
pub async fn read_pump<St>(
    mut stream: St,
    session: Uuid,
    identity: Identity,
    hub: HubHandle,
    read_timeout: Duration,
    token: CancellationToken,
) -> Result<(), SessionError>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let _guard = token.clone().drop_guard();

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            next = tokio::time::timeout(read_timeout, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                log::info!("Session {session} idle for {read_timeout:?}");
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                for line in split_frame(text.as_str()) {
                    handle_message(line, session, &identity, &hub).await?;
                }
            }
            Message::Close(_) => return Ok(()),
            Message::Binary(data) => {
                log::debug!("Session {session}: ignoring {} byte binary frame", data.len());
            }
            // Any traffic counts as liveness; tungstenite answers pings itself
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

async fn handle_message(
    line: &str,
    session: Uuid,
    identity: &Identity,
    hub: &HubHandle,
) -> Result<(), SessionError> {
    let msg = match ClientMessage::decode(line) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("Session {session}: dropping {line:?}: {e}");
            return Ok(());
        }
    };

    match msg {
        ClientMessage::GetTiles => {
            hub.resync(session).await?;
        }
        ClientMessage::Update { x, y, color } => {
            let event = UpdateEvent::new(x, y, color, identity.clone());
            match hub.submit(event).await {
                Ok(()) => {}
                Err(UpdateError::HubStopped) => return Err(HubError::Stopped.into()),
                Err(e) => log::debug!("Session {session}: update from {identity} rejected: {e}"),
            }
        }
    }
    Ok(())
}

/// Outbound side: snapshot first, then batched notifications and pings.
pub async fn write_pump<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<Outbound>,
    snapshot: Board,
    ping_interval: Duration,
    write_timeout: Duration,
    token: CancellationToken,
) -> Result<(), SessionError>
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let _guard = token.clone().drop_guard();

    send(&mut sink, Message::Text(encode_board(&snapshot).into()), write_timeout).await?;

    // interval_at() panics on a zero period
    let ping_interval = ping_interval.max(Duration::from_millis(1));
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            msg = queue.recv() => match msg {
                Some(first) => {
                    let frame = drain_batch(first, &mut queue);
                    send(&mut sink, Message::Text(frame.into()), write_timeout).await?;
                }
                None => {
                    // Evicted or unregistered
                    let _ = send(&mut sink, Message::Close(None), write_timeout).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => {
                send(&mut sink, Message::Ping(Vec::new().into()), write_timeout).await?;
            }
        }
    }
}

/// Join `first` and everything already queued behind it into one frame.
fn drain_batch(first: Outbound, queue: &mut mpsc::Receiver<Outbound>) -> String {
    let mut frame = first.encode();
    while let Ok(next) = queue.try_recv() {
        frame.push('\n');
        frame.push_str(&next.encode());
    }
    frame
}

async fn send<Si>(sink: &mut Si, msg: Message, limit: Duration) -> Result<(), SessionError>
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(msg)).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}
