//! Live-protocol client with a local board replica.
//!
//! Connects with identity headers, takes the first frame as the full board
//! and applies every later notification in arrival order, so the replica
//! converges on the server's board once the stream is drained.

use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use place_core::{Board, Color, Identity};

use crate::protocol::{decode_notifications, ClientMessage, Notification};
use crate::server::{USER_HANDLE_HEADER, USER_ID_HEADER};

/// Client errors.
#[derive(Debug)]
pub enum ClientError {
    /// Connect, handshake or socket failure (includes a refused upgrade)
    Transport(WsError),
    /// The handle cannot be sent as a header value
    InvalidIdentity(String),
    /// The server closed the connection
    Closed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::InvalidIdentity(h) => write!(f, "Invalid identity handle: {h:?}"),
            Self::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<WsError> for ClientError {
    fn from(e: WsError) -> Self {
        ClientError::Transport(e)
    }
}

/// A connected canvas viewer/editor.
pub struct CanvasClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    board: Board,
}

impl CanvasClient {
    /// Connect as `identity` and wait for the initial board.
    pub async fn connect(url: &str, identity: &Identity) -> Result<Self, ClientError> {
        let mut request = url.into_client_request()?;
        let handle = HeaderValue::from_str(&identity.handle)
            .map_err(|_| ClientError::InvalidIdentity(identity.handle.clone()))?;
        let headers = request.headers_mut();
        headers.insert(USER_ID_HEADER, HeaderValue::from(identity.id));
        headers.insert(USER_HANDLE_HEADER, handle);

        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        log::debug!("Connected to {url} as {identity}");

        let mut client = Self {
            ws,
            board: Board::default(),
        };
        client.recv().await?;
        Ok(client)
    }

    /// Wait for the next text frame and apply it to the replica.
    pub async fn recv(&mut self) -> Result<Vec<Notification>, ClientError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let notifications = decode_notifications(text.as_str());
                    for n in &notifications {
                        self.board.set(n.coord, n.color);
                    }
                    return Ok(notifications);
                }
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Request a cell change. The replica only changes when the server's
    /// notification arrives.
    pub async fn set_tile(&mut self, x: i64, y: i64, color: Color) -> Result<(), ClientError> {
        self.send(&ClientMessage::Update { x, y, color }).await
    }

    /// Ask for a full-board resend.
    pub async fn request_tiles(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::GetTiles).await
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        self.send_text(&msg.encode()).await
    }

    /// Send an arbitrary text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
