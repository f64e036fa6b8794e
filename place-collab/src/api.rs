//! Request/response surface for programmatic clients.
//!
//! Transport-agnostic: an HTTP router (out of scope here) maps its routes
//! onto these calls and copies `ApiResponse` into the reply.
//!
//! | Call                | Success body                                          |
//! |---------------------|-------------------------------------------------------|
//! | `set_tile`          | `{}`                                                  |
//! | `tiles(format)`     | `{"tiles", "height", "width", "updateLimitInMs"}`     |
//! | `tile(x, y)`        | `{"color", "x", "y", "lastUpdated", "lastEditor"}`    |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::StatusCode;

use place_core::{Coordinate, Identity, BOARD_SIZE};

use crate::hub::{HubHandle, UpdateError, UpdateEvent};

/// Body of a tile update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTileRequest {
    pub x: i64,
    pub y: i64,
    /// Palette name, e.g. `"red"`
    pub color: String,
}

/// Cell encoding of `tiles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileFormat {
    /// Numeric codes
    Int,
    /// Palette names
    #[default]
    Name,
}

impl TileFormat {
    /// Query value `int` selects codes; anything else selects names.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("int") => TileFormat::Int,
            _ => TileFormat::Name,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TilesResponse<T> {
    tiles: Vec<Vec<T>>,
    height: usize,
    width: usize,
    update_limit_in_ms: u128,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TileResponse {
    color: &'static str,
    x: usize,
    y: usize,
    last_updated: Option<DateTime<Utc>>,
    last_editor: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Status plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    fn ok(body: &impl Serialize) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                Self::error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }

    fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::to_string(&ErrorBody { error: message })
            .unwrap_or_else(|_| String::from("{}"));
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<UpdateError> for ApiResponse {
    fn from(e: UpdateError) -> Self {
        let status = match e {
            UpdateError::OutOfBounds { .. } | UpdateError::UnknownColor(_) => StatusCode::BAD_REQUEST,
            UpdateError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            UpdateError::HubStopped => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::error(status, &e.to_string())
    }
}

/// Programmatic endpoints over a running hub.
#[derive(Clone)]
pub struct Api {
    hub: HubHandle,
}

impl Api {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    /// Paint a cell on behalf of `identity`.
    pub async fn set_tile(&self, identity: &Identity, request: SetTileRequest) -> ApiResponse {
        let event = UpdateEvent::new(request.x, request.y, request.color.as_str(), identity.clone());
        match self.hub.submit(event).await {
            Ok(()) => ApiResponse::ok(&serde_json::json!({})),
            Err(e) => {
                log::debug!("API update from {identity} rejected: {e}");
                e.into()
            }
        }
    }

    /// `set_tile` from a raw JSON body.
    pub async fn set_tile_json(&self, identity: &Identity, body: &[u8]) -> ApiResponse {
        match serde_json::from_slice::<SetTileRequest>(body) {
            Ok(request) => self.set_tile(identity, request).await,
            Err(e) => ApiResponse::error(StatusCode::BAD_REQUEST, &format!("invalid body: {e}")),
        }
    }

    /// The whole board, rows indexed by y.
    pub async fn tiles(&self, format: TileFormat) -> ApiResponse {
        let board = match self.hub.snapshot().await {
            Ok(board) => board,
            Err(e) => return ApiResponse::error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()),
        };
        let update_limit_in_ms = self.hub.min_interval().as_millis();
        match format {
            TileFormat::Int => ApiResponse::ok(&TilesResponse {
                tiles: board.rows(|c| c.code()),
                height: BOARD_SIZE,
                width: BOARD_SIZE,
                update_limit_in_ms,
            }),
            TileFormat::Name => ApiResponse::ok(&TilesResponse {
                tiles: board.rows(|c| c.name()),
                height: BOARD_SIZE,
                width: BOARD_SIZE,
                update_limit_in_ms,
            }),
        }
    }

    /// One cell with its latest editor, if known.
    pub async fn tile(&self, x: i64, y: i64) -> ApiResponse {
        let coord = match Coordinate::new(x, y) {
            Ok(coord) => coord,
            Err(e) => return ApiResponse::error(StatusCode::BAD_REQUEST, &e.to_string()),
        };
        let info = match self.hub.tile(coord).await {
            Ok(info) => info,
            Err(e) => return ApiResponse::error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()),
        };
        let (last_updated, last_editor) = match info.meta {
            Some(meta) => (Some(meta.updated_at), Some(meta.editor.handle)),
            None => (None, None),
        };
        ApiResponse::ok(&TileResponse {
            color: info.color.name(),
            x: coord.x(),
            y: coord.y(),
            last_updated,
            last_editor,
        })
    }
}
