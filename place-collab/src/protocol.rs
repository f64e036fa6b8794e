//! Textual wire protocol for live connections.
//!
//! Wire format (WebSocket text frames):
//! ```text
//!   server → client   "<x> <y> <code>"          one cell
//!                     "<x> <y> <code>\n..."     several cells, one per line
//!   client → server   "<x> <y> <code>"          update request
//!                     "getTiles"                full-board resend
//! ```
//!
//! Decoding is per message: a malformed line never affects its neighbours.

use place_core::{Board, Color, Coordinate, CELL_COUNT};
use std::fmt;

/// Control message requesting a full-board resend.
pub const GET_TILES: &str = "getTiles";

/// One cell change, as fanned out to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub coord: Coordinate,
    pub color: Color,
}

impl Notification {
    pub fn new(coord: Coordinate, color: Color) -> Self {
        Self { coord, color }
    }

    /// Encode as `"<x> <y> <code>"`.
    pub fn encode(&self) -> String {
        format!("{} {} {}", self.coord.x(), self.coord.y(), self.color.code())
    }

    /// Decode a single server notification line.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let (x, y, code) = parse_triple(line)?;
        let coord = Coordinate::new(x, y).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Self::new(coord, color_from_wire(code)?))
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Resend the full board
    GetTiles,
    /// Paint a cell. Bounds are checked by the hub, not here.
    Update { x: i64, y: i64, color: Color },
}

impl ClientMessage {
    /// Decode one inbound message.
    pub fn decode(message: &str) -> Result<Self, ProtocolError> {
        let message = message.trim();
        if message == GET_TILES {
            return Ok(ClientMessage::GetTiles);
        }
        let (x, y, code) = parse_triple(message)?;
        Ok(ClientMessage::Update {
            x,
            y,
            color: color_from_wire(code)?,
        })
    }

    /// Encode for sending (used by clients).
    pub fn encode(&self) -> String {
        match self {
            ClientMessage::GetTiles => GET_TILES.to_string(),
            ClientMessage::Update { x, y, color } => format!("{x} {y} {}", color.code()),
        }
    }
}

/// Split a frame into its non-empty messages.
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Encode the full board as one frame, one notification per cell.
pub fn encode_board(board: &Board) -> String {
    let mut out = String::with_capacity(CELL_COUNT * 8);
    for (i, (coord, color)) in board.cells().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&Notification::new(coord, color).encode());
    }
    out
}

/// Decode every line of a server frame, skipping malformed ones.
pub fn decode_notifications(frame: &str) -> Vec<Notification> {
    split_frame(frame)
        .filter_map(|line| match Notification::decode(line) {
            Ok(n) => Some(n),
            Err(e) => {
                log::debug!("Dropping notification {line:?}: {e}");
                None
            }
        })
        .collect()
}

fn parse_triple(message: &str) -> Result<(i64, i64, i64), ProtocolError> {
    let mut fields = message.split_whitespace();
    let (Some(x), Some(y), Some(c), None) = (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(ProtocolError::Malformed(format!(
            "expected 3 fields in {message:?}"
        )));
    };
    let parse = |field: &str| {
        field
            .parse::<i64>()
            .map_err(|_| ProtocolError::Malformed(format!("non-numeric field {field:?}")))
    };
    Ok((parse(x)?, parse(y)?, parse(c)?))
}

fn color_from_wire(code: i64) -> Result<Color, ProtocolError> {
    u8::try_from(code)
        .ok()
        .and_then(|c| Color::from_code(c).ok())
        .ok_or(ProtocolError::UnknownColor(code))
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Wrong field count or non-numeric field
    Malformed(String),
    /// Color code outside the palette
    UnknownColor(i64),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "Malformed message: {e}"),
            Self::UnknownColor(c) => write!(f, "Unknown color code: {c}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
