//! The board grid, its coordinates, and per-cell editor metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::color::{pack_pair, unpack_byte, Color, ColorError};
use crate::identity::Identity;

/// Width and height of the board.
pub const BOARD_SIZE: usize = 100;

/// Number of cells on the board.
pub const CELL_COUNT: usize = BOARD_SIZE * BOARD_SIZE;

/// Length of the packed snapshot: two cells per byte.
pub const PACKED_LEN: usize = CELL_COUNT / 2;

/// Color of every cell on a freshly initialized board.
pub const DEFAULT_COLOR: Color = Color::CornflowerBlue;

/// A validated board position.
///
/// Deserialization goes through [`Coordinate::new`], so an out-of-range
/// pair is refused instead of producing an index past the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    x: u16,
    y: u16,
}

#[derive(Deserialize)]
struct RawCoordinate {
    x: i64,
    y: i64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = BoardError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.x, raw.y)
    }
}

impl Coordinate {
    /// Validate a raw (x, y) pair against the board bounds.
    pub fn new(x: i64, y: i64) -> Result<Self, BoardError> {
        let limit = BOARD_SIZE as i64;
        if x < 0 || y < 0 || x >= limit || y >= limit {
            return Err(BoardError::OutOfBounds { x, y });
        }
        Ok(Self {
            x: x as u16,
            y: y as u16,
        })
    }

    /// Coordinate of the cell at a row-major flattened index.
    fn from_index(index: usize) -> Self {
        Self {
            x: (index % BOARD_SIZE) as u16,
            y: (index / BOARD_SIZE) as u16,
        }
    }

    pub fn x(&self) -> usize {
        self.x as usize
    }

    pub fn y(&self) -> usize {
        self.y as usize
    }

    /// Row-major flattened index.
    pub fn index(&self) -> usize {
        self.y() * BOARD_SIZE + self.x()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The full grid of cell colors, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: Vec<Color>,
}

impl Board {
    /// A board with every cell set to `color`.
    pub fn filled(color: Color) -> Self {
        Self {
            cells: vec![color; CELL_COUNT],
        }
    }

    /// Decode a packed snapshot. Byte `i` holds cells `2i` (high nibble)
    /// and `2i + 1` (low nibble).
    pub fn from_packed(bytes: &[u8]) -> Result<Self, BoardError> {
        if bytes.len() != PACKED_LEN {
            return Err(BoardError::SnapshotLength {
                expected: PACKED_LEN,
                actual: bytes.len(),
            });
        }
        let mut cells = Vec::with_capacity(CELL_COUNT);
        for &byte in bytes {
            let (first, second) = unpack_byte(byte);
            cells.push(Color::from_nibble(first));
            cells.push(Color::from_nibble(second));
        }
        Ok(Self { cells })
    }

    /// Encode as a packed snapshot.
    pub fn to_packed(&self) -> Vec<u8> {
        self.cells
            .chunks_exact(2)
            .map(|pair| (pair[0].code() << 4) | pair[1].code())
            .collect()
    }

    pub fn get(&self, coord: Coordinate) -> Color {
        self.cells[coord.index()]
    }

    /// Set a cell, returning its previous color.
    pub fn set(&mut self, coord: Coordinate, color: Color) -> Color {
        std::mem::replace(&mut self.cells[coord.index()], color)
    }

    /// Every cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (Coordinate, Color)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, c)| (Coordinate::from_index(i), *c))
    }

    /// Rows of the board mapped through `f`, `rows[y][x]`.
    pub fn rows<T>(&self, f: impl Fn(Color) -> T) -> Vec<Vec<T>> {
        self.cells
            .chunks_exact(BOARD_SIZE)
            .map(|row| row.iter().map(|c| f(*c)).collect())
            .collect()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::filled(DEFAULT_COLOR)
    }
}

/// Set one cell's nibble inside a packed snapshot.
pub fn set_packed_cell(packed: &mut [u8], coord: Coordinate, color: Color) -> Result<(), BoardError> {
    if packed.len() != PACKED_LEN {
        return Err(BoardError::SnapshotLength {
            expected: PACKED_LEN,
            actual: packed.len(),
        });
    }
    let index = coord.index();
    let byte = &mut packed[index / 2];
    let (high, low) = unpack_byte(*byte);
    *byte = if index % 2 == 0 {
        pack_pair(color.code(), low)?
    } else {
        pack_pair(high, color.code())?
    };
    Ok(())
}

/// Last editor of a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileMeta {
    pub editor: Identity,
    pub updated_at: DateTime<Utc>,
}

/// Board errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// Coordinate outside `[0, BOARD_SIZE)`
    OutOfBounds { x: i64, y: i64 },
    /// Packed snapshot has the wrong size
    SnapshotLength { expected: usize, actual: usize },
    /// Color code outside the palette
    Color(ColorError),
}

impl From<ColorError> for BoardError {
    fn from(e: ColorError) -> Self {
        BoardError::Color(e)
    }
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::OutOfBounds { x, y } => {
                write!(f, "Coordinate ({x}, {y}) out of bounds")
            }
            BoardError::SnapshotLength { expected, actual } => {
                write!(f, "Snapshot length {actual}, expected {expected}")
            }
            BoardError::Color(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BoardError {}
