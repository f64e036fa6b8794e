//! # place-core: domain types for the shared pixel canvas
//!
//! Pure, I/O-free building blocks shared by the server and clients:
//!
//! - [`color`]: the closed 16-color palette and the nibble codec
//! - [`board`]: coordinates, the board grid, packed snapshots, tile metadata
//! - [`identity`]: the authenticated actor behind an update
//!
//! ```text
//!   "red" ──name_to_code──► 8 ──pack_pair──► 0x8F ──► snapshot byte
//!                           ▲                  │
//!                           └────unpack_byte───┘
//! ```

pub mod board;
pub mod color;
pub mod identity;

pub use board::{
    Board, BoardError, Coordinate, TileMeta, BOARD_SIZE, CELL_COUNT, DEFAULT_COLOR, PACKED_LEN,
};
pub use color::{code_to_name, name_to_code, pack_pair, unpack_byte, Color, ColorError, PALETTE_SIZE};
pub use identity::Identity;
