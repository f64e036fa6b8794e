//! Closed 16-color palette and the nibble codec used by the durable snapshot.
//!
//! Every color has a stable 4-bit code. Two codes share one byte in the
//! persisted board:
//!
//! ```text
//!   bit  7 6 5 4   3 2 1 0
//!       ┌───────┬─────────┐
//!       │ cell a│ cell b  │   a = earlier cell in row-major order
//!       └───────┴─────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of colors in the palette. Exactly one nibble's worth.
pub const PALETTE_SIZE: usize = 16;

/// A palette color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Forest = 1,
    Green = 2,
    Lime = 3,
    Blue = 4,
    CornflowerBlue = 5,
    Sky = 6,
    Cyan = 7,
    Red = 8,
    BurntOrange = 9,
    Orange = 10,
    Yellow = 11,
    Purple = 12,
    HotPink = 13,
    Pink = 14,
    White = 15,
}

/// Palette in code order; index == code.
const PALETTE: [(Color, &str); PALETTE_SIZE] = [
    (Color::Black, "black"),
    (Color::Forest, "forest"),
    (Color::Green, "green"),
    (Color::Lime, "lime"),
    (Color::Blue, "blue"),
    (Color::CornflowerBlue, "cornflowerblue"),
    (Color::Sky, "sky"),
    (Color::Cyan, "cyan"),
    (Color::Red, "red"),
    (Color::BurntOrange, "burnt-orange"),
    (Color::Orange, "orange"),
    (Color::Yellow, "yellow"),
    (Color::Purple, "purple"),
    (Color::HotPink, "hot-pink"),
    (Color::Pink, "pink"),
    (Color::White, "white"),
];

impl Color {
    /// All colors in code order.
    pub fn all() -> impl Iterator<Item = Color> {
        PALETTE.iter().map(|(c, _)| *c)
    }

    /// Look up a color by its 4-bit code.
    pub fn from_code(code: u8) -> Result<Self, ColorError> {
        PALETTE
            .get(code as usize)
            .map(|(c, _)| *c)
            .ok_or_else(|| ColorError::UnknownColor(code.to_string()))
    }

    /// Look up a color by its palette name.
    pub fn from_name(name: &str) -> Result<Self, ColorError> {
        PALETTE
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(c, _)| *c)
            .ok_or_else(|| ColorError::UnknownColor(name.to_string()))
    }

    /// Decode a nibble. Total: the palette covers all 16 values.
    pub fn from_nibble(nibble: u8) -> Self {
        PALETTE[(nibble & 0x0F) as usize].0
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        PALETTE[self as usize].1
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value)
    }
}

impl From<Color> for &'static str {
    fn from(color: Color) -> Self {
        color.name()
    }
}

/// Map a palette name to its code.
pub fn name_to_code(name: &str) -> Result<u8, ColorError> {
    Color::from_name(name).map(Color::code)
}

/// Map a code to its palette name.
pub fn code_to_name(code: u8) -> Result<&'static str, ColorError> {
    Color::from_code(code).map(Color::name)
}

/// Pack two codes into one byte, `a` in the high nibble.
pub fn pack_pair(a: u8, b: u8) -> Result<u8, ColorError> {
    if a as usize >= PALETTE_SIZE {
        return Err(ColorError::UnknownColor(a.to_string()));
    }
    if b as usize >= PALETTE_SIZE {
        return Err(ColorError::UnknownColor(b.to_string()));
    }
    Ok((a << 4) | b)
}

/// Split a byte into its (high, low) codes.
pub fn unpack_byte(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0x0F)
}

/// Color lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    /// Name or code is not in the palette
    UnknownColor(String),
}

impl fmt::Display for ColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorError::UnknownColor(c) => write!(f, "Unknown color: {c}"),
        }
    }
}

impl std::error::Error for ColorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_codes_match_index() {
        for (i, color) in Color::all().enumerate() {
            assert_eq!(color.code() as usize, i);
            assert_eq!(Color::from_code(i as u8).unwrap(), color);
        }
    }

    #[test]
    fn test_name_code_roundtrip() {
        for color in Color::all() {
            let code = name_to_code(color.name()).unwrap();
            assert_eq!(code_to_name(code).unwrap(), color.name());
        }
    }

    #[test]
    fn test_known_names() {
        assert_eq!(name_to_code("black").unwrap(), 0);
        assert_eq!(name_to_code("cornflowerblue").unwrap(), 5);
        assert_eq!(name_to_code("red").unwrap(), 8);
        assert_eq!(name_to_code("burnt-orange").unwrap(), 9);
        assert_eq!(name_to_code("white").unwrap(), 15);
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert_eq!(
            name_to_code("mauve"),
            Err(ColorError::UnknownColor("mauve".into()))
        );
        // Names are case-sensitive
        assert!(name_to_code("Red").is_err());
        assert!(name_to_code("").is_err());
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert!(code_to_name(16).is_err());
        assert!(code_to_name(255).is_err());
        assert!(Color::from_code(16).is_err());
    }

    #[test]
    fn test_pack_unpack_all_pairs() {
        for a in 0..16u8 {
            for b in 0..16u8 {
                let byte = pack_pair(a, b).unwrap();
                assert_eq!(unpack_byte(byte), (a, b));
            }
        }
    }

    #[test]
    fn test_pack_layout() {
        assert_eq!(pack_pair(5, 5).unwrap(), 0x55);
        assert_eq!(pack_pair(0xF, 0).unwrap(), 0xF0);
        assert_eq!(unpack_byte(0x8F), (8, 15));
    }

    #[test]
    fn test_pack_rejects_wide_codes() {
        assert!(pack_pair(16, 0).is_err());
        assert!(pack_pair(0, 16).is_err());
    }

    #[test]
    fn test_from_nibble_masks() {
        assert_eq!(Color::from_nibble(0x05), Color::CornflowerBlue);
        assert_eq!(Color::from_nibble(0xF8), Color::Red);
    }

    #[test]
    fn test_serde_as_name() {
        let json = serde_json::to_string(&Color::HotPink).unwrap();
        assert_eq!(json, "\"hot-pink\"");

        let parsed: Color = serde_json::from_str("\"sky\"").unwrap();
        assert_eq!(parsed, Color::Sky);

        assert!(serde_json::from_str::<Color>("\"magenta\"").is_err());
    }

    #[test]
    fn test_from_str_and_display() {
        let c: Color = "purple".parse().unwrap();
        assert_eq!(c, Color::Purple);
        assert_eq!(c.to_string(), "purple");
    }
}
