// src/task/id.rs

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

/// Stable identity of a task or group.
///
/// Tasks never hold references to each other, only ids; all edges live in
/// the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display color attached to a unit. Opaque metadata for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::rgb(230, 230, 230)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }
}

/// Accepts `#rrggbb`, `#rrggbbaa` or a handful of color names.
impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "red" => return Ok(Color::rgb(0xe0, 0x6c, 0x75)),
            "green" => return Ok(Color::rgb(0x3f, 0xc1, 0x3f)),
            "blue" => return Ok(Color::rgb(0x61, 0xaf, 0xef)),
            "orange" => return Ok(Color::rgb(0xd1, 0x9a, 0x66)),
            "purple" => return Ok(Color::rgb(0xc6, 0x78, 0xdd)),
            "grey" | "gray" => return Ok(Color::rgb(0x8a, 0x8d, 0x94)),
            "white" => return Ok(Color::rgb(255, 255, 255)),
            "black" => return Ok(Color::rgb(0, 0, 0)),
            _ => {}
        }

        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| format!("invalid color '{s}': expected #rrggbb[aa] or a color name"))?;

        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(format!("invalid color '{s}': expected 6 or 8 hex digits"));
        }

        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("invalid color '{s}': {e}"))
        };

        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Color::rgba(channel(0)?, channel(2)?, channel(4)?, a))
    }
}
