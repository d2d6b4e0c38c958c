//! Core value types shared by every layer of the canvas server.
//!
//! Coordinates and colors are only constructible through checked
//! constructors, so any value of these types that reaches the board cache,
//! the store, or the wire is already valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Pixel balance of a single account.
pub type Balance = i64;

/// Commit sequence number assigned by the store to every placement.
///
/// Sequence numbers are strictly increasing in commit order and define the
/// last-write-wins order of the board.
pub type Seq = u64;

/// Rejection reasons for malformed placement input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Coordinate ({x}, {y}) is outside the {size}x{size} grid")]
    CoordinateOutOfRange { x: i64, y: i64, size: u32 },

    #[error("Invalid color: {0:?}")]
    InvalidColor(String),
}

/// A cell position on the grid, bounded by the grid size it was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: u32,
    pub y: u32,
}

impl Coordinate {
    /// Builds a coordinate, rejecting anything outside `[0, grid_size)` on either axis.
    pub fn new(x: i64, y: i64, grid_size: u32) -> Result<Self, ValidationError> {
        let size = i64::from(grid_size);
        if !(0..size).contains(&x) || !(0..size).contains(&y) {
            return Err(ValidationError::CoordinateOutOfRange {
                x,
                y,
                size: grid_size,
            });
        }
        Ok(Self {
            x: x as u32,
            y: y as u32,
        })
    }

    /// The `"x,y"` key used by the `setBoard` wire format.
    pub fn key(&self) -> String {
        format!("{},{}", self.x, self.y)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// An RGB color in `#RRGGBB` form, always stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// Parses a `#rrggbb` string case-insensitively and normalizes it to uppercase.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let digits = raw
            .strip_prefix('#')
            .filter(|digits| digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| ValidationError::InvalidColor(raw.to_string()))?;
        Ok(Self(format!("#{}", digits.to_ascii_uppercase())))
    }

    /// Plain white, the background of a fresh board.
    pub fn white() -> Self {
        Self("#FFFFFF".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Color {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved user identity. The email is the stable ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub name: String,
    pub image: String,
}

impl Identity {
    pub fn key(&self) -> &str {
        &self.email
    }
}

/// An immutable record of one committed pixel write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub seq: Seq,
    pub coordinate: Coordinate,
    pub color: Color,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// The delta broadcast to every viewer after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelUpdate {
    pub coordinate: Coordinate,
    pub color: Color,
}

impl From<&Placement> for PixelUpdate {
    fn from(placement: &Placement) -> Self {
        Self {
            coordinate: placement.coordinate,
            color: placement.color.clone(),
        }
    }
}

/// Unique identifier for one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
