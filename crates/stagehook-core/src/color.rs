//! Colors as they arrive from the event bus
//!
//! Payloads carry colors either as CSS-style strings (`"white"`, `"#f80"`,
//! `"#ff8800"`) or as packed `0xRRGGBB` numbers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ColorError;

/// An opaque sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from a packed `0xRRGGBB` value; the high byte is ignored
    pub const fn from_hex(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xff) as u8,
            g: ((value >> 8) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    pub fn to_hex(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// Normalized sRGB components in `[0, 1]`
    pub fn to_srgb_f32(self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }

    /// CSS hex notation, usable as a canvas `fillStyle`
    pub fn to_css(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

fn named(name: &str) -> Option<Color> {
    let hex = match name {
        "black" => 0x000000,
        "silver" => 0xc0c0c0,
        "gray" | "grey" => 0x808080,
        "white" => 0xffffff,
        "maroon" => 0x800000,
        "red" => 0xff0000,
        "purple" => 0x800080,
        "fuchsia" | "magenta" => 0xff00ff,
        "green" => 0x008000,
        "lime" => 0x00ff00,
        "olive" => 0x808000,
        "yellow" => 0xffff00,
        "navy" => 0x000080,
        "blue" => 0x0000ff,
        "teal" => 0x008080,
        "aqua" | "cyan" => 0x00ffff,
        "orange" => 0xffa500,
        "pink" => 0xffc0cb,
        "brown" => 0xa52a2a,
        "gold" => 0xffd700,
        "skyblue" => 0x87ceeb,
        "lightgray" | "lightgrey" => 0xd3d3d3,
        "darkgray" | "darkgrey" => 0xa9a9a9,
        _ => return None,
    };
    Some(Color::from_hex(hex))
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ColorError::Invalid(s.to_string());

        if let Some(digits) = trimmed.strip_prefix('#') {
            if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            return match digits.len() {
                3 => {
                    let value = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
                    // #rgb expands each nibble: f80 -> ff8800
                    let r = ((value >> 8) & 0xf) as u8;
                    let g = ((value >> 4) & 0xf) as u8;
                    let b = (value & 0xf) as u8;
                    Ok(Color::rgb(r * 17, g * 17, b * 17))
                }
                6 => {
                    let value = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
                    Ok(Color::from_hex(value))
                }
                _ => Err(invalid()),
            };
        }

        if let Some(digits) = trimmed.strip_prefix("0x") {
            let value = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
            return Ok(Color::from_hex(value));
        }

        named(&trimmed.to_ascii_lowercase()).ok_or_else(invalid)
    }
}

/// Wire form: either a CSS string or a packed number
#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Number(u32),
    Text(String),
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ColorRepr::deserialize(deserializer)? {
            ColorRepr::Number(value) => Ok(Color::from_hex(value)),
            ColorRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_css())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_and_hex() {
        assert_eq!("white".parse::<Color>().unwrap(), Color::WHITE);
        assert_eq!("Red".parse::<Color>().unwrap(), Color::rgb(255, 0, 0));
        assert_eq!("#f80".parse::<Color>().unwrap(), Color::rgb(0xff, 0x88, 0x00));
        assert_eq!("#00ff7f".parse::<Color>().unwrap(), Color::rgb(0, 0xff, 0x7f));
        assert_eq!("0x336699".parse::<Color>().unwrap(), Color::from_hex(0x336699));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("#12".parse::<Color>().is_err());
        assert!("#gggggg".parse::<Color>().is_err());
        assert!("chartreuse-ish".parse::<Color>().is_err());
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let from_number: Color = serde_json::from_str("16711680").unwrap();
        assert_eq!(from_number, Color::rgb(255, 0, 0));

        let from_text: Color = serde_json::from_str("\"#0000ff\"").unwrap();
        assert_eq!(from_text.to_css(), "#0000ff");
    }
}
