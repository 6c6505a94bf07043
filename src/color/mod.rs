pub mod autocolor;
pub mod palette;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ColorConfig;

/// 8-bit RGBA color, stored in config files as `#RRGGBBAA`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Build from normalized channels, clamping each to [0, 1].
    pub fn from_unit(rgb: [f32; 3], alpha: u8) -> Self {
        let to_u8 = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::new(to_u8(rgb[0]), to_u8(rgb[1]), to_u8(rgb[2]), alpha)
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn parse_hex(text: &str) -> Result<Self, String> {
        let hex = text.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(format!("expected #RRGGBB or #RRGGBBAA, got '{}'", text));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| format!("invalid hex digits in '{}'", text))
        };
        let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, alpha))
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
    }
}

impl TryFrom<String> for Rgba {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgba::parse_hex(&value)
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_string()
    }
}

/// Active drawing colors: manual foreground, detected foreground, background.
#[derive(Clone, Debug)]
pub struct ColorState {
    manual_fg: Rgba,
    auto_fg: Option<Rgba>,
    auto: bool,
    bg: Rgba,
}

impl ColorState {
    pub fn from_config(config: &ColorConfig) -> Self {
        Self {
            manual_fg: config.fg,
            auto_fg: None,
            auto: config.auto,
            bg: config.bg,
        }
    }

    /// Foreground used for the bars right now.
    pub fn foreground(&self) -> Rgba {
        match (self.auto, self.auto_fg) {
            (true, Some(color)) => color,
            _ => self.manual_fg,
        }
    }

    pub fn background(&self) -> Rgba {
        self.bg
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn auto_color(&self) -> Option<Rgba> {
        self.auto_fg
    }

    pub fn set_auto(&mut self, auto: bool) {
        self.auto = auto;
    }

    pub fn set_auto_color(&mut self, color: Rgba) {
        self.auto_fg = Some(color);
    }

    /// Write the current state back so it survives the session.
    pub fn store_into(&self, config: &mut ColorConfig) {
        config.fg = self.manual_fg;
        config.auto = self.auto;
        if let Some(color) = self.auto_fg {
            config.autofg = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_alpha() {
        assert_eq!(Rgba::parse_hex("#FF8000").unwrap(), Rgba::new(255, 128, 0, 255));
        assert_eq!(Rgba::parse_hex("10203040").unwrap(), Rgba::new(16, 32, 48, 64));
        assert!(Rgba::parse_hex("#12345").is_err());
        assert!(Rgba::parse_hex("#GG0000").is_err());
    }

    #[test]
    fn formats_as_hex() {
        assert_eq!(Rgba::new(1, 2, 255, 128).to_string(), "#0102FF80");
    }

    #[test]
    fn foreground_follows_auto_flag() {
        let mut state = ColorState::from_config(&ColorConfig::default());
        let manual = state.foreground();
        let detected = Rgba::new(10, 20, 30, 255);

        state.set_auto(true);
        assert_eq!(state.foreground(), manual, "no detected color yet");

        state.set_auto_color(detected);
        assert_eq!(state.foreground(), detected);

        state.set_auto(false);
        assert_eq!(state.foreground(), manual);
    }
}
