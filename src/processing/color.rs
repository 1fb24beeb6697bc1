use std::fmt;
use std::str::FromStr;

use image::Rgba;
use palette::{FromColor, Hsv, Srgb};
use serde::Deserialize;
use serde::de::{self, Deserializer};

/// Background fill, kept in a device-independent hue/saturation/brightness form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundColor(Hsv);

impl BackgroundColor {
    pub fn from_hsb(hue_degrees: f32, saturation: f32, brightness: f32) -> Self {
        Self(Hsv::new(
            hue_degrees,
            saturation.clamp(0.0, 1.0),
            brightness.clamp(0.0, 1.0),
        ))
    }

    pub fn from_rgb8(red: u8, green: u8, blue: u8) -> Self {
        let rgb: Srgb<f32> = Srgb::new(red, green, blue).into_format();
        Self(Hsv::from_color(rgb))
    }

    pub fn white() -> Self {
        Self::from_hsb(0.0, 0.0, 1.0)
    }

    pub fn hsv(&self) -> Hsv {
        self.0
    }

    pub fn to_rgb8(&self) -> [u8; 3] {
        let rgb: Srgb<u8> = Srgb::from_color(self.0).into_format();
        [rgb.red, rgb.green, rgb.blue]
    }

    pub fn to_rgba(&self) -> Rgba<u8> {
        let [r, g, b] = self.to_rgb8();
        Rgba([r, g, b, 255])
    }

    /// Lowercase `#rrggbb`, the format native colour inputs exchange.
    pub fn to_hex(&self) -> String {
        let [r, g, b] = self.to_rgb8();
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

impl Default for BackgroundColor {
    fn default() -> Self {
        Self::white()
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColorError(String);

impl fmt::Display for ParseColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid colour `{}`", self.0)
    }
}

impl std::error::Error for ParseColorError {}

impl FromStr for BackgroundColor {
    type Err = ParseColorError;

    /// Accepts `#rgb`, `#rrggbb`, `rgb(r, g, b)` and `hsb(h, s%, b%)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ParseColorError(s.to_string());

        if let Some(args) = function_args(trimmed, "hsb") {
            let [h, sat, bri] = parse_components(args).ok_or_else(invalid)?;
            return Ok(Self::from_hsb(h, percentage(sat), percentage(bri)));
        }
        if let Some(args) = function_args(trimmed, "rgb") {
            let [r, g, b] = parse_components(args).ok_or_else(invalid)?;
            let channel = |v: f32| v.round().clamp(0.0, 255.0) as u8;
            return Ok(Self::from_rgb8(channel(r), channel(g), channel(b)));
        }
        if trimmed.starts_with('#') {
            let rgb = Srgb::<u8>::from_str(trimmed).map_err(|_| invalid())?;
            return Ok(Self::from_rgb8(rgb.red, rgb.green, rgb.blue));
        }
        Err(invalid())
    }
}

impl<'de> Deserialize<'de> for BackgroundColor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Parses the hex strings this module emits back into a fill pixel.
pub fn hex_to_rgba(hex: &str) -> Option<Rgba<u8>> {
    let rgb = Srgb::<u8>::from_str(hex.trim()).ok()?;
    Some(Rgba([rgb.red, rgb.green, rgb.blue, 255]))
}

fn function_args<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    let rest = input.strip_prefix(name)?.trim_start();
    rest.strip_prefix('(')?.strip_suffix(')')
}

fn parse_components(args: &str) -> Option<[f32; 3]> {
    let mut parts = args.split(',').map(str::trim);
    let mut out = [0.0f32; 3];
    for slot in &mut out {
        let raw = parts.next()?;
        let value: f32 = raw.trim_end_matches('%').trim().parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        *slot = value;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn percentage(value: f32) -> f32 {
    (value / 100.0).clamp(0.0, 1.0)
}
