use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde::de::{self, Deserializer};

use crate::processing::color::BackgroundColor;
use crate::schedule::FrameClock;

/// Fraction of the border that separates the two halves of a diptych from the centre line.
pub const DIPTYCH_GAP_FRACTION: f32 = 3.0 / 16.0;

/// Canvas presets. Each maps to the exact pixel size of the exported image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AspectRatio {
    Square,
    FourByFive,
    NineBySixteen,
}

impl AspectRatio {
    pub const ALL: &'static [Self] = &[Self::Square, Self::FourByFive, Self::NineBySixteen];
    const NAMES: &'static [&'static str] = &["1x1", "4x5", "9x16"];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Square => "1x1",
            Self::FourByFive => "4x5",
            Self::NineBySixteen => "9x16",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Square => "Square",
            Self::FourByFive => "4x5",
            Self::NineBySixteen => "9x16",
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::Square => 2000,
            Self::FourByFive => 1600,
            Self::NineBySixteen => 1080,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Square => 2000,
            Self::FourByFive => 2000,
            Self::NineBySixteen => 1920,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|ratio| ratio.id() == id)
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::FourByFive
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_id(s.trim()).ok_or_else(|| {
            format!(
                "unknown aspect ratio `{s}`, expected one of {}",
                Self::NAMES.join(", ")
            )
        })
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::from_id(&raw).ok_or_else(|| de::Error::unknown_variant(&raw, Self::NAMES))
    }
}

/// Orientation of the dividing line between the two images of a diptych.
///
/// `Horizontal` lays the images out side by side, `Vertical` stacks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SplitType {
    #[default]
    Horizontal,
    Vertical,
}

impl SplitType {
    pub const ALL: &'static [Self] = &[Self::Horizontal, Self::Vertical];
    const NAMES: &'static [&'static str] = &["horizontal", "vertical"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Horizontal => "Horizontal",
            Self::Vertical => "Vertical",
        }
    }
}

impl fmt::Display for SplitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|split| split.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                format!(
                    "unknown split `{s}`, expected one of {}",
                    Self::NAMES.join(", ")
                )
            })
    }
}

impl<'de> Deserialize<'de> for SplitType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::ALL
            .iter()
            .copied()
            .find(|split| split.as_str() == raw)
            .ok_or_else(|| de::Error::unknown_variant(&raw, Self::NAMES))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Aspect ratio selected when a session starts.
    pub aspect_ratio: AspectRatio,
    /// Initial background colour (`#rrggbb`, `rgb(..)` or `hsb(..)`).
    pub background_color: BackgroundColor,
    /// Initial border around placed images, in pixels.
    pub border: u32,
    /// Upper bound accepted by the border setter.
    pub max_border: u32,
    /// Initial diptych split.
    pub split: SplitType,
    /// Long-edge bound of the resize applied when images are picked.
    pub first_pass_max_dimension: u32,
    /// Whether layout resizes may enlarge the first-pass image to fill its box.
    pub layout_allow_upscale: bool,
    /// Share of the border kept on each side of the diptych centre line.
    pub diptych_gap_fraction: f32,
    /// Quality of exported JPEGs (1-100).
    pub jpeg_quality: u8,
    /// Interval between frame ticks that flush queued redraws.
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    /// How long a share success/error indicator stays up before resetting.
    #[serde(with = "humantime_serde")]
    pub share_reset_delay: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::FourByFive,
            background_color: BackgroundColor::white(),
            border: 64,
            max_border: 500,
            split: SplitType::Horizontal,
            first_pass_max_dimension: 2000,
            layout_allow_upscale: true,
            diptych_gap_fraction: DIPTYCH_GAP_FRACTION,
            jpeg_quality: 75,
            frame_interval: Duration::from_millis(16),
            share_reset_delay: Duration::from_secs(5),
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.border <= self.max_border,
            "border ({}) must not exceed max-border ({})",
            self.border,
            self.max_border
        );
        ensure!(
            self.first_pass_max_dimension > 0,
            "first-pass-max-dimension must be greater than zero"
        );
        ensure!(
            self.diptych_gap_fraction.is_finite() && self.diptych_gap_fraction >= 0.0,
            "diptych-gap-fraction must be a non-negative number"
        );
        ensure!(
            (1..=100).contains(&self.jpeg_quality),
            "jpeg-quality must be between 1 and 100"
        );
        ensure!(
            !self.frame_interval.is_zero(),
            "frame-interval must be greater than zero"
        );
        Ok(self)
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::Interval(self.frame_interval)
    }
}
