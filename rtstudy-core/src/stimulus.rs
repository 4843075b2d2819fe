use serde::{Deserialize, Serialize};
use std::fmt;

/// Background colors the stimulus can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimulusColor {
    White,
    Red,
    Blue,
    Green,
    Yellow,
    Gray,
    Brown,
    Orange,
    Purple,
    Magenta,
    Beige,
}

/// Colors cycled through in condition B.
pub const DEFAULT_PALETTE: [StimulusColor; 10] = [
    StimulusColor::Red,
    StimulusColor::Blue,
    StimulusColor::Green,
    StimulusColor::Yellow,
    StimulusColor::Gray,
    StimulusColor::Brown,
    StimulusColor::Orange,
    StimulusColor::Purple,
    StimulusColor::Magenta,
    StimulusColor::Beige,
];

impl StimulusColor {
    pub fn name(&self) -> &'static str {
        match self {
            StimulusColor::White => "white",
            StimulusColor::Red => "red",
            StimulusColor::Blue => "blue",
            StimulusColor::Green => "green",
            StimulusColor::Yellow => "yellow",
            StimulusColor::Gray => "gray",
            StimulusColor::Brown => "brown",
            StimulusColor::Orange => "orange",
            StimulusColor::Purple => "purple",
            StimulusColor::Magenta => "magenta",
            StimulusColor::Beige => "beige",
        }
    }

    /// Straight (non-premultiplied) RGBA, CSS named-color values.
    pub fn rgba(&self) -> [u8; 4] {
        match self {
            StimulusColor::White => [255, 255, 255, 255],
            StimulusColor::Red => [255, 0, 0, 255],
            StimulusColor::Blue => [0, 0, 255, 255],
            StimulusColor::Green => [0, 128, 0, 255],
            StimulusColor::Yellow => [255, 255, 0, 255],
            StimulusColor::Gray => [128, 128, 128, 255],
            StimulusColor::Brown => [165, 42, 42, 255],
            StimulusColor::Orange => [255, 165, 0, 255],
            StimulusColor::Purple => [128, 0, 128, 255],
            StimulusColor::Magenta => [255, 0, 255, 255],
            StimulusColor::Beige => [245, 245, 220, 255],
        }
    }

    /// Whether dark text stays readable on this background.
    pub fn is_light(&self) -> bool {
        let [r, g, b, _] = self.rgba();
        // Rec. 601 luma
        (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000 > 150
    }
}

impl fmt::Display for StimulusColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
