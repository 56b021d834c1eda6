//! Telemetry overlay style.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Placement and typography of the telemetry text layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayStyle {
    /// Layer offset from the frame's bottom-left corner, in pixels.
    pub origin: [f32; 2],

    /// Layer width and height in pixels.
    pub size: [f32; 2],

    pub font_size: f32,

    /// Text color as an SVG color (`#RRGGBB` or a named color).
    pub color: String,

    /// Font family. Falls back to the first installed face when unset.
    pub font_family: Option<String>,

    /// Extra font file loaded in addition to system fonts.
    pub font_path: Option<PathBuf>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            origin: [10.0, 10.0],
            size: [800.0, 100.0],
            font_size: 24.0,
            color: "#FF0000".to_string(),
            font_family: None,
            font_path: None,
        }
    }
}

impl OverlayStyle {
    /// Validate and clamp settings to acceptable ranges.
    pub fn validate(&mut self) {
        self.font_size = self.font_size.clamp(4.0, 256.0);
        self.size[0] = self.size[0].max(1.0);
        self.size[1] = self.size[1].max(1.0);
        let color_ok = !self.color.is_empty()
            && self
                .color
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '#');
        if !color_ok {
            log::warn!("[CONFIG] Invalid overlay color {:?}, using red", self.color);
            self.color = Self::default().color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_style() {
        let style = OverlayStyle::default();
        assert_eq!(style.origin, [10.0, 10.0]);
        assert_eq!(style.size, [800.0, 100.0]);
        assert_eq!(style.font_size, 24.0);
        assert_eq!(style.color, "#FF0000");
    }

    #[test]
    fn test_validate_rejects_markup_in_color() {
        let mut style = OverlayStyle {
            color: "red\"/><script".to_string(),
            font_size: 1.0,
            ..Default::default()
        };
        style.validate();
        assert_eq!(style.color, "#FF0000");
        assert_eq!(style.font_size, 4.0);
    }
}
