//! Telemetry text overlay.
//!
//! Renders the latest acceleration and rotation-rate readings as two lines of text and
//! composites them onto a copy of the frame with `resvg`. The frame is drawn into a
//! bottom-left-origin context, so the text layer is flipped vertically to stay upright.
//! Any failure returns the input frame untouched.

use std::sync::Arc;

use resvg::tiny_skia::{self, Pixmap, Transform};
use resvg::usvg::{self, fontdb};

use crate::config::OverlayStyle;
use crate::error::{DualCamError, DualCamResult};
use crate::media::{FrameBuffer, PixelFormat};
use crate::telemetry::TelemetrySample;

/// Draws telemetry onto video frames.
pub struct OverlayRenderer {
    style: OverlayStyle,
    fontdb: Arc<fontdb::Database>,
    family: Option<String>,
}

impl OverlayRenderer {
    /// Renderer using system fonts plus `style.font_path`, if set.
    pub fn new(style: OverlayStyle) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        if let Some(path) = &style.font_path {
            if let Err(e) = db.load_font_file(path) {
                log::warn!("[OVERLAY] Failed to load font {}: {}", path.display(), e);
            }
        }
        Self::with_fonts(style, db)
    }

    /// Renderer using only the given font database.
    pub fn with_fonts(style: OverlayStyle, db: fontdb::Database) -> Self {
        let family = style.font_family.clone().or_else(|| {
            db.faces()
                .next()
                .and_then(|face| face.families.first().map(|(name, _)| name.clone()))
        });
        if family.is_none() {
            log::warn!("[OVERLAY] No fonts available, telemetry overlay disabled");
        }
        Self {
            style,
            fontdb: Arc::new(db),
            family,
        }
    }

    /// Renderer with no fonts. Every frame passes through unchanged.
    pub fn disabled() -> Self {
        Self::with_fonts(OverlayStyle::default(), fontdb::Database::new())
    }

    pub fn has_fonts(&self) -> bool {
        self.family.is_some() && !self.fontdb.is_empty()
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Draw `sample` onto a copy of `frame`.
    ///
    /// Without a sample, or on any failure, `frame` is returned as is.
    pub fn render(&self, frame: FrameBuffer, sample: Option<&TelemetrySample>) -> FrameBuffer {
        let Some(sample) = sample else {
            return frame;
        };
        match self.compose(&frame, sample) {
            Ok(output) => output,
            Err(e) => {
                log::debug!("[OVERLAY] Skipped: {}", e);
                frame
            },
        }
    }

    fn compose(&self, frame: &FrameBuffer, sample: &TelemetrySample) -> DualCamResult<FrameBuffer> {
        let Some(family) = self.family.as_deref().filter(|_| !self.fontdb.is_empty()) else {
            return Err(DualCamError::OverlayError("No usable font".into()));
        };
        let order = ChannelOrder::for_format(frame.pixel_format())?;

        let svg = self.layer_svg(family, &overlay_lines(sample));
        let mut options = usvg::Options::default();
        options.fontdb = Arc::clone(&self.fontdb);
        let tree = usvg::Tree::from_str(&svg, &options)
            .map_err(|e| DualCamError::OverlayError(format!("Failed to build text layer: {}", e)))?;

        let mut pixmap = frame_to_pixmap(frame, order)?;
        resvg::render(&tree, self.layer_transform(frame.height()), &mut pixmap.as_mut());

        let mut output = FrameBuffer::new(frame.format())?;
        pixmap_to_frame(&pixmap, &mut output, order);
        Ok(output)
    }

    /// Places the layer at `origin` in a bottom-left-origin context, flipping the layer
    /// itself so glyphs read upright.
    fn layer_transform(&self, frame_height: u32) -> Transform {
        let [x, y] = self.style.origin;
        let layer_height = self.style.size[1];
        Transform::from_row(1.0, 0.0, 0.0, -1.0, 0.0, frame_height as f32)
            .pre_translate(x, y)
            .pre_concat(Transform::from_row(1.0, 0.0, 0.0, -1.0, 0.0, layer_height))
    }

    fn layer_svg(&self, family: &str, lines: &[String; 2]) -> String {
        let [width, height] = self.style.size;
        let font_size = self.style.font_size;
        let line_height = font_size * 1.2;
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><text font-family="{family}" font-size="{fs}" fill="{color}"><tspan x="0" y="{y1}">{l1}</tspan><tspan x="0" y="{y2}">{l2}</tspan></text></svg>"#,
            w = width,
            h = height,
            family = escape_xml(family),
            fs = font_size,
            color = escape_xml(&self.style.color),
            y1 = font_size,
            y2 = font_size + line_height,
            l1 = escape_xml(&lines[0]),
            l2 = escape_xml(&lines[1]),
        )
    }
}

/// The two overlay lines for a sample, each reading to four decimal places.
pub fn overlay_lines(sample: &TelemetrySample) -> [String; 2] {
    let [ax, ay, az] = sample.acceleration;
    let [gx, gy, gz] = sample.rotation_rate;
    [
        format!("Accel: (X: {:.4}, Y: {:.4}, Z: {:.4})", ax, ay, az),
        format!("Gyro: (X: {:.4}, Y: {:.4}, Z: {:.4})", gx, gy, gz),
    ]
}

/// Byte positions of R, G, B and A within a pixel.
#[derive(Clone, Copy)]
struct ChannelOrder([usize; 4]);

impl ChannelOrder {
    fn for_format(format: PixelFormat) -> DualCamResult<Self> {
        match format {
            PixelFormat::Bgra8 => Ok(Self([2, 1, 0, 3])),
            PixelFormat::Rgba8 => Ok(Self([0, 1, 2, 3])),
            other => Err(DualCamError::UnsupportedPixelFormat(other)),
        }
    }
}

fn frame_to_pixmap(frame: &FrameBuffer, order: ChannelOrder) -> DualCamResult<Pixmap> {
    let mut pixmap = Pixmap::new(frame.width(), frame.height())
        .ok_or_else(|| DualCamError::OverlayError("Failed to create drawing context".into()))?;
    let [r, g, b, a] = order.0;
    let width = frame.width() as usize;
    let stride = frame.stride();
    let data = frame.data();

    for (y, row) in pixmap.pixels_mut().chunks_exact_mut(width).enumerate() {
        let src = &data[y * stride..y * stride + width * 4];
        for (dst, px) in row.iter_mut().zip(src.chunks_exact(4)) {
            *dst = tiny_skia::ColorU8::from_rgba(px[r], px[g], px[b], px[a]).premultiply();
        }
    }
    Ok(pixmap)
}

fn pixmap_to_frame(pixmap: &Pixmap, frame: &mut FrameBuffer, order: ChannelOrder) {
    let [r, g, b, a] = order.0;
    let width = frame.width() as usize;
    let stride = frame.stride();
    let data = frame.data_mut();

    for (y, row) in pixmap.pixels().chunks_exact(width).enumerate() {
        let dst = &mut data[y * stride..y * stride + width * 4];
        for (px, src) in dst.chunks_exact_mut(4).zip(row) {
            let color = src.demultiply();
            px[r] = color.red();
            px[g] = color.green();
            px[b] = color.blue();
            px[a] = color.alpha();
        }
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FormatDescription;

    const GRAY: [u8; 4] = [40, 40, 40, 255];

    fn sample() -> TelemetrySample {
        TelemetrySample {
            acceleration: [0.012345, -0.98, 0.1],
            rotation_rate: [1.0, 2.5, -3.14159],
        }
    }

    fn gray_frame(width: u32, height: u32) -> FrameBuffer {
        FrameBuffer::filled(FormatDescription::new(width, height, PixelFormat::Bgra8), GRAY).unwrap()
    }

    #[test]
    fn test_overlay_lines_format() {
        let [accel, gyro] = overlay_lines(&sample());
        assert_eq!(accel, "Accel: (X: 0.0123, Y: -0.9800, Z: 0.1000)");
        assert_eq!(gyro, "Gyro: (X: 1.0000, Y: 2.5000, Z: -3.1416)");
    }

    #[test]
    fn test_no_sample_returns_identical_buffer() {
        let renderer = OverlayRenderer::new(OverlayStyle::default());
        let frame = gray_frame(64, 32);
        let surface = frame.surface_id();
        let before = frame.data().to_vec();

        let output = renderer.render(frame, None);
        assert_eq!(output.surface_id(), surface);
        assert_eq!(output.data(), &before[..]);
    }

    #[test]
    fn test_without_fonts_falls_back_to_input() {
        let renderer = OverlayRenderer::disabled();
        assert!(!renderer.has_fonts());
        let frame = gray_frame(64, 32);
        let surface = frame.surface_id();

        let output = renderer.render(frame, Some(&sample()));
        assert_eq!(output.surface_id(), surface);
    }

    #[test]
    fn test_unsupported_format_falls_back() {
        let renderer = OverlayRenderer::new(OverlayStyle::default());
        let frame = FrameBuffer::new(FormatDescription::new(16, 16, PixelFormat::Nv12)).unwrap();
        let surface = frame.surface_id();
        assert_eq!(renderer.render(frame, Some(&sample())).surface_id(), surface);
    }

    #[test]
    fn test_sample_draws_red_text() {
        let renderer = OverlayRenderer::new(OverlayStyle::default());
        if !renderer.has_fonts() {
            eprintln!("skipping: no system fonts");
            return;
        }
        let frame = gray_frame(640, 240);
        let format = frame.format();
        let input_surface = frame.surface_id();

        let output = renderer.render(frame, Some(&sample()));
        assert_ne!(output.surface_id(), input_surface);
        assert_eq!(output.format(), format);

        // Text lands in the layer band near the bottom edge; everything above it is untouched.
        let mut reddish = 0;
        for y in 0..240 {
            for x in 0..640 {
                let [b, g, r, a] = output.pixel(x, y).unwrap();
                assert_eq!(a, 255);
                if r > g && r > b {
                    reddish += 1;
                    assert!(y >= 240 - 110, "text drawn outside its layer at y={}", y);
                }
            }
        }
        assert!(reddish > 0);
        assert_eq!(output.pixel(639, 0), Some(GRAY));
    }

    #[test]
    fn test_rgba_channel_order_roundtrip() {
        let frame = FrameBuffer::filled(
            FormatDescription::new(4, 2, PixelFormat::Rgba8),
            [10, 20, 30, 255],
        )
        .unwrap();
        let order = ChannelOrder::for_format(PixelFormat::Rgba8).unwrap();
        let pixmap = frame_to_pixmap(&frame, order).unwrap();
        assert_eq!(pixmap.pixel(0, 0).unwrap().red(), 10);

        let mut output = FrameBuffer::new(frame.format()).unwrap();
        pixmap_to_frame(&pixmap, &mut output, order);
        assert_eq!(output.data(), frame.data());
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & \"c\">"), "a&lt;b &amp; &quot;c&quot;&gt;");
    }
}
