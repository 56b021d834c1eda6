//! Orientation transform applied to the video track.

use serde::{Deserialize, Serialize};

/// 2x3 affine transform `[a b; c d; tx ty]` in row-vector convention.
///
/// Only the rotation component reaches the container, as display-rotation metadata on
/// the video stream. Pixels are never resampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for VideoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl VideoTransform {
    pub const IDENTITY: VideoTransform = VideoTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Pure rotation. Positive angles turn clockwise on a y-down display.
    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Rotation angle in degrees, normalized to (-180, 180].
    pub fn rotation_degrees(&self) -> f64 {
        let degrees = self.b.atan2(self.a).to_degrees();
        if degrees <= -180.0 {
            degrees + 360.0
        } else {
            degrees
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_degrees().abs() < 1e-6
    }

    /// Counter-clockwise angle as expected by FFmpeg's `-display_rotation`.
    pub fn display_rotation(&self) -> f64 {
        let degrees = -self.rotation_degrees();
        if degrees == 0.0 {
            0.0
        } else {
            degrees
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;

    #[test]
    fn test_identity_has_no_rotation() {
        assert!(VideoTransform::default().is_identity());
        assert_eq!(VideoTransform::IDENTITY.display_rotation(), 0.0);
    }

    #[test]
    fn test_quarter_turn() {
        let transform = VideoTransform::rotation(FRAC_PI_2);
        assert!((transform.rotation_degrees() - 90.0).abs() < 1e-9);
        assert!((transform.display_rotation() + 90.0).abs() < 1e-9);
        assert!(!transform.is_identity());
    }

    #[test]
    fn test_half_turn_normalizes() {
        let transform = VideoTransform::rotation(std::f64::consts::PI);
        assert!((transform.rotation_degrees() - 180.0).abs() < 1e-9);
    }
}
