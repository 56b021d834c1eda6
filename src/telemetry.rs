//! Motion telemetry source.
//!
//! The sensor subsystem pushes readings into a `SharedTelemetry`; the overlay polls the
//! latest complete sample at frame time. Readings only flow between `start_updates`
//! and `stop_updates`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Latest motion reading: acceleration in g and rotation rate in rad/s, X/Y/Z.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub acceleration: [f64; 3],
    pub rotation_rate: [f64; 3],
}

/// Pull access to motion readings.
pub trait TelemetrySource: Send + Sync {
    /// Most recent complete sample, or `None` until the sensors have warmed up.
    fn latest_sample(&self) -> Option<TelemetrySample>;

    /// Begin delivering sensor updates.
    fn start_updates(&self) {}

    /// Stop delivering sensor updates.
    fn stop_updates(&self) {}
}

#[derive(Default)]
struct Readings {
    acceleration: Option<[f64; 3]>,
    rotation_rate: Option<[f64; 3]>,
    active: bool,
}

/// Telemetry store fed by the sensor collaborator.
#[derive(Default)]
pub struct SharedTelemetry {
    readings: RwLock<Readings>,
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an accelerometer reading. Ignored while updates are stopped.
    pub fn update_acceleration(&self, acceleration: [f64; 3]) {
        let mut readings = self.readings.write();
        if readings.active {
            readings.acceleration = Some(acceleration);
        }
    }

    /// Store a gyroscope reading. Ignored while updates are stopped.
    pub fn update_rotation_rate(&self, rotation_rate: [f64; 3]) {
        let mut readings = self.readings.write();
        if readings.active {
            readings.rotation_rate = Some(rotation_rate);
        }
    }

    /// Whether updates have been requested.
    pub fn is_active(&self) -> bool {
        self.readings.read().active
    }
}

impl TelemetrySource for SharedTelemetry {
    fn latest_sample(&self) -> Option<TelemetrySample> {
        let readings = self.readings.read();
        Some(TelemetrySample {
            acceleration: readings.acceleration?,
            rotation_rate: readings.rotation_rate?,
        })
    }

    fn start_updates(&self) {
        self.readings.write().active = true;
        log::debug!("[TELEMETRY] Updates started");
    }

    fn stop_updates(&self) {
        // Next session starts without stale readings.
        *self.readings.write() = Readings::default();
        log::debug!("[TELEMETRY] Updates stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_requires_both_readings() {
        let telemetry = SharedTelemetry::new();
        telemetry.start_updates();
        assert_eq!(telemetry.latest_sample(), None);

        telemetry.update_acceleration([0.0, -1.0, 0.0]);
        assert_eq!(telemetry.latest_sample(), None);

        telemetry.update_rotation_rate([0.1, 0.2, 0.3]);
        let sample = telemetry.latest_sample().unwrap();
        assert_eq!(sample.acceleration, [0.0, -1.0, 0.0]);
        assert_eq!(sample.rotation_rate, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_latest_reading_wins() {
        let telemetry = SharedTelemetry::new();
        telemetry.start_updates();
        telemetry.update_acceleration([1.0, 1.0, 1.0]);
        telemetry.update_acceleration([2.0, 2.0, 2.0]);
        telemetry.update_rotation_rate([0.0; 3]);
        assert_eq!(telemetry.latest_sample().unwrap().acceleration, [2.0; 3]);
    }

    #[test]
    fn test_start_stop_updates() {
        let telemetry = SharedTelemetry::new();
        assert!(!telemetry.is_active());
        telemetry.start_updates();
        assert!(telemetry.is_active());
        telemetry.stop_updates();
        assert!(!telemetry.is_active());
    }

    #[test]
    fn test_readings_ignored_while_stopped() {
        let telemetry = SharedTelemetry::new();
        telemetry.update_acceleration([1.0; 3]);
        telemetry.update_rotation_rate([1.0; 3]);
        assert_eq!(telemetry.latest_sample(), None);

        telemetry.start_updates();
        telemetry.update_acceleration([2.0; 3]);
        telemetry.update_rotation_rate([3.0; 3]);
        assert!(telemetry.latest_sample().is_some());

        telemetry.stop_updates();
        assert_eq!(telemetry.latest_sample(), None);
        telemetry.update_acceleration([4.0; 3]);
        telemetry.update_rotation_rate([4.0; 3]);
        assert_eq!(telemetry.latest_sample(), None);
    }
}
