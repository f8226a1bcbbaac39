//! Vibration classification
//!
//! Turns a stream of raw accelerometer vectors into a binary "machine on"
//! decision. The classifier first learns a stationary baseline (average
//! acceleration magnitude while the machine is assumed idle) and afterwards
//! compares each evaluation window against it using the symmetric percent
//! difference `|a - b| / ((a + b) / 2)`.

use log::{debug, info, warn};

/// Default on/off threshold for the percent difference between the current
/// window and the calibration baseline.
pub const DEFAULT_THRESHOLD: f32 = 0.02;

/// One 3-axis acceleration sample in m/s².
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleReading {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl SampleReading {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the acceleration vector.
    pub fn magnitude(&self) -> f32 {
        libm::sqrtf(self.x * self.x + self.y * self.y + self.z * self.z)
    }
}

/// Running sum of magnitudes for the current calibration or evaluation window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningAccumulator {
    sum: f32,
    count: u32,
}

impl RunningAccumulator {
    pub const fn new() -> Self {
        Self { sum: 0.0, count: 0 }
    }

    pub fn add(&mut self, magnitude: f32) {
        self.sum += magnitude;
        self.count = self.count.saturating_add(1);
    }

    pub fn sum(&self) -> f32 {
        self.sum
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Arithmetic mean of the accumulated magnitudes, `0.0` when empty.
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Returns the window average and starts a new, empty window.
    pub fn take_average(&mut self) -> f32 {
        let average = self.average();
        self.reset();
        average
    }
}

/// Stationary reference level learned during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationBaseline {
    pub magnitude: f32,
    pub calibrated: bool,
}

/// Result of one evaluation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Average magnitude over the window that was just closed
    pub current: f32,
    /// Baseline the window was compared against
    pub baseline: f32,
    /// Percent difference, `None` when both averages are zero
    pub ratio: Option<f32>,
    pub machine_on: bool,
    /// `false` if the evaluation ran before any calibration pass
    pub calibrated: bool,
}

/// Symmetric percent difference between two non-negative averages.
///
/// Returns `None` when the mean of the two values is zero (0/0) or the result
/// is not finite, so callers never see NaN.
pub fn percent_difference(current: f32, baseline: f32) -> Option<f32> {
    let mean = (current + baseline) / 2.0;
    if mean == 0.0 {
        return None;
    }

    let ratio = libm::fabsf(current - baseline) / mean;
    ratio.is_finite().then_some(ratio)
}

/// Self-calibrating on/off classifier.
///
/// Called serially from a single control loop; it owns its accumulator and
/// baseline exclusively.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    accumulator: RunningAccumulator,
    baseline: CalibrationBaseline,
    threshold: f32,
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl StatusClassifier {
    pub fn new(threshold: f32) -> Self {
        Self {
            accumulator: RunningAccumulator::new(),
            baseline: CalibrationBaseline::default(),
            threshold,
        }
    }

    /// Fold one acceleration sample into the current window.
    pub fn add_reading(&mut self, sample: SampleReading) {
        self.accumulator.add(sample.magnitude());
    }

    /// Close the current window as a calibration pass.
    ///
    /// The window average becomes the new baseline (`0.0` for an empty
    /// window). Every call overwrites the previous baseline.
    pub fn calibrate(&mut self) -> CalibrationBaseline {
        let readings = self.accumulator.count();
        let magnitude = self.accumulator.take_average();

        if readings == 0 {
            warn!("Calibrating with no readings, baseline set to 0");
        }

        self.baseline = CalibrationBaseline {
            magnitude,
            calibrated: true,
        };
        info!("Calibrated to {} over {} readings", magnitude, readings);

        self.baseline
    }

    /// Close the current window as an evaluation pass.
    ///
    /// Evaluating before [`calibrate`](Self::calibrate) compares against a
    /// zero baseline. The result is defined but meaningless and is flagged
    /// through [`Evaluation::calibrated`].
    pub fn determine_status(&mut self) -> Evaluation {
        if !self.baseline.calibrated {
            warn!("Evaluating machine status before calibration");
        }

        let current = self.accumulator.take_average();
        let baseline = self.baseline.magnitude;
        let ratio = percent_difference(current, baseline);
        let machine_on = ratio.is_some_and(|r| r >= self.threshold);

        debug!(
            "Window average {} vs baseline {} (ratio {:?}) -> {}",
            current,
            baseline,
            ratio,
            if machine_on { "on" } else { "off" }
        );

        Evaluation {
            current,
            baseline,
            ratio,
            machine_on,
            calibrated: self.baseline.calibrated,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.calibrated
    }

    pub fn baseline(&self) -> CalibrationBaseline {
        self.baseline
    }

    pub fn accumulator(&self) -> &RunningAccumulator {
        &self.accumulator
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Feeds readings whose magnitudes are exactly `magnitudes` (z axis only).
    fn feed(classifier: &mut StatusClassifier, magnitudes: &[f32]) {
        for &m in magnitudes {
            classifier.add_reading(SampleReading::new(0.0, 0.0, m));
        }
    }

    fn approx_eq(a: f32, b: f32) -> bool {
        libm::fabsf(a - b) <= 1e-4 * libm::fabsf(a).max(libm::fabsf(b)).max(1.0)
    }

    #[test]
    fn test_magnitude() {
        let reading = SampleReading::new(3.0, 4.0, 12.0);
        assert!(approx_eq(reading.magnitude(), 13.0));
    }

    #[test]
    fn test_calibrate_without_readings_is_zero() {
        let mut classifier = StatusClassifier::default();
        let baseline = classifier.calibrate();

        assert_eq!(baseline.magnitude, 0.0);
        assert!(baseline.calibrated);
        assert!(classifier.is_calibrated());
    }

    #[test]
    fn test_calibrate_resets_accumulator() {
        let mut classifier = StatusClassifier::default();
        feed(&mut classifier, &[9.0, 10.0, 11.0]);

        let baseline = classifier.calibrate();

        assert!(approx_eq(baseline.magnitude, 10.0));
        assert!(classifier.accumulator().is_empty());
        assert_eq!(classifier.accumulator().sum(), 0.0);
    }

    #[test]
    fn test_recalibration_overwrites_baseline() {
        let mut classifier = StatusClassifier::default();
        feed(&mut classifier, &[9.8]);
        classifier.calibrate();
        feed(&mut classifier, &[5.0, 5.0]);
        let baseline = classifier.calibrate();

        assert!(approx_eq(baseline.magnitude, 5.0));
    }

    #[test]
    fn test_equal_averages_are_off() {
        let mut classifier = StatusClassifier::default();
        feed(&mut classifier, &[9.8, 9.8]);
        classifier.calibrate();
        feed(&mut classifier, &[9.8, 9.8]);

        let evaluation = classifier.determine_status();

        assert_eq!(evaluation.ratio, Some(0.0));
        assert!(!evaluation.machine_on);
    }

    #[test]
    fn test_zero_baseline_and_zero_window_is_off() {
        let mut classifier = StatusClassifier::default();
        classifier.calibrate();

        let evaluation = classifier.determine_status();

        assert_eq!(evaluation.ratio, None);
        assert!(!evaluation.machine_on);
        assert!(evaluation.calibrated);
    }

    #[test]
    fn test_threshold_boundaries() {
        let mut classifier = StatusClassifier::new(0.02);
        feed(&mut classifier, &[1.0]);
        classifier.calibrate();

        // 0.03 / 1.015 ~= 0.0296
        feed(&mut classifier, &[1.03]);
        assert!(classifier.determine_status().machine_on);

        // 0.005 / 1.0025 ~= 0.005
        feed(&mut classifier, &[1.005]);
        assert!(!classifier.determine_status().machine_on);
    }

    #[test]
    fn test_evaluation_resets_window() {
        let mut classifier = StatusClassifier::default();
        feed(&mut classifier, &[9.8]);
        classifier.calibrate();
        feed(&mut classifier, &[20.0]);
        classifier.determine_status();

        assert!(classifier.accumulator().is_empty());
        assert!(approx_eq(classifier.baseline().magnitude, 9.8));
    }

    #[test]
    fn test_uncalibrated_evaluation_is_flagged() {
        let mut classifier = StatusClassifier::default();
        feed(&mut classifier, &[9.8]);

        let evaluation = classifier.determine_status();

        assert!(!evaluation.calibrated);
        assert_eq!(evaluation.baseline, 0.0);
        // Anything against a zero baseline is a 200% difference
        assert_eq!(evaluation.ratio, Some(2.0));
    }

    #[test]
    fn test_washer_scenario() {
        let mut classifier = StatusClassifier::default();
        feed(&mut classifier, &[9.6, 9.7, 9.8, 9.9, 10.0]);
        assert!(approx_eq(classifier.calibrate().magnitude, 9.8));

        feed(&mut classifier, &[10.5, 11.0, 11.5]);
        let evaluation = classifier.determine_status();

        // 1.2 / 10.4
        let ratio = evaluation.ratio.unwrap_or_default();
        assert!(approx_eq(ratio, 0.11538));
        assert!(evaluation.machine_on);
    }

    proptest! {
        #[test]
        fn prop_calibration_is_mean_of_magnitudes(
            magnitudes in prop::collection::vec(0.0f32..50.0, 1..64)
        ) {
            let mut classifier = StatusClassifier::default();
            feed(&mut classifier, &magnitudes);

            let expected = magnitudes.iter().sum::<f32>() / magnitudes.len() as f32;
            let baseline = classifier.calibrate();

            prop_assert!(approx_eq(baseline.magnitude, expected));
            prop_assert!(classifier.accumulator().is_empty());
        }

        #[test]
        fn prop_percent_difference_is_symmetric_and_finite(
            a in 0.0f32..1000.0,
            b in 0.0f32..1000.0,
        ) {
            let forward = percent_difference(a, b);
            let backward = percent_difference(b, a);

            prop_assert_eq!(forward, backward);
            if let Some(ratio) = forward {
                prop_assert!(ratio.is_finite());
                prop_assert!(ratio >= 0.0);
            }
        }
    }
}
