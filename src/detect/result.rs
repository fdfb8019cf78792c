/// Outcome of one inference cycle.
///
/// Produced once per classified image and consumed by the debounce/publish
/// step. Confidence is always inside `[0.0, 1.0]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub person_detected: bool,
    pub confidence: f64,
}

impl DetectionResult {
    /// Build a result, clamping confidence into `[0.0, 1.0]` (non-finite -> 0).
    pub fn new(person_detected: bool, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            person_detected,
            confidence,
        }
    }

    /// The "nothing seen" result used when a backend degrades.
    pub fn none() -> Self {
        Self::default()
    }

    /// Confidence as a percentage rounded to one decimal place.
    pub fn confidence_percent(&self) -> f64 {
        (self.confidence * 1000.0).round() / 10.0
    }

    /// Percentage formatted with one decimal, e.g. `"82.0"`.
    pub fn confidence_label(&self) -> String {
        format!("{:.1}", self.confidence_percent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(DetectionResult::new(true, 1.7).confidence, 1.0);
        assert_eq!(DetectionResult::new(false, -0.2).confidence, 0.0);
        assert_eq!(DetectionResult::new(true, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn percent_has_one_decimal() {
        let result = DetectionResult::new(true, 0.82);
        assert_eq!(result.confidence_percent(), 82.0);
        assert_eq!(result.confidence_label(), "82.0");
        assert_eq!(DetectionResult::new(true, 0.565).confidence_label(), "56.5");
        assert_eq!(DetectionResult::none().confidence_label(), "0.0");
    }
}
