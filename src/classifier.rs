//! Danger classification of water level readings.

use crate::error::ClassifyError;
use crate::models::Classification;

pub const DEFAULT_MARGIN: f64 = 0.2;

/// Result of classifying one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub level: f64,
    pub classification: Classification,
    pub is_flooded: bool,
    pub threshold: f64,
}

/// Maps a measured level against a station threshold.
///
/// `level < threshold - margin` is SAFE, `threshold - margin <= level < threshold`
/// is WATCH and `level >= threshold` is DANGER.
pub fn classify(level: f64, threshold: f64, margin: f64) -> Classification {
    if level >= threshold {
        Classification::Danger
    } else if level >= threshold - margin {
        Classification::Watch
    } else {
        Classification::Safe
    }
}

pub fn is_flooded(level: f64, threshold: f64) -> bool {
    level >= threshold
}

/// Classifies an observation whose inputs may be missing. The stored
/// threshold wins over the one reported upstream; neither being present is
/// an error, never a zero default.
pub fn assess(
    station_id: i64,
    level: Option<f64>,
    stored_threshold: Option<f64>,
    reported_threshold: Option<f64>,
    margin: f64,
) -> Result<Assessment, ClassifyError> {
    let level = level.ok_or(ClassifyError::MissingLevel(station_id))?;
    let threshold = stored_threshold
        .or(reported_threshold)
        .ok_or(ClassifyError::MissingThreshold(station_id))?;

    Ok(Assessment {
        level,
        classification: classify(level, threshold, margin),
        is_flooded: is_flooded(level, threshold),
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        // 1.0 and 1.5 are exact in binary, so the boundaries are exact too.
        let (t, margin) = (1.5, 0.5);
        assert_eq!(classify(0.99, t, margin), Classification::Safe);
        assert_eq!(classify(1.0, t, margin), Classification::Watch);
        assert_eq!(classify(1.49, t, margin), Classification::Watch);
        assert_eq!(classify(1.5, t, margin), Classification::Danger);
        assert_eq!(classify(7.0, t, margin), Classification::Danger);
    }

    #[test]
    fn test_default_margin_boundary() {
        let t = 1.29;
        assert_eq!(classify(t - DEFAULT_MARGIN, t, DEFAULT_MARGIN), Classification::Watch);
        assert_eq!(classify(t, t, DEFAULT_MARGIN), Classification::Danger);
        assert_eq!(classify(1.0, t, DEFAULT_MARGIN), Classification::Safe);
    }

    #[test]
    fn test_classification_matches_definition() {
        let margin = DEFAULT_MARGIN;
        for t_step in 0..20 {
            let t = -1.0 + t_step as f64 * 0.37;
            for m_step in 0..200 {
                let m = t - 2.0 + m_step as f64 * 0.021;
                let expected = if m >= t {
                    Classification::Danger
                } else if t - margin <= m {
                    Classification::Watch
                } else {
                    Classification::Safe
                };
                assert_eq!(classify(m, t, margin), expected, "m={} t={}", m, t);
                assert_eq!(is_flooded(m, t), m >= t);
            }
        }
    }

    #[test]
    fn test_assess_prefers_stored_threshold() {
        let a = assess(1, Some(2.0), Some(1.5), Some(3.0), DEFAULT_MARGIN).unwrap();
        assert_eq!(a.classification, Classification::Danger);
        assert!(a.is_flooded);
        assert_eq!(a.threshold, 1.5);

        let b = assess(1, Some(2.0), None, Some(3.0), DEFAULT_MARGIN).unwrap();
        assert_eq!(b.classification, Classification::Safe);
        assert!(!b.is_flooded);
    }

    #[test]
    fn test_assess_missing_inputs() {
        assert_eq!(
            assess(7, None, Some(1.0), None, DEFAULT_MARGIN),
            Err(ClassifyError::MissingLevel(7))
        );
        assert_eq!(
            assess(7, Some(0.5), None, None, DEFAULT_MARGIN),
            Err(ClassifyError::MissingThreshold(7))
        );
    }
}
