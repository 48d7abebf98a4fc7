use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::features::FeatureVector;
use crate::model::{self, Call};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub prop_value: f64,
    pub prediction: Call,
    pub confidence: f64,
    pub probability: f64,
}

/// Predictions for `center ± range` at `step`, all computed from the one `vector`.
///
/// Points are `center + i * step` for `i` in `-n..=n`, so the center itself is always
/// evaluated exactly and matches a direct `model::predict` call bit for bit.
pub fn sweep(
    vector: &FeatureVector,
    center: f64,
    step: f64,
    range: f64,
    cfg: &EngineConfig,
) -> EngineResult<Vec<CurvePoint>> {
    if !center.is_finite() || !step.is_finite() || !range.is_finite() {
        return Err(EngineError::validation("curve parameters must be finite"));
    }
    if step <= 0.0 {
        return Err(EngineError::validation(format!(
            "curve step must be positive (got {step})"
        )));
    }
    if range < 0.0 {
        return Err(EngineError::validation(format!(
            "curve range must be non-negative (got {range})"
        )));
    }

    // Tolerate float noise such as 3.0 / 0.1 = 29.999999999999996.
    let n = (range / step + 1e-9).floor();
    let points = 2.0 * n + 1.0;
    if points > cfg.max_curve_points as f64 {
        return Err(EngineError::validation(format!(
            "curve would have {points} points (max {})",
            cfg.max_curve_points
        )));
    }
    let n = n as i64;

    let lines: Vec<f64> = (-n..=n).map(|i| center + i as f64 * step).collect();
    if lines.windows(2).any(|w| w[1] <= w[0]) {
        return Err(EngineError::validation(format!(
            "curve step {step} is below float resolution at center {center}"
        )));
    }

    let mut out = Vec::with_capacity(lines.len());
    for prop_value in lines {
        let result = model::predict(vector, prop_value, cfg)?;
        out.push(CurvePoint {
            prop_value,
            prediction: result.prediction,
            confidence: result.confidence,
            probability: result.probability,
        });
    }

    check_consistency(&out)?;
    Ok(out)
}

/// Lines strictly increase, values are finite, and P(over) never rises with the line.
pub fn check_consistency(points: &[CurvePoint]) -> EngineResult<()> {
    for p in points {
        if !p.prop_value.is_finite() || !p.confidence.is_finite() || !p.probability.is_finite() {
            return Err(EngineError::InconsistentCurve(format!(
                "non-finite point at line {}",
                p.prop_value
            )));
        }
    }
    for pair in points.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if b.prop_value <= a.prop_value {
            return Err(EngineError::InconsistentCurve(format!(
                "lines not increasing ({} then {})",
                a.prop_value, b.prop_value
            )));
        }
        if b.probability > a.probability + 1e-9 {
            return Err(EngineError::InconsistentCurve(format!(
                "probability rises from {:.6} to {:.6} between lines {} and {}",
                a.probability, b.probability, a.prop_value, b.prop_value
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FEATURE_ORDER, Features, to_vector};
    use crate::records::Stat;

    fn kills_vector() -> FeatureVector {
        let mut f = Features::new(Stat::Kills, "Same Tournament", true);
        for name in FEATURE_ORDER {
            f.set(name, 0.0);
        }
        f.set("avg_kills", 3.4);
        f.set("std_dev_kills", 1.9);
        f.set("maps_played", 14.0);
        f.set("recent_avg", 4.1);
        f.set("long_term_avg", 3.2);
        f.set("long_term_std_dev", 2.0);
        f.set("long_term_maps", 40.0);
        f.set("form_z_score", 0.45);
        f.set("position_factor", 1.1);
        f.set("sample_size_score", 0.75);
        f.set("volatility", 0.56);
        f.set("series_maps", 2.0);
        f.set("tier_rank", 3.0);
        f.set("tier_weight", 0.8);
        to_vector(&f).unwrap()
    }

    #[test]
    fn sweep_matches_direct_prediction() {
        let cfg = EngineConfig::default();
        let v = kills_vector();
        let center = 6.5;
        let curve = sweep(&v, center, 0.5, 3.0, &cfg).unwrap();
        assert_eq!(curve.len(), 13);
        assert_eq!(curve.first().unwrap().prop_value, 3.5);
        assert_eq!(curve.last().unwrap().prop_value, 9.5);

        for point in &curve {
            let direct = model::predict(&v, point.prop_value, &cfg).unwrap();
            assert!((direct.confidence - point.confidence).abs() <= 1e-6);
            assert_eq!(direct.prediction, point.prediction);
        }
        let mid = curve.iter().find(|p| p.prop_value == center).unwrap();
        let direct = model::predict(&v, center, &cfg).unwrap();
        assert_eq!(mid.confidence.to_bits(), direct.confidence.to_bits());
    }

    #[test]
    fn sweep_is_reproducible() {
        let cfg = EngineConfig::default();
        let v = kills_vector();
        let a = sweep(&v, 4.5, 0.25, 2.0, &cfg).unwrap();
        let b = sweep(&v, 4.5, 0.25, 2.0, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fractional_step_counts_are_stable() {
        let cfg = EngineConfig::default();
        let v = kills_vector();
        let curve = sweep(&v, 5.0, 0.1, 3.0, &cfg).unwrap();
        assert_eq!(curve.len(), 61);
    }

    #[test]
    fn zero_range_is_a_single_point() {
        let cfg = EngineConfig::default();
        let curve = sweep(&kills_vector(), 2.5, 1.0, 0.0, &cfg).unwrap();
        assert_eq!(curve.len(), 1);
        assert_eq!(curve[0].prop_value, 2.5);
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let cfg = EngineConfig::default();
        let v = kills_vector();
        assert!(sweep(&v, 2.5, 0.0, 1.0, &cfg).is_err());
        assert!(sweep(&v, 2.5, 0.5, -1.0, &cfg).is_err());
        assert!(sweep(&v, f64::NAN, 0.5, 1.0, &cfg).is_err());
        assert!(sweep(&v, 2.5, 1e-6, 1e3, &cfg).is_err());
    }

    #[test]
    fn step_below_float_resolution_is_a_validation_error() {
        let cfg = EngineConfig::default();
        let err = sweep(&kills_vector(), 1e17, 0.5, 2.0, &cfg).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn consistency_check_flags_rising_probability() {
        let points = vec![
            CurvePoint {
                prop_value: 1.0,
                prediction: Call::Over,
                confidence: 40.0,
                probability: 0.6,
            },
            CurvePoint {
                prop_value: 2.0,
                prediction: Call::Over,
                confidence: 60.0,
                probability: 0.8,
            },
        ];
        assert!(matches!(
            check_consistency(&points),
            Err(EngineError::InconsistentCurve(_))
        ));
    }
}
