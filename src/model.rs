use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::features::{FeatureVector, avg_name, std_dev_name};
use crate::records::Stat;
use crate::tiered_filter::TierInfo;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Call {
    Over,
    Under,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Over => f.write_str("OVER"),
            Call::Under => f.write_str("UNDER"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDetails {
    pub tier_info: TierInfo,
    pub fallback_used: bool,
    pub maps_played: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub stat: Stat,
    pub prop_value: f64,
    pub prediction: Call,
    /// P(actual stat > prop_value).
    pub probability: f64,
    /// 0..=100, clamped to the configured band.
    pub confidence: f64,
    pub expected_stat: f64,
    pub confidence_interval: [f64; 2],
    pub reasoning: String,
    pub sample_details: SampleDetails,
}

/// Inputs read off the vector once; missing or non-finite values fall back to neutral.
struct Inputs {
    stat: Stat,
    maps_played: f64,
    sample_score: f64,
    tier: TierInfo,
    fallback_used: bool,
    series_maps: f64,
    recent_avg: f64,
    long_term_avg: f64,
    long_term_std: f64,
    long_term_maps: f64,
    subset_avg: f64,
    subset_std: f64,
    volatility: f64,
    form_z: f64,
}

impl Inputs {
    fn read(vector: &FeatureVector) -> Self {
        let get = |name: &str, default: f64| {
            vector
                .get(name)
                .filter(|v| v.is_finite())
                .unwrap_or(default)
        };
        let stat = vector.stat;
        let subset_avg = get(&avg_name(stat), 0.0);
        Self {
            stat,
            maps_played: get("maps_played", 0.0).max(0.0),
            sample_score: get("sample_size_score", 0.0).clamp(0.0, 1.0),
            tier: TierInfo {
                rank: get("tier_rank", 1.0).max(0.0) as u32,
                weight: get("tier_weight", 0.0).clamp(0.0, 1.0),
                name: vector.tier_name.clone(),
            },
            fallback_used: vector.fallback_used,
            series_maps: get("series_maps", 1.0).max(1.0),
            recent_avg: get("recent_avg", subset_avg),
            long_term_avg: get("long_term_avg", subset_avg),
            long_term_std: get("long_term_std_dev", 0.0).max(0.0),
            long_term_maps: get("long_term_maps", 0.0).max(0.0),
            subset_avg,
            subset_std: get(&std_dev_name(stat), 0.0).max(0.0),
            volatility: get("volatility", 0.0).max(0.0),
            form_z: get("form_z_score", 0.0),
        }
    }

    fn sample_details(&self) -> SampleDetails {
        SampleDetails {
            tier_info: self.tier.clone(),
            fallback_used: self.fallback_used,
            maps_played: self.maps_played.round() as u32,
        }
    }
}

/// Pure: the same `(vector, prop_value, cfg)` always yields the same result.
pub fn predict(
    vector: &FeatureVector,
    prop_value: f64,
    cfg: &EngineConfig,
) -> EngineResult<PredictionResult> {
    if !prop_value.is_finite() {
        return Err(EngineError::validation(format!(
            "prop value must be finite (got {prop_value})"
        )));
    }
    let x = Inputs::read(vector);
    if x.maps_played < 0.5 {
        return Ok(no_sample_prediction(&x, prop_value, cfg));
    }

    let short_weight = cfg.short_weight_min
        + (cfg.short_weight_max - cfg.short_weight_min) * x.sample_score * x.tier.weight;
    let long_avg = if x.long_term_maps > 0.0 {
        x.long_term_avg
    } else {
        x.subset_avg
    };
    // Every tier is the player's own history, so position_factor stays informational.
    let per_map = short_weight * x.recent_avg + (1.0 - short_weight) * long_avg;
    let expected_stat = per_map * x.series_maps;
    let gap = expected_stat - prop_value;

    let per_map_std = if x.subset_std > EPS {
        x.subset_std
    } else {
        // Poisson spread when every observation agrees.
        per_map.abs().sqrt()
    };
    let effective_std_dev = effective_spread(per_map_std, &x, cfg);

    let z = gap / effective_std_dev;
    let shrink =
        cfg.small_sample_shrink_floor + (1.0 - cfg.small_sample_shrink_floor) * x.sample_score;
    let probability = logistic(cfg.logistic_scale * z * shrink);
    let prediction = if probability > 0.5 {
        Call::Over
    } else {
        Call::Under
    };
    let confidence = confidence_score(probability, x.tier.weight, x.sample_score, cfg);
    let confidence_interval = interval(x.stat, expected_stat, effective_std_dev, cfg);

    let reasoning = format!(
        "Expected {stat} over {series} map(s): {expected_stat:.2} vs line {prop_value:.2} \
         (gap {gap:+.2}). Based on {maps} maps from tier '{tier}' (weight {weight:.2}){fallback}; \
         recent form is {form}.",
        stat = x.stat,
        series = x.series_maps as u32,
        maps = x.maps_played as u32,
        tier = x.tier.name,
        weight = x.tier.weight,
        fallback = if x.fallback_used {
            ", fallback tier"
        } else {
            ""
        },
        form = form_label(x.form_z),
    );

    Ok(PredictionResult {
        stat: x.stat,
        prop_value,
        prediction,
        probability,
        confidence,
        expected_stat,
        confidence_interval,
        reasoning,
        sample_details: x.sample_details(),
    })
}

fn no_sample_prediction(x: &Inputs, prop_value: f64, cfg: &EngineConfig) -> PredictionResult {
    let (per_map, per_map_std) = if x.long_term_maps > 0.0 {
        (x.long_term_avg, x.long_term_std)
    } else {
        (0.0, 0.0)
    };
    let per_map_std = if per_map_std > EPS {
        per_map_std
    } else {
        per_map.abs().sqrt()
    };
    let expected_stat = per_map * x.series_maps;
    let effective_std_dev = effective_spread(per_map_std, x, cfg);
    let prediction = if expected_stat - prop_value > 0.0 {
        Call::Over
    } else {
        Call::Under
    };
    let reasoning = format!(
        "No sample: no maps matched for {stat} at any usable tier ('{tier}'). \
         Expected {expected_stat:.2} vs line {prop_value:.2} comes from long-term history \
         only ({lt} maps); confidence held at the floor.",
        stat = x.stat,
        tier = x.tier.name,
        lt = x.long_term_maps as u32,
    );
    PredictionResult {
        stat: x.stat,
        prop_value,
        prediction,
        probability: 0.5,
        confidence: cfg.confidence_floor,
        expected_stat,
        confidence_interval: interval(x.stat, expected_stat, effective_std_dev, cfg),
        reasoning,
        sample_details: x.sample_details(),
    }
}

/// Per-map spread inflated by volatility and small samples, scaled to the series, floored.
fn effective_spread(per_map_std: f64, x: &Inputs, cfg: &EngineConfig) -> f64 {
    let spread = per_map_std
        * (1.0 + cfg.volatility_inflation * x.volatility)
        * (1.0 + cfg.small_sample_inflation * (1.0 - x.sample_score))
        * x.series_maps.sqrt();
    spread.max(cfg.min_std_dev)
}

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn confidence_score(
    probability: f64,
    tier_weight: f64,
    sample_score: f64,
    cfg: &EngineConfig,
) -> f64 {
    let raw = 200.0 * (probability - 0.5).abs();
    let discounted = raw * (0.5 + 0.5 * tier_weight) * (0.5 + 0.5 * sample_score);
    discounted.clamp(cfg.confidence_floor, cfg.confidence_ceiling)
}

fn interval(stat: Stat, expected: f64, spread: f64, cfg: &EngineConfig) -> [f64; 2] {
    let half = cfg.interval_z * spread;
    let low = expected - half;
    let low = if stat.is_signed() { low } else { low.max(0.0) };
    [low, expected + half]
}

fn form_label(z: f64) -> &'static str {
    if z > 0.5 {
        "above the long-term average"
    } else if z < -0.5 {
        "below the long-term average"
    } else {
        "in line with the long-term average"
    }
}
