//! Canonical feature encoding.
//!
//! `extract` is the only routine that turns records into features. The engine calls it
//! when serving a prop and the calibration pass calls it when replaying history, so a
//! vector always means the same thing relative to [`FEATURE_ORDER`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::position::{Position, position_factor};
use crate::records::{MatchRecord, Stat};
use crate::tiered_filter::TierInfo;

pub const N_FEATURES: usize = 37;

/// Frozen feature layout. Appending is a format change; reordering is never allowed.
pub const FEATURE_ORDER: [&str; N_FEATURES] = [
    "avg_kills",
    "std_dev_kills",
    "avg_deaths",
    "std_dev_deaths",
    "avg_assists",
    "std_dev_assists",
    "avg_damage",
    "std_dev_damage",
    "avg_vision_score",
    "std_dev_vision_score",
    "avg_creep_score",
    "std_dev_creep_score",
    "avg_gold_at_10",
    "std_dev_gold_at_10",
    "avg_xp_at_10",
    "std_dev_xp_at_10",
    "avg_cs_at_10",
    "std_dev_cs_at_10",
    "avg_gold_diff_at_15",
    "std_dev_gold_diff_at_15",
    "avg_xp_diff_at_15",
    "std_dev_xp_diff_at_15",
    "avg_cs_diff_at_15",
    "std_dev_cs_diff_at_15",
    "maps_played",
    "recent_avg",
    "long_term_avg",
    "long_term_std_dev",
    "long_term_maps",
    "form_z_score",
    "form_deviation_ratio",
    "position_factor",
    "sample_size_score",
    "volatility",
    "series_maps",
    "tier_rank",
    "tier_weight",
];

const VOLATILITY_CAP: f64 = 5.0;
const EPS: f64 = 1e-9;

pub fn avg_name(stat: Stat) -> String {
    format!("avg_{}", stat.name())
}

pub fn std_dev_name(stat: Stat) -> String {
    format!("std_dev_{}", stat.name())
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_ORDER.iter().position(|n| *n == name)
}

/// Value used when a name is absent; `None` means the name is required.
pub fn neutral_default(name: &str) -> Option<f64> {
    match name {
        "position_factor" | "series_maps" | "tier_rank" => Some(1.0),
        "form_z_score" | "form_deviation_ratio" | "volatility" | "recent_avg"
        | "long_term_avg" | "long_term_std_dev" | "long_term_maps" => Some(0.0),
        _ => None,
    }
}

/// Saturating score in [0, 1): 0 with no maps, approaching 1 as the sample grows.
pub fn sample_size_score(maps_played: f64, saturation: f64) -> f64 {
    if maps_played <= 0.0 {
        return 0.0;
    }
    1.0 - (-maps_played / saturation.max(EPS)).exp()
}

/// Named feature values plus the metadata that travels with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub stat: Stat,
    pub tier_name: String,
    pub fallback_used: bool,
    values: BTreeMap<String, f64>,
}

impl Features {
    pub fn new(stat: Stat, tier_name: impl Into<String>, fallback_used: bool) -> Self {
        Self {
            stat,
            tier_name: tier_name.into(),
            fallback_used,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<f64> {
        self.values.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Rebuilds the mapping from a vector; every canonical name is present afterwards.
    pub fn from_vector(vector: &FeatureVector) -> Self {
        let mut out = Self::new(vector.stat, vector.tier_name.clone(), vector.fallback_used);
        for (name, value) in FEATURE_ORDER.iter().zip(vector.values.iter()) {
            out.set(*name, *value);
        }
        out
    }
}

/// Feature values laid out in [`FEATURE_ORDER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureVector")]
pub struct FeatureVector {
    pub stat: Stat,
    pub tier_name: String,
    pub fallback_used: bool,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawFeatureVector {
    stat: Stat,
    tier_name: String,
    fallback_used: bool,
    values: Vec<f64>,
}

impl TryFrom<RawFeatureVector> for FeatureVector {
    type Error = EngineError;

    fn try_from(raw: RawFeatureVector) -> Result<Self, Self::Error> {
        Self::from_values(raw.stat, raw.tier_name, raw.fallback_used, raw.values)
    }
}

impl FeatureVector {
    pub fn from_values(
        stat: Stat,
        tier_name: impl Into<String>,
        fallback_used: bool,
        values: Vec<f64>,
    ) -> EngineResult<Self> {
        if values.len() != N_FEATURES {
            return Err(EngineError::validation(format!(
                "feature vector has {} values, expected {N_FEATURES}",
                values.len()
            )));
        }
        Ok(Self {
            stat,
            tier_name: tier_name.into(),
            fallback_used,
            values,
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).and_then(|idx| self.values.get(idx).copied())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Lays `features` out in canonical order, filling neutral defaults.
pub fn to_vector(features: &Features) -> EngineResult<FeatureVector> {
    let mut values = Vec::with_capacity(N_FEATURES);
    let mut missing = Vec::new();
    for name in FEATURE_ORDER {
        match features.get(name).or_else(|| neutral_default(name)) {
            Some(v) => values.push(v),
            None => missing.push(name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(EngineError::MissingFeatures(missing));
    }
    FeatureVector::from_values(
        features.stat,
        features.tier_name.clone(),
        features.fallback_used,
        values,
    )
}

/// Everything besides the subset that extraction needs.
#[derive(Debug, Clone)]
pub struct FeatureContext<'a> {
    pub stat: Stat,
    pub position: Option<Position>,
    pub series_maps: u32,
    /// Broader lookback window for the player, oldest first.
    pub long_term: &'a [&'a MatchRecord],
    pub tier_info: &'a TierInfo,
    pub fallback_used: bool,
    pub config: &'a EngineConfig,
}

pub fn extract(subset: &[&MatchRecord], ctx: &FeatureContext<'_>) -> Features {
    let mut out = Features::new(ctx.stat, ctx.tier_info.name.clone(), ctx.fallback_used);

    for stat in Stat::ALL {
        let values: Vec<f64> = subset.iter().map(|r| r.stat(stat)).collect();
        out.set(avg_name(stat), mean(&values));
        out.set(std_dev_name(stat), sample_std_dev(&values));
    }

    let maps_played = subset.len() as f64;
    out.set("maps_played", maps_played);

    let target: Vec<f64> = subset.iter().map(|r| r.stat(ctx.stat)).collect();
    let target_mean = mean(&target);

    let mut by_date: Vec<&MatchRecord> = subset.to_vec();
    by_date.sort_by_key(|r| r.date);
    let recent: Vec<f64> = by_date
        .iter()
        .rev()
        .take(ctx.config.recent_window)
        .map(|r| r.stat(ctx.stat))
        .collect();
    let recent_avg = mean(&recent);
    out.set("recent_avg", recent_avg);

    let long_values: Vec<f64> = ctx.long_term.iter().map(|r| r.stat(ctx.stat)).collect();
    let long_term_avg = mean(&long_values);
    let long_term_std = sample_std_dev(&long_values);
    out.set("long_term_avg", long_term_avg);
    out.set("long_term_std_dev", long_term_std);
    out.set("long_term_maps", long_values.len() as f64);

    let have_form = !recent.is_empty() && !long_values.is_empty();
    let form_z = if have_form && long_term_std > EPS {
        (recent_avg - long_term_avg) / long_term_std
    } else {
        0.0
    };
    let form_ratio = if have_form && long_term_avg.abs() > EPS {
        (recent_avg - long_term_avg).abs() / long_term_avg.abs()
    } else {
        0.0
    };
    out.set("form_z_score", form_z);
    out.set("form_deviation_ratio", form_ratio);

    out.set(
        "position_factor",
        position_factor(ctx.position.as_ref(), ctx.stat),
    );
    out.set(
        "sample_size_score",
        sample_size_score(maps_played, ctx.config.sample_saturation),
    );

    let target_std = sample_std_dev(&target);
    // Differentials centre on zero, so their spread is measured against the player's own.
    let scale = if ctx.stat.is_signed() {
        long_term_std
    } else {
        target_mean.abs()
    };
    let volatility = if scale > EPS {
        (target_std / scale).clamp(0.0, VOLATILITY_CAP)
    } else {
        0.0
    };
    out.set("volatility", volatility);
    out.set("series_maps", ctx.series_maps.max(1) as f64);
    out.set("tier_rank", ctx.tier_info.rank as f64);
    out.set("tier_weight", ctx.tier_info.weight);
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub coverage: Coverage,
}

impl ValidationReport {
    pub fn into_result(self) -> EngineResult<Self> {
        if self.is_valid {
            return Ok(self);
        }
        let missing_required: Vec<String> = self
            .coverage
            .missing
            .iter()
            .filter(|n| neutral_default(n).is_none())
            .cloned()
            .collect();
        if !missing_required.is_empty() && missing_required.len() == self.errors.len() {
            return Err(EngineError::MissingFeatures(missing_required));
        }
        Err(EngineError::InvalidFeatures(self.errors))
    }
}

pub fn validate(features: &Features) -> ValidationReport {
    let mut report = ValidationReport::default();

    for name in FEATURE_ORDER {
        if features.get(name).is_some() {
            report.coverage.present.push(name.to_string());
        } else {
            report.coverage.missing.push(name.to_string());
            if neutral_default(name).is_none() {
                report
                    .errors
                    .push(format!("missing required feature '{name}'"));
            }
        }
    }

    for (name, value) in features.iter() {
        if feature_index(name).is_none() {
            report
                .warnings
                .push(format!("unknown feature '{name}' is ignored"));
            continue;
        }
        if !value.is_finite() {
            report.errors.push(format!("{name} is not finite ({value})"));
            continue;
        }
        let must_be_non_negative = name.starts_with("std_dev_")
            || name == "long_term_std_dev"
            || name == "long_term_maps"
            || (name == "long_term_avg" && !features.stat.is_signed())
            || name == "maps_played"
            || (name.starts_with("avg_") && !is_signed_avg(name));
        if must_be_non_negative && value < 0.0 {
            report.errors.push(format!("{name} is negative ({value})"));
        }
    }

    if let Some(pf) = features.get("position_factor")
        && pf.is_finite()
        && !(0.1..=2.0).contains(&pf)
    {
        report
            .warnings
            .push(format!("position_factor {pf:.3} is outside the plausible band"));
    }
    if let Some(vol) = features.get("volatility")
        && vol.is_finite()
        && vol > 2.0
    {
        report
            .warnings
            .push(format!("volatility {vol:.3} is extreme"));
    }
    if let Some(w) = features.get("tier_weight")
        && w.is_finite()
        && !(0.0..=1.0).contains(&w)
    {
        report
            .warnings
            .push(format!("tier_weight {w:.3} is outside [0, 1]"));
    }

    report.is_valid = report.errors.is_empty();
    report
}

fn is_signed_avg(name: &str) -> bool {
    Stat::ALL
        .iter()
        .any(|s| s.is_signed() && name == avg_name(*s))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::test_support::record;

    fn tier(rank: u32, weight: f64) -> TierInfo {
        TierInfo {
            rank,
            weight,
            name: "Exact Match".to_string(),
        }
    }

    fn sample_records() -> Vec<MatchRecord> {
        vec![
            record("Faker", "T1", "LCK", 1, "mid", "2024-01-01", 2.0),
            record("Faker", "T1", "LCK", 2, "mid", "2024-01-02", 4.0),
            record("Faker", "T1", "LCK", 1, "mid", "2024-01-03", 6.0),
            record("Faker", "T1", "LCK", 2, "mid", "2024-01-04", 8.0),
        ]
    }

    fn extract_all(records: &[MatchRecord], cfg: &EngineConfig) -> Features {
        let subset: Vec<&MatchRecord> = records.iter().collect();
        let info = tier(1, 1.0);
        let ctx = FeatureContext {
            stat: Stat::Kills,
            position: Position::resolve("MID"),
            series_maps: 2,
            long_term: &subset,
            tier_info: &info,
            fallback_used: false,
            config: cfg,
        };
        extract(&subset, &ctx)
    }

    #[test]
    fn feature_order_has_no_duplicates() {
        let mut names = FEATURE_ORDER.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), N_FEATURES);
        for stat in Stat::ALL {
            assert!(feature_index(&avg_name(stat)).is_some());
            assert!(feature_index(&std_dev_name(stat)).is_some());
        }
    }

    #[test]
    fn extract_fills_every_canonical_name() {
        let cfg = EngineConfig::default();
        let records = sample_records();
        let f = extract_all(&records, &cfg);
        for name in FEATURE_ORDER {
            assert!(f.get(name).is_some(), "missing {name}");
        }
        assert_eq!(f.get("maps_played"), Some(4.0));
        assert_eq!(f.get("avg_kills"), Some(5.0));
        let sd = f.get("std_dev_kills").unwrap();
        assert!((sd - (20.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(f.get("series_maps"), Some(2.0));
        assert_eq!(f.get("position_factor"), Some(Position::Mid.stat_factor(Stat::Kills)));
        assert!(validate(&f).is_valid);
    }

    #[test]
    fn recent_window_uses_latest_dates() {
        let cfg = EngineConfig {
            recent_window: 2,
            ..EngineConfig::default()
        };
        let mut records = sample_records();
        records.reverse();
        let f = extract_all(&records, &cfg);
        assert_eq!(f.get("recent_avg"), Some(7.0));
        assert!(f.get("form_z_score").unwrap() > 0.0);
        let ratio = f.get("form_deviation_ratio").unwrap();
        assert!((ratio - 0.4).abs() < 1e-12);
    }

    #[test]
    fn empty_subset_is_neutral_not_nan() {
        let cfg = EngineConfig::default();
        let f = extract_all(&[], &cfg);
        assert_eq!(f.get("maps_played"), Some(0.0));
        assert_eq!(f.get("sample_size_score"), Some(0.0));
        assert_eq!(f.get("form_z_score"), Some(0.0));
        assert_eq!(f.get("volatility"), Some(0.0));
        assert!(validate(&f).is_valid);
    }

    #[test]
    fn vector_matches_mapping_in_both_directions() {
        let cfg = EngineConfig::default();
        let f = extract_all(&sample_records(), &cfg);
        let v = to_vector(&f).unwrap();
        assert_eq!(v.len(), N_FEATURES);
        for (i, name) in FEATURE_ORDER.iter().enumerate() {
            assert_eq!(v.values()[i], f.get(name).unwrap());
        }
        let back = Features::from_vector(&v);
        assert_eq!(back, f);
    }

    #[test]
    fn to_vector_fills_neutral_defaults_and_rejects_required_gaps() {
        let cfg = EngineConfig::default();
        let mut f = extract_all(&sample_records(), &cfg);
        f.remove("position_factor");
        let v = to_vector(&f).unwrap();
        assert_eq!(v.get("position_factor"), Some(1.0));

        f.remove("maps_played");
        match to_vector(&f) {
            Err(EngineError::MissingFeatures(names)) => assert_eq!(names, vec!["maps_played"]),
            other => panic!("expected missing features, got {other:?}"),
        }
        let report = validate(&f);
        assert!(!report.is_valid);
        assert!(report.coverage.missing.contains(&"maps_played".to_string()));
        assert!(report.coverage.missing.contains(&"position_factor".to_string()));
    }

    #[test]
    fn negative_std_dev_is_an_error() {
        let cfg = EngineConfig::default();
        let mut f = extract_all(&sample_records(), &cfg);
        f.set("std_dev_kills", -0.5);
        let report = validate(&f);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("std_dev_kills")));
        assert!(matches!(
            report.into_result(),
            Err(EngineError::InvalidFeatures(_))
        ));
    }

    #[test]
    fn signed_differentials_may_be_negative() {
        let cfg = EngineConfig::default();
        let mut f = extract_all(&sample_records(), &cfg);
        f.set("avg_gold_diff_at_15", -350.0);
        assert!(validate(&f).is_valid);
    }

    #[test]
    fn signed_volatility_is_relative_to_long_term_spread() {
        let cfg = EngineConfig::default();
        let records: Vec<MatchRecord> = (0..10)
            .map(|i| {
                let mut r = record("Zeus", "T1", "LCK", 1, "top", "2024-02-01", 3.0);
                r.date = r.date + chrono::Duration::days(i);
                r.gold_diff_at_15 = if i % 2 == 0 { 1_000.0 } else { -980.0 };
                r
            })
            .collect();
        let subset: Vec<&MatchRecord> = records.iter().collect();
        let info = tier(1, 1.0);
        let ctx = FeatureContext {
            stat: Stat::GoldDiffAt15,
            position: Position::resolve("TOP"),
            series_maps: 1,
            long_term: &subset,
            tier_info: &info,
            fallback_used: false,
            config: &cfg,
        };
        let f = extract(&subset, &ctx);
        assert!((f.get("volatility").unwrap() - 1.0).abs() < 1e-12);
        let report = validate(&f);
        assert!(report.is_valid);
        assert!(report.warnings.iter().all(|w| !w.contains("volatility")));
    }

    #[test]
    fn warnings_do_not_invalidate() {
        let cfg = EngineConfig::default();
        let mut f = extract_all(&sample_records(), &cfg);
        f.set("position_factor", 3.5);
        f.set("volatility", 4.0);
        let report = validate(&f);
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn sample_size_score_saturates() {
        assert_eq!(sample_size_score(0.0, 10.0), 0.0);
        let mut prev = 0.0;
        for n in 1..30 {
            let s = sample_size_score(n as f64, 10.0);
            assert!(s > prev && s <= 1.0);
            prev = s;
        }
    }

    #[test]
    fn from_values_checks_length() {
        assert!(FeatureVector::from_values(Stat::Kills, "x", false, vec![0.0; 3]).is_err());
    }

    #[test]
    fn deserialize_checks_length() {
        let short = r#"{"stat":"kills","tier_name":"x","fallback_used":false,"values":[1.0,2.0]}"#;
        assert!(serde_json::from_str::<FeatureVector>(short).is_err());

        let cfg = EngineConfig::default();
        let v = to_vector(&extract_all(&sample_records(), &cfg)).unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(serde_json::from_str::<FeatureVector>(&json).unwrap(), v);
    }
}
