use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::engine::prepare_features;
use crate::features::FeatureVector;
use crate::model;
use crate::records::{MatchRecord, Stat};
use crate::tiered_filter::FilterQuery;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// One walk-forward prediction and what actually happened.
#[derive(Debug, Clone)]
pub struct Sample {
    pub player: String,
    pub date: NaiveDate,
    pub prop_value: f64,
    pub actual: f64,
    pub probability: f64,
    pub tier_rank: u32,
    pub vector: FeatureVector,
}

impl Sample {
    pub fn went_over(&self) -> bool {
        self.actual > self.prop_value
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestOptions {
    pub stat: Stat,
    /// Prior maps the player needs before a record is scored.
    pub min_history: usize,
    /// Score only the most recent N eligible records.
    pub max_samples: Option<usize>,
    pub bins: usize,
}

impl BacktestOptions {
    pub fn new(stat: Stat) -> Self {
        Self {
            stat,
            min_history: 5,
            max_samples: None,
            bins: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub stat: Stat,
    pub samples: usize,
    pub skipped: usize,
    pub logistic_scale: f64,
    pub metrics: Metrics,
    pub bins: Vec<CalibrationBin>,
    pub fitted_scale: f64,
    pub fitted_metrics: Metrics,
}

pub fn evaluate_probs(probs: &[f64], outcomes: &[bool]) -> Metrics {
    if probs.is_empty() || probs.len() != outcomes.len() {
        return Metrics::default();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, &over) in probs.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let y = if over { 1.0 } else { 0.0 };
        brier_sum += (p - y).powi(2);

        let actual_prob = if over { p } else { 1.0 - p }.clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();

        if (p > 0.5) == over {
            correct += 1;
        }
    }

    let n = probs.len() as f64;
    Metrics {
        samples: probs.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

/// Reliability table for P(over).
pub fn calibration_bins(probs: &[f64], outcomes: &[bool], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, &over) in probs.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if over {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn query_for(record: &MatchRecord) -> FilterQuery {
    FilterQuery {
        players: vec![record.player.clone()],
        team: Some(record.team.clone()),
        opponent: Some(record.opponent.clone()),
        tournament: Some(record.tournament.clone()),
        season: None,
        map_range: (record.map_index, record.map_index),
        position: record.position.clone(),
        strict_mode: false,
    }
}

/// Walk forward through `records` by date, predicting each map from strictly earlier data.
///
/// Returns the scored samples and how many eligible records failed to score.
pub fn build_samples(
    records: &[MatchRecord],
    opts: &BacktestOptions,
    cfg: &EngineConfig,
) -> (Vec<Sample>, usize) {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| r.date);

    // Per-player values in date order; a record's history is a prefix of its player's list.
    let mut history: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut eligible: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    while start < sorted.len() {
        let day = sorted[start].date;
        let end = start + sorted[start..].partition_point(|r| r.date == day);
        for (idx, record) in sorted.iter().enumerate().take(end).skip(start) {
            let seen = history.get(record.player.as_str()).map_or(0, Vec::len);
            if seen >= opts.min_history.max(1) {
                eligible.push((idx, seen));
            }
        }
        for record in &sorted[start..end] {
            history
                .entry(record.player.as_str())
                .or_default()
                .push(record.stat(opts.stat));
        }
        start = end;
    }
    if let Some(max) = opts.max_samples
        && eligible.len() > max
    {
        eligible.drain(..eligible.len() - max);
    }

    let candidates: Vec<(usize, f64)> = eligible
        .into_iter()
        .filter_map(|(idx, seen)| {
            let values = history.get(sorted[idx].player.as_str())?;
            let mut prior = values[..seen].to_vec();
            median(&mut prior).map(|m| (idx, m + 0.5))
        })
        .collect();

    let scored: Vec<Option<Sample>> = candidates
        .par_iter()
        .map(|&(idx, prop_value)| {
            let record = &sorted[idx];
            let cutoff = sorted.partition_point(|r| r.date < record.date);
            let prior = &sorted[..cutoff];
            let prepared = prepare_features(prior, &query_for(record), opts.stat, cfg).ok()?;
            let result = model::predict(&prepared.vector, prop_value, cfg).ok()?;
            Some(Sample {
                player: record.player.clone(),
                date: record.date,
                prop_value,
                actual: record.stat(opts.stat),
                probability: result.probability,
                tier_rank: result.sample_details.tier_info.rank,
                vector: prepared.vector,
            })
        })
        .collect();

    let skipped = scored.iter().filter(|s| s.is_none()).count();
    (scored.into_iter().flatten().collect(), skipped)
}

fn rescored(samples: &[Sample], cfg: &EngineConfig) -> Vec<f64> {
    samples
        .iter()
        .map(|s| {
            model::predict(&s.vector, s.prop_value, cfg)
                .map(|r| r.probability)
                .unwrap_or(0.5)
        })
        .collect()
}

/// Grid search over the logistic scale (0.5..=3.0) minimising log loss.
pub fn fit_logistic_scale(samples: &[Sample], cfg: &EngineConfig) -> (f64, Metrics) {
    let outcomes: Vec<bool> = samples.iter().map(Sample::went_over).collect();
    let probs: Vec<f64> = samples.iter().map(|s| s.probability).collect();
    let baseline = evaluate_probs(&probs, &outcomes);
    if samples.is_empty() {
        return (cfg.logistic_scale, baseline);
    }

    let grid: Vec<(f64, Metrics)> = (5..=30)
        .into_par_iter()
        .map(|step| {
            let scale = step as f64 / 10.0;
            let trial = EngineConfig {
                logistic_scale: scale,
                ..cfg.clone()
            };
            (scale, evaluate_probs(&rescored(samples, &trial), &outcomes))
        })
        .collect();

    let mut best = (cfg.logistic_scale, baseline);
    for (scale, metrics) in grid {
        if metrics.log_loss < best.1.log_loss {
            best = (scale, metrics);
        }
    }
    best
}

pub fn backtest(records: &[MatchRecord], opts: &BacktestOptions, cfg: &EngineConfig) -> BacktestReport {
    let (samples, skipped) = build_samples(records, opts, cfg);
    let outcomes: Vec<bool> = samples.iter().map(Sample::went_over).collect();
    let probs: Vec<f64> = samples.iter().map(|s| s.probability).collect();
    let metrics = evaluate_probs(&probs, &outcomes);
    let bins = calibration_bins(&probs, &outcomes, opts.bins);
    let (fitted_scale, fitted_metrics) = fit_logistic_scale(&samples, cfg);

    log::info!(
        "backtest {}: {} samples ({} skipped) brier={:.4} logloss={:.4} acc={:.3}; fitted scale {:.2} logloss={:.4}",
        opts.stat,
        samples.len(),
        skipped,
        metrics.brier,
        metrics.log_loss,
        metrics.accuracy,
        fitted_scale,
        fitted_metrics.log_loss
    );

    BacktestReport {
        stat: opts.stat,
        samples: samples.len(),
        skipped,
        logistic_scale: cfg.logistic_scale,
        metrics,
        bins,
        fitted_scale,
        fitted_metrics,
    }
}
