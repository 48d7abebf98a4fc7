use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "props_engine";
const CONFIG_FILE: &str = "engine_config.json";
const DB_FILE: &str = "player_maps.sqlite";

/// Tunables for feature extraction and the confidence model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Most recent subset maps that make up the short-term average.
    pub recent_window: usize,
    /// Player maps (any tier) that make up the long-term average.
    pub long_term_window: usize,
    /// `maps_played` at which the sample score reaches ~63%.
    pub sample_saturation: f64,
    pub short_weight_min: f64,
    pub short_weight_max: f64,
    pub volatility_inflation: f64,
    pub small_sample_inflation: f64,
    pub min_std_dev: f64,
    pub small_sample_shrink_floor: f64,
    pub logistic_scale: f64,
    pub confidence_floor: f64,
    pub confidence_ceiling: f64,
    pub interval_z: f64,
    pub max_curve_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recent_window: 5,
            long_term_window: 40,
            sample_saturation: 10.0,
            short_weight_min: 0.35,
            short_weight_max: 0.75,
            volatility_inflation: 0.25,
            small_sample_inflation: 0.50,
            min_std_dev: 0.25,
            small_sample_shrink_floor: 0.50,
            // Logistic approximation of the standard normal CDF.
            logistic_scale: 1.702,
            confidence_floor: 5.0,
            confidence_ceiling: 95.0,
            interval_z: 1.645,
            max_curve_points: 2001,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recent_window == 0 || self.long_term_window == 0 {
            return Err(anyhow!("recent/long-term windows must be positive"));
        }
        if !(self.sample_saturation > 0.0) {
            return Err(anyhow!("sample_saturation must be positive"));
        }
        if !(0.0..=1.0).contains(&self.short_weight_min)
            || !(0.0..=1.0).contains(&self.short_weight_max)
            || self.short_weight_min > self.short_weight_max
        {
            return Err(anyhow!(
                "short weights must satisfy 0 <= min <= max <= 1 (got {}..{})",
                self.short_weight_min,
                self.short_weight_max
            ));
        }
        if !(self.min_std_dev > 0.0) {
            return Err(anyhow!("min_std_dev must be positive"));
        }
        if !(0.0..=1.0).contains(&self.small_sample_shrink_floor) {
            return Err(anyhow!("small_sample_shrink_floor must be within [0, 1]"));
        }
        if !(self.logistic_scale > 0.0) || !self.logistic_scale.is_finite() {
            return Err(anyhow!("logistic_scale must be positive"));
        }
        if !(0.0..=100.0).contains(&self.confidence_floor)
            || !(0.0..=100.0).contains(&self.confidence_ceiling)
            || self.confidence_floor > self.confidence_ceiling
        {
            return Err(anyhow!(
                "confidence band must satisfy 0 <= floor <= ceiling <= 100 (got {}..{})",
                self.confidence_floor,
                self.confidence_ceiling
            ));
        }
        if self.max_curve_points == 0 {
            return Err(anyhow!("max_curve_points must be positive"));
        }
        Ok(())
    }
}

/// Resolves the config: explicit path env var, then the app data dir, then defaults;
/// individual env overrides are applied last.
pub fn load_engine_config() -> Result<EngineConfig> {
    let mut cfg = if let Some(path) = config_path_override() {
        read_config(&path)?
    } else if let Some(path) = default_config_path()
        && path.exists()
    {
        read_config(&path)?
    } else {
        EngineConfig::default()
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<EngineConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read engine config {}", path.display()))?;
    let cfg = serde_json::from_str::<EngineConfig>(&raw)
        .with_context(|| format!("parse engine config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_engine_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(cfg).context("serialize engine config")?;
    fs::write(&tmp, json).context("write engine config")?;
    fs::rename(&tmp, path).context("swap engine config")?;
    Ok(())
}

pub fn app_data_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_DATA_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(APP_DIR));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".local").join("share").join(APP_DIR))
}

pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// `PROPS_DB_PATH` wins over the app data dir.
pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(raw) = env::var("PROPS_DB_PATH")
        && !raw.trim().is_empty()
    {
        return Some(PathBuf::from(raw.trim()));
    }
    app_data_dir().map(|dir| dir.join(DB_FILE))
}

fn config_path_override() -> Option<PathBuf> {
    env::var("PROPS_ENGINE_CONFIG")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn apply_env_overrides(cfg: &mut EngineConfig) {
    if let Some(v) = env_parse::<usize>("PROPS_RECENT_WINDOW") {
        cfg.recent_window = v;
    }
    if let Some(v) = env_parse::<usize>("PROPS_LONG_TERM_WINDOW") {
        cfg.long_term_window = v;
    }
    if let Some(v) = env_parse::<f64>("PROPS_CONFIDENCE_FLOOR") {
        cfg.confidence_floor = v;
    }
    if let Some(v) = env_parse::<f64>("PROPS_LOGISTIC_SCALE") {
        cfg.logistic_scale = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparseable {key}={raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"recent_window": 8}"#).unwrap();
        assert_eq!(cfg.recent_window, 8);
        assert_eq!(cfg.long_term_window, EngineConfig::default().long_term_window);
    }

    #[test]
    fn inverted_confidence_band_is_rejected() {
        let cfg = EngineConfig {
            confidence_floor: 80.0,
            confidence_ceiling: 20.0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("engine_config.json");
        let cfg = EngineConfig {
            logistic_scale: 1.25,
            ..EngineConfig::default()
        };
        save_engine_config(&path, &cfg).unwrap();
        assert_eq!(read_config(&path).unwrap(), cfg);
    }

    #[test]
    fn save_reports_an_unusable_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("cfg");
        fs::write(&blocker, "not a directory").unwrap();
        let path = blocker.join("engine_config.json");
        let err = save_engine_config(&path, &EngineConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("create config dir"));
    }
}
