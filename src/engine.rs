use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::curve::{self, CurvePoint};
use crate::error::{EngineError, EngineResult};
use crate::features::{
    FeatureContext, FeatureVector, Features, ValidationReport, extract, to_vector, validate,
};
use crate::model::{self, PredictionResult};
use crate::position::Position;
use crate::records::{MatchRecord, RecordSource, RecordStore, Stat, player_history};
use crate::tiered_filter::{self, FilterQuery};

/// One prop to price: who, which stat, which line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropRequest {
    #[serde(flatten)]
    pub query: FilterQuery,
    pub stat: Stat,
    pub prop_value: f64,
}

/// Features for one request, validated and laid out in canonical order.
#[derive(Debug, Clone)]
pub struct PreparedFeatures {
    pub features: Features,
    pub vector: FeatureVector,
    pub report: ValidationReport,
}

/// Filter -> extract -> validate over a record slice.
///
/// Serving and calibration both go through here, so the two paths cannot drift.
pub fn prepare_features(
    records: &[MatchRecord],
    query: &FilterQuery,
    stat: Stat,
    cfg: &EngineConfig,
) -> EngineResult<PreparedFeatures> {
    let tier = tiered_filter::filter(records, query)?;
    let long_term = player_history(records, &query.players, cfg.long_term_window);
    let ctx = FeatureContext {
        stat,
        position: Position::resolve(&query.position),
        series_maps: query.series_maps(),
        long_term: &long_term,
        tier_info: &tier.tier_info,
        fallback_used: tier.fallback_used,
        config: cfg,
    };
    let features = extract(&tier.subset, &ctx);
    let report = validate(&features);
    for warning in &report.warnings {
        log::warn!("{:?} {stat}: {warning}", query.players);
    }
    let report = report.into_result()?;
    let vector = to_vector(&features)?;
    Ok(PreparedFeatures {
        features,
        vector,
        report,
    })
}

/// Owns the loaded store and config; built once by the host and shared by reference.
#[derive(Debug, Clone)]
pub struct Engine {
    store: Arc<RecordStore>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<RecordStore>, config: EngineConfig) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|err| EngineError::validation(format!("engine config: {err:#}")))?;
        Ok(Self { store, config })
    }

    /// Startup path: any load failure is fatal.
    pub fn from_source(source: &dyn RecordSource, config: EngineConfig) -> EngineResult<Self> {
        let records = source.load_records().map_err(EngineError::FatalStartup)?;
        log::info!(
            "loaded {} player-map records from {}",
            records.len(),
            source.describe()
        );
        Self::new(Arc::new(RecordStore::from_records(records)), config)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn features_for(&self, request: &PropRequest) -> EngineResult<PreparedFeatures> {
        prepare_features(
            self.store.records(),
            &request.query,
            request.stat,
            &self.config,
        )
    }

    pub fn predict(&self, request: &PropRequest) -> EngineResult<PredictionResult> {
        let prepared = self.features_for(request)?;
        model::predict(&prepared.vector, request.prop_value, &self.config)
    }

    /// Curve centred on the request's line; features are computed once.
    pub fn curve(
        &self,
        request: &PropRequest,
        step: f64,
        range: f64,
    ) -> EngineResult<Vec<CurvePoint>> {
        let prepared = self.features_for(request)?;
        curve::sweep(
            &prepared.vector,
            request.prop_value,
            step,
            range,
            &self.config,
        )
    }

    /// Independent requests in parallel; results keep input order.
    pub fn predict_batch(&self, requests: &[PropRequest]) -> Vec<EngineResult<PredictionResult>> {
        requests.par_iter().map(|req| self.predict(req)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Call;
    use crate::records::StaticSource;
    use crate::records::test_support::record;

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn load_records(&self) -> anyhow::Result<Vec<MatchRecord>> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    fn engine() -> Engine {
        let records = vec![
            record("Faker", "T1", "LCK Spring 2024", 1, "mid", "2024-02-01", 4.0),
            record("Faker", "T1", "LCK Spring 2024", 2, "mid", "2024-02-01", 3.0),
            record("Faker", "T1", "LCK Spring 2024", 1, "mid", "2024-02-08", 5.0),
            record("Faker", "T1", "LCK Spring 2024", 2, "mid", "2024-02-08", 2.0),
        ];
        Engine::from_source(&StaticSource::new(records), EngineConfig::default()).unwrap()
    }

    fn request(prop_value: f64) -> PropRequest {
        let mut query = FilterQuery::new(&["Faker"], (1, 2), "MID");
        query.team = Some("T1".into());
        query.tournament = Some("LCK Spring 2024".into());
        PropRequest {
            query,
            stat: Stat::Kills,
            prop_value,
        }
    }

    #[test]
    fn engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn load_failure_is_fatal() {
        let err = Engine::from_source(&FailingSource, EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::FatalStartup(_)));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn bad_config_is_rejected() {
        let cfg = EngineConfig {
            recent_window: 0,
            ..EngineConfig::default()
        };
        let store = Arc::new(RecordStore::default());
        assert!(Engine::new(store, cfg).unwrap_err().is_validation());
    }

    #[test]
    fn predict_runs_the_pipeline() {
        let engine = engine();
        let res = engine.predict(&request(4.5)).unwrap();
        assert_eq!(res.sample_details.tier_info.rank, 1);
        assert_eq!(res.sample_details.maps_played, 4);
        assert!(!res.sample_details.fallback_used);
        // 3.5 kills per map over two maps.
        assert!(res.expected_stat > 4.5);
        assert_eq!(res.prediction, Call::Over);
    }

    #[test]
    fn batch_keeps_order_and_matches_single_calls() {
        let engine = engine();
        let reqs = vec![request(2.5), request(7.5), request(12.5)];
        let batch = engine.predict_batch(&reqs);
        assert_eq!(batch.len(), 3);
        for (req, res) in reqs.iter().zip(batch) {
            assert_eq!(res.unwrap(), engine.predict(req).unwrap());
        }
    }

    #[test]
    fn curve_center_matches_predict() {
        let engine = engine();
        let req = request(6.5);
        let curve = engine.curve(&req, 0.5, 2.0).unwrap();
        let center = curve.iter().find(|p| p.prop_value == 6.5).unwrap();
        let direct = engine.predict(&req).unwrap();
        assert!((center.confidence - direct.confidence).abs() <= 1e-6);
    }
}
