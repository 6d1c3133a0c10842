//! End-to-end training run and single-patient inference.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::classifier::{ClassifierEvaluation, FeatureImportance, RiskClassifier, TrainedClassifier};
use crate::config::EngineConfig;
use crate::dataset::{self, PatientSeries};
use crate::error::{EngineError, Result};
use crate::features::{CategoryEncoder, FeatureContext, FeatureScaler, FeatureVector};
use crate::forecaster::{MoodForecaster, RegressorEvaluation, TrainedRegressor, Trajectory};
use crate::models::{LabeledObservation, Observation, Recommendation, RiskLevel};
use crate::recommend::recommend;
use crate::risk;
use crate::store::{self, ArtifactStore};
use crate::trends;

pub const MODEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Observations grouped per patient, trend-annotated and labelled.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub series: Vec<PatientSeries>,
    pub labeled: Vec<LabeledObservation>,
}

impl PreparedDataset {
    pub fn new(observations: Vec<Observation>, config: &EngineConfig) -> Self {
        let series = dataset::group_by_patient(observations);
        let trends = trends::annotate_all(&series, config.trend_window);
        let labeled = risk::label_all(trends, config.forecast_horizon_days);
        Self { series, labeled }
    }

    /// Every observation needs a gender for the encoder to cover it.
    pub fn fit_encoder(&self) -> Result<CategoryEncoder> {
        if let Some(missing) = self.labeled.iter().find(|l| l.observation().gender.is_none()) {
            let obs = missing.observation();
            return Err(EngineError::missing(&obs.patient_id, Some(obs.date), "gender"));
        }
        let encoder = CategoryEncoder::fit(
            self.labeled
                .iter()
                .filter_map(|l| l.observation().gender.as_deref()),
        )?;
        info!(categories = ?encoder.classes(), "gender encoder fitted");
        Ok(encoder)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub risk_classifier_accuracy: f64,
    pub mood_predictor_mse: f64,
    pub mood_predictor_r2: f64,
    pub mood_predictor_rmse: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientPrediction {
    pub patient_id: String,
    pub date: NaiveDate,
    pub observation: Observation,
    pub mood_trend: f64,
    pub anxiety_trend: f64,
    pub risk_level: RiskLevel,
    pub risk_probabilities: BTreeMap<RiskLevel, f64>,
    pub confidence: f64,
    pub future_mood: f64,
    pub trajectory: Trajectory,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub model_version: String,
    pub observations: usize,
    pub patients: usize,
    pub regression_rows: usize,
    pub model_performance: ModelPerformance,
    pub feature_importance: Vec<FeatureImportance>,
    pub classifier_evaluation: ClassifierEvaluation,
    pub forecaster_evaluation: RegressorEvaluation,
    pub sample_prediction: Option<PatientPrediction>,
}

/// Both fitted models; they share one encoder/scaler context.
#[derive(Debug, Clone)]
pub struct TrainedModels {
    config: EngineConfig,
    pub classifier: RiskClassifier,
    pub forecaster: MoodForecaster,
}

impl TrainedModels {
    pub fn context(&self) -> Result<Arc<FeatureContext>> {
        self.classifier.context()
    }

    pub fn persist(&self, store: &dyn ArtifactStore) -> Result<()> {
        let context = self.context()?;
        store::save(store, store::RISK_CLASSIFIER_KEY, self.classifier.trained()?)?;
        store::save(store, store::MOOD_FORECASTER_KEY, self.forecaster.trained()?)?;
        store::save(store, store::FEATURE_SCALER_KEY, &context.scaler)?;
        store::save(store, store::CATEGORY_ENCODER_KEY, &context.encoder)?;
        info!("model artifacts persisted");
        Ok(())
    }

    pub fn load(store: &dyn ArtifactStore, config: &EngineConfig) -> Result<Self> {
        let classifier: TrainedClassifier = store::load(store, store::RISK_CLASSIFIER_KEY)?;
        let forecaster: TrainedRegressor = store::load(store, store::MOOD_FORECASTER_KEY)?;
        let scaler: FeatureScaler = store::load(store, store::FEATURE_SCALER_KEY)?;
        let encoder: CategoryEncoder = store::load(store, store::CATEGORY_ENCODER_KEY)?;

        let context = Arc::new(FeatureContext::new(encoder, scaler));
        Ok(Self {
            config: config.clone(),
            classifier: RiskClassifier::from_parts(config, classifier, Arc::clone(&context)),
            forecaster: MoodForecaster::from_parts(config, forecaster, context),
        })
    }

    /// Predicts from the patient's most recent trend-annotated day.
    pub fn predict_series(&self, series: &PatientSeries) -> Result<PatientPrediction> {
        let latest = trends::annotate_series(series, self.config.trend_window)
            .pop()
            .ok_or_else(|| EngineError::NotFound(format!("observations for patient {}", series.patient_id)))?;

        let features = self.context()?.vector(&latest)?;
        let risk = self.classifier.predict(&features)?;
        let future_mood = self.forecaster.predict(&features)?;
        let current = &latest.observation;

        Ok(PatientPrediction {
            patient_id: current.patient_id.clone(),
            date: current.date,
            mood_trend: latest.mood_trend,
            anxiety_trend: latest.anxiety_trend,
            risk_level: risk.risk_level,
            confidence: risk.confidence(),
            future_mood,
            trajectory: Trajectory::between(current.mood_score, future_mood),
            recommendations: recommend(current, risk.risk_level, future_mood),
            risk_probabilities: risk.probabilities,
            observation: latest.observation,
        })
    }
}

/// Fits the classifier on every labelled day and the forecaster on the days
/// that have a mood recorded one horizon later.
pub fn train(observations: Vec<Observation>, config: &EngineConfig) -> Result<(TrainedModels, TrainingReport)> {
    let _span = tracing::info_span!("training_run").entered();
    let n_observations = observations.len();
    let data = PreparedDataset::new(observations, config);
    let encoder = data.fit_encoder()?;

    let features: Vec<FeatureVector> = data
        .labeled
        .par_iter()
        .map(|l| FeatureVector::build(&l.trend, &encoder))
        .collect::<Result<_>>()?;
    let labels: Vec<RiskLevel> = data.labeled.iter().map(|l| l.risk_level).collect();

    let mut classifier = RiskClassifier::new(config);
    classifier.train(encoder, &features, &labels)?;
    let held_out = classifier.held_out().ok_or(EngineError::NotTrained("risk classifier"))?;
    let classifier_evaluation = classifier.evaluate(held_out)?;

    let (regression_features, targets): (Vec<FeatureVector>, Vec<f64>) = data
        .labeled
        .iter()
        .zip(&features)
        .filter_map(|(l, row)| l.future_mood.map(|mood| (*row, mood)))
        .unzip();
    info!(
        rows = targets.len(),
        dropped = features.len() - targets.len(),
        "regression rows without a future mood dropped"
    );

    let context = classifier.context()?;
    let mut forecaster = MoodForecaster::new(config);
    forecaster.train(Arc::clone(&context), &regression_features, &targets)?;
    debug_assert!(Arc::ptr_eq(&context, &forecaster.context()?));
    let held_out = forecaster.held_out().ok_or(EngineError::NotTrained("mood forecaster"))?;
    let forecaster_evaluation = forecaster.evaluate(held_out)?;

    let models = TrainedModels {
        config: config.clone(),
        classifier,
        forecaster,
    };
    let sample_prediction = sample_series(&data.series)
        .map(|series| models.predict_series(series))
        .transpose()?;

    let report = TrainingReport {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        model_version: MODEL_VERSION.to_string(),
        observations: n_observations,
        patients: data.series.len(),
        regression_rows: targets.len(),
        model_performance: ModelPerformance {
            risk_classifier_accuracy: classifier_evaluation.accuracy,
            mood_predictor_mse: forecaster_evaluation.mean_squared_error,
            mood_predictor_r2: forecaster_evaluation.r2,
            mood_predictor_rmse: forecaster_evaluation.root_mean_squared_error,
        },
        feature_importance: models.classifier.feature_importance()?,
        classifier_evaluation,
        forecaster_evaluation,
        sample_prediction,
    };
    info!(run_id = %report.run_id, "training run complete");
    Ok((models, report))
}

/// The patient whose latest mood is lowest; ties go to the smaller id.
fn sample_series(series: &[PatientSeries]) -> Option<&PatientSeries> {
    series
        .iter()
        .filter_map(|s| s.latest().map(|obs| (obs.mood_score, s)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, s)| s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testutil::{cohort, fast_config};

    #[test]
    fn full_training_run() {
        let config = fast_config();
        let (models, report) = train(cohort(12, 30, 42), &config).unwrap();

        assert_eq!(report.observations, 360);
        assert_eq!(report.patients, 12);
        // 23 of each patient's 30 days have a day seven days on
        assert_eq!(report.regression_rows, 12 * 23);
        assert!((0.0..=1.0).contains(&report.model_performance.risk_classifier_accuracy));
        assert!(report.model_performance.mood_predictor_mse >= 0.0);
        assert_eq!(report.feature_importance.len(), crate::features::NUM_FEATURES);

        let sample = report.sample_prediction.as_ref().unwrap();
        let total: f64 = sample.risk_probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(models.classifier.trained().is_ok());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["model_performance"]["risk_classifier_accuracy"].is_number());
        assert!(json["sample_prediction"]["risk_probabilities"].is_object());
    }

    #[test]
    fn forecaster_shares_the_classifier_scaler() {
        let (models, _) = train(cohort(12, 30, 42), &fast_config()).unwrap();
        let classifier_context = models.classifier.context().unwrap();
        let forecaster_context = models.forecaster.context().unwrap();
        assert!(Arc::ptr_eq(&classifier_context, &forecaster_context));

        let restored = {
            let store = MemoryStore::new();
            models.persist(&store).unwrap();
            TrainedModels::load(&store, &fast_config()).unwrap()
        };
        assert!(Arc::ptr_eq(
            &restored.classifier.context().unwrap(),
            &restored.forecaster.context().unwrap()
        ));
    }

    #[test]
    fn persisted_models_predict_the_same() {
        let config = fast_config();
        let (models, _) = train(cohort(12, 30, 42), &config).unwrap();
        let store = MemoryStore::new();
        models.persist(&store).unwrap();
        let restored = TrainedModels::load(&store, &config).unwrap();

        let series = dataset::group_by_patient(cohort(12, 30, 42));
        for s in &series {
            let a = models.predict_series(s).unwrap();
            let b = restored.predict_series(s).unwrap();
            assert_eq!(a.risk_level, b.risk_level);
            assert_eq!(a.risk_probabilities, b.risk_probabilities);
            assert_eq!(a.future_mood, b.future_mood);
        }
    }

    #[test]
    fn loading_from_empty_store_is_not_found() {
        let err = TrainedModels::load(&MemoryStore::new(), &fast_config()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn missing_gender_is_a_validation_error() {
        let mut observations = cohort(12, 30, 42);
        observations[40].gender = None;
        let err = train(observations, &fast_config()).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "gender", .. }));
    }
}
