//! Gradient-boosted regression of the mood recorded one horizon ahead.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BoostingParams, EngineConfig};
use crate::error::{EngineError, Result};
use crate::features::{FeatureContext, FeatureVector};
use crate::metrics;
use crate::sampling;
use crate::tree::{DecisionTree, Target};

const MODEL_NAME: &str = "mood forecaster";

/// Forecasts within this distance of the current mood count as stable.
pub const STABLE_BAND: f64 = 0.5;

/// Least-squares boosting: each stage fits the residuals of the ones before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<DecisionTree>,
}

impl GradientBoosting {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &BoostingParams, seed: u64) -> Self {
        let init = if y.is_empty() {
            0.0
        } else {
            y.iter().sum::<f64>() / y.len() as f64
        };
        let n_features = x.first().map_or(0, Vec::len);
        let tree_params = params.tree();
        let rows: Vec<usize> = (0..x.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut fitted = vec![init; y.len()];
        let mut residuals = vec![0.0; y.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            for ((r, target), f) in residuals.iter_mut().zip(y).zip(&fitted) {
                *r = target - f;
            }
            let tree = DecisionTree::fit(
                x,
                Target::Values(&residuals),
                &rows,
                &tree_params,
                n_features,
                &mut rng,
            );
            for (f, row) in fitted.iter_mut().zip(x) {
                *f += params.learning_rate * tree.predict_value(row);
            }
            trees.push(tree);
        }

        GradientBoosting {
            init,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict_value(row)).sum::<f64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedRegressor {
    pub model: GradientBoosting,
}

#[derive(Debug, Clone, Default)]
pub struct RegressionPartition {
    pub features: Vec<FeatureVector>,
    pub targets: Vec<f64>,
}

impl RegressionPartition {
    fn select(features: &[FeatureVector], targets: &[f64], rows: &[usize]) -> Self {
        RegressionPartition {
            features: rows.iter().map(|&r| features[r]).collect(),
            targets: rows.iter().map(|&r| targets[r]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressorEvaluation {
    pub mean_squared_error: f64,
    pub r2: f64,
    pub root_mean_squared_error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trajectory {
    Improving,
    Stable,
    Declining,
}

impl Trajectory {
    pub fn between(current: f64, forecast: f64) -> Self {
        let delta = forecast - current;
        if delta > STABLE_BAND {
            Trajectory::Improving
        } else if delta < -STABLE_BAND {
            Trajectory::Declining
        } else {
            Trajectory::Stable
        }
    }
}

#[derive(Debug, Clone)]
pub struct MoodForecaster {
    params: BoostingParams,
    test_fraction: f64,
    seed: u64,
    fitted: Option<(TrainedRegressor, Arc<FeatureContext>)>,
    held_out: Option<RegressionPartition>,
}

impl MoodForecaster {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            params: config.boosting,
            test_fraction: config.test_fraction,
            seed: config.seed,
            fitted: None,
            held_out: None,
        }
    }

    pub fn from_parts(config: &EngineConfig, model: TrainedRegressor, context: Arc<FeatureContext>) -> Self {
        Self {
            fitted: Some((model, context)),
            ..Self::new(config)
        }
    }

    /// Fits on a shuffled split, scaling with the context the classifier
    /// fitted; the scaler is never refitted here.
    pub fn train(
        &mut self,
        context: Arc<FeatureContext>,
        features: &[FeatureVector],
        targets: &[f64],
    ) -> Result<&TrainedRegressor> {
        let _span = tracing::info_span!("train_mood_forecaster", rows = targets.len()).entered();
        if features.len() != targets.len() {
            return Err(EngineError::InsufficientData(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }

        let split = sampling::shuffle_split(targets.len(), self.test_fraction, self.seed)?;
        let train = RegressionPartition::select(features, targets, &split.train);
        let held_out = RegressionPartition::select(features, targets, &split.test);

        let x = context.scale_all(&train.features);
        let model = GradientBoosting::fit(&x, &train.targets, &self.params, self.seed);

        info!(
            train = train.len(),
            held_out = held_out.len(),
            stages = self.params.n_estimators,
            "mood forecaster trained"
        );

        self.held_out = Some(held_out);
        let (model, _) = self.fitted.insert((TrainedRegressor { model }, context));
        Ok(model)
    }

    pub fn trained(&self) -> Result<&TrainedRegressor> {
        self.fitted
            .as_ref()
            .map(|(model, _)| model)
            .ok_or(EngineError::NotTrained(MODEL_NAME))
    }

    /// The context handed to [`MoodForecaster::train`], shared with the classifier.
    pub fn context(&self) -> Result<Arc<FeatureContext>> {
        self.fitted
            .as_ref()
            .map(|(_, ctx)| Arc::clone(ctx))
            .ok_or(EngineError::NotTrained(MODEL_NAME))
    }

    pub fn held_out(&self) -> Option<&RegressionPartition> {
        self.held_out.as_ref()
    }

    pub fn evaluate(&self, held_out: &RegressionPartition) -> Result<RegressorEvaluation> {
        let (model, context) = self.fitted.as_ref().ok_or(EngineError::NotTrained(MODEL_NAME))?;
        let predicted: Vec<f64> = held_out
            .features
            .iter()
            .map(|row| model.model.predict(&context.scale(row)))
            .collect();

        let mse = metrics::mean_squared_error(&held_out.targets, &predicted);
        let evaluation = RegressorEvaluation {
            mean_squared_error: mse,
            r2: metrics::r2_score(&held_out.targets, &predicted),
            root_mean_squared_error: mse.sqrt(),
        };
        info!(
            mse = evaluation.mean_squared_error,
            r2 = evaluation.r2,
            rmse = evaluation.root_mean_squared_error,
            "mood forecaster evaluated"
        );
        Ok(evaluation)
    }

    /// Forecast rounded to one decimal; not clipped to the mood scale.
    pub fn predict(&self, features: &FeatureVector) -> Result<f64> {
        let (model, context) = self.fitted.as_ref().ok_or(EngineError::NotTrained(MODEL_NAME))?;
        let raw = model.model.predict(&context.scale(features));
        Ok((raw * 10.0).round() / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{CategoryEncoder, FeatureScaler};
    use crate::testutil::{fast_config, observation, with_trend};

    fn context_for(rows: &[FeatureVector]) -> Arc<FeatureContext> {
        let encoder = CategoryEncoder::fit(["F"]).unwrap();
        Arc::new(FeatureContext::new(encoder, FeatureScaler::fit(rows).unwrap()))
    }

    /// Future mood is a noiseless function of today's mood.
    fn linear_set() -> (Vec<FeatureVector>, Vec<f64>) {
        let encoder = CategoryEncoder::fit(["F"]).unwrap();
        (0..120)
            .map(|i| {
                let mood = 1.0 + (i % 90) as f64 / 10.0;
                let obs = with_trend(observation("a", i, mood), mood, 3.0);
                (FeatureVector::build(&obs, &encoder).unwrap(), 0.5 * mood + 2.0)
            })
            .unzip()
    }

    #[test]
    fn predict_before_train_fails() {
        let (features, _) = linear_set();
        let forecaster = MoodForecaster::new(&fast_config());
        assert!(matches!(
            forecaster.predict(&features[0]),
            Err(EngineError::NotTrained(_))
        ));
        assert!(matches!(
            forecaster.evaluate(&RegressionPartition::default()),
            Err(EngineError::NotTrained(_))
        ));
    }

    #[test]
    fn boosting_fits_a_clean_signal() {
        let (features, targets) = linear_set();
        let mut forecaster = MoodForecaster::new(&fast_config());
        forecaster
            .train(context_for(&features), &features, &targets)
            .unwrap();

        let held_out = forecaster.held_out().unwrap().clone();
        assert_eq!(held_out.len(), 24);
        let evaluation = forecaster.evaluate(&held_out).unwrap();
        assert!(evaluation.r2 > 0.9, "r2 was {}", evaluation.r2);
        assert!((evaluation.root_mean_squared_error.powi(2) - evaluation.mean_squared_error).abs() < 1e-12);
    }

    #[test]
    fn predictions_are_rounded_to_one_decimal() {
        let (features, targets) = linear_set();
        let mut forecaster = MoodForecaster::new(&fast_config());
        forecaster
            .train(context_for(&features), &features, &targets)
            .unwrap();
        let forecast = forecaster.predict(&features[10]).unwrap();
        assert!(((forecast * 10.0).round() - forecast * 10.0).abs() < 1e-9);
    }

    #[test]
    fn trajectory_bands() {
        assert_eq!(Trajectory::between(5.0, 6.0), Trajectory::Improving);
        assert_eq!(Trajectory::between(5.0, 5.3), Trajectory::Stable);
        assert_eq!(Trajectory::between(5.0, 4.0), Trajectory::Declining);
    }

    #[test]
    fn single_stage_predicts_leaf_step() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y = vec![1.0, 1.0, 1.0, 3.0, 3.0, 3.0];
        let model = GradientBoosting::fit(
            &x,
            &y,
            &BoostingParams {
                n_estimators: 1,
                learning_rate: 0.5,
                max_depth: 1,
                min_samples_split: 2,
                min_samples_leaf: 1,
            },
            0,
        );
        // init 2.0, residual leaves at -1 / +1, shrunk by half
        assert!((model.predict(&[0.0]) - 1.5).abs() < 1e-12);
        assert!((model.predict(&[5.0]) - 2.5).abs() < 1e-12);
    }
}
