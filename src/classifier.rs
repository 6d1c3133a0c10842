//! Random-forest classifier reproducing the rule-based risk label.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::{mean, std_dev};
use crate::config::{EngineConfig, ForestParams};
use crate::error::{EngineError, Result};
use crate::features::{CategoryEncoder, FeatureContext, FeatureScaler, FeatureVector, FEATURE_NAMES};
use crate::metrics::{self, ClassMetrics};
use crate::models::RiskLevel;
use crate::sampling;
use crate::tree::{DecisionTree, Target};

const MODEL_NAME: &str = "risk classifier";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_classes: usize,
}

impl RandomForest {
    /// Fits `n_estimators` trees on bootstrap draws of `rows`.
    ///
    /// Tree `t` draws from its own generator seeded with `seed + t`, so the
    /// result does not depend on thread scheduling.
    pub fn fit(
        x: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        rows: &[usize],
        params: &ForestParams,
        seed: u64,
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let max_features = ((n_features as f64).sqrt() as usize).max(1);
        let tree_params = params.tree();

        let trees: Vec<DecisionTree> = (0..params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let bootstrap: Vec<usize> = (0..rows.len())
                    .map(|_| rows[rng.gen_range(0..rows.len())])
                    .collect();
                DecisionTree::fit(
                    x,
                    Target::Classes { labels, n_classes },
                    &bootstrap,
                    &tree_params,
                    max_features,
                    &mut rng,
                )
            })
            .collect();

        debug!(
            trees = trees.len(),
            nodes = trees.iter().map(DecisionTree::n_nodes).sum::<usize>(),
            max_depth = trees.iter().map(DecisionTree::depth).max().unwrap_or(0),
            "forest fitted"
        );
        RandomForest { trees, n_classes }
    }

    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (p, v) in proba.iter_mut().zip(tree.leaf_value(row)) {
                *p += v;
            }
        }
        let n = self.trees.len().max(1) as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    pub fn predict(&self, row: &[f64]) -> usize {
        argmax(&self.predict_proba(row))
    }

    /// Mean of the per-tree importances, renormalised to sum to 1.
    pub fn feature_importances(&self) -> Vec<f64> {
        let n_features = self
            .trees
            .first()
            .map_or(0, |t| t.feature_importances().len());
        let mut total = vec![0.0; n_features];
        for tree in &self.trees {
            for (acc, v) in total.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
        }
        let sum: f64 = total.iter().sum();
        if sum > 0.0 {
            total.iter_mut().for_each(|v| *v /= sum);
        }
        total
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = idx;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// The persisted part of a trained classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    /// Labels seen in training, in ascending order; index = forest class.
    pub classes: Vec<RiskLevel>,
    pub forest: RandomForest,
}

impl TrainedClassifier {
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let mut ranked: Vec<FeatureImportance> = FEATURE_NAMES
            .iter()
            .zip(self.forest.feature_importances())
            .map(|(name, importance)| FeatureImportance {
                feature: name.to_string(),
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        ranked
    }
}

/// Unscaled rows of one side of a split.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<RiskLevel>,
}

impl Partition {
    fn select(features: &[FeatureVector], labels: &[RiskLevel], rows: &[usize]) -> Self {
        Partition {
            features: rows.iter().map(|&r| features[r]).collect(),
            labels: rows.iter().map(|&r| labels[r]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub fold_accuracy: Vec<f64>,
    pub mean: f64,
    /// Two population standard deviations of the fold accuracies.
    pub spread: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierEvaluation {
    pub accuracy: f64,
    pub per_class: Vec<ClassMetrics<RiskLevel>>,
    /// Absent for a model restored from storage without its training rows.
    pub cross_validation: Option<CrossValidation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPrediction {
    pub risk_level: RiskLevel,
    pub probabilities: BTreeMap<RiskLevel, f64>,
}

impl RiskPrediction {
    pub fn confidence(&self) -> f64 {
        self.probabilities
            .get(&self.risk_level)
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct RiskClassifier {
    params: ForestParams,
    test_fraction: f64,
    cv_folds: usize,
    seed: u64,
    fitted: Option<(TrainedClassifier, Arc<FeatureContext>)>,
    train_partition: Option<Partition>,
    held_out: Option<Partition>,
}

impl RiskClassifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            params: config.forest,
            test_fraction: config.test_fraction,
            cv_folds: config.cv_folds,
            seed: config.seed,
            fitted: None,
            train_partition: None,
            held_out: None,
        }
    }

    /// Restores a classifier from persisted parts.
    pub fn from_parts(config: &EngineConfig, model: TrainedClassifier, context: Arc<FeatureContext>) -> Self {
        Self {
            fitted: Some((model, context)),
            ..Self::new(config)
        }
    }

    /// Splits stratified by label, fits the shared scaler on the training
    /// side only, and fits the forest on the scaled training rows.
    pub fn train(
        &mut self,
        encoder: CategoryEncoder,
        features: &[FeatureVector],
        labels: &[RiskLevel],
    ) -> Result<&TrainedClassifier> {
        let _span = tracing::info_span!("train_risk_classifier", rows = labels.len()).entered();
        if features.len() != labels.len() {
            return Err(EngineError::InsufficientData(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }

        let split = sampling::stratified_split(labels, self.test_fraction, self.seed)?;
        let train = Partition::select(features, labels, &split.train);
        let held_out = Partition::select(features, labels, &split.test);

        let scaler = FeatureScaler::fit(&train.features)?;
        let context = Arc::new(FeatureContext::new(encoder, scaler));

        let classes: Vec<RiskLevel> = {
            let mut seen = train.labels.clone();
            seen.sort_unstable();
            seen.dedup();
            seen
        };
        let x = context.scale_all(&train.features);
        let y = class_indices(&classes, &train.labels);
        let rows: Vec<usize> = (0..x.len()).collect();
        let forest = RandomForest::fit(&x, &y, classes.len(), &rows, &self.params, self.seed);

        info!(
            train = train.len(),
            held_out = held_out.len(),
            trees = self.params.n_estimators,
            classes = ?classes,
            "risk classifier trained"
        );

        self.train_partition = Some(train);
        self.held_out = Some(held_out);
        let (model, _) = self.fitted.insert((TrainedClassifier { classes, forest }, context));
        Ok(model)
    }

    pub fn trained(&self) -> Result<&TrainedClassifier> {
        self.fitted
            .as_ref()
            .map(|(model, _)| model)
            .ok_or(EngineError::NotTrained(MODEL_NAME))
    }

    /// The encoder/scaler fitted by [`RiskClassifier::train`].
    pub fn context(&self) -> Result<Arc<FeatureContext>> {
        self.fitted
            .as_ref()
            .map(|(_, ctx)| Arc::clone(ctx))
            .ok_or(EngineError::NotTrained(MODEL_NAME))
    }

    pub fn held_out(&self) -> Option<&Partition> {
        self.held_out.as_ref()
    }

    pub fn feature_importance(&self) -> Result<Vec<FeatureImportance>> {
        Ok(self.trained()?.feature_importance())
    }

    pub fn evaluate(&self, held_out: &Partition) -> Result<ClassifierEvaluation> {
        let (model, context) = self.fitted.as_ref().ok_or(EngineError::NotTrained(MODEL_NAME))?;

        let predicted: Vec<RiskLevel> = held_out
            .features
            .iter()
            .map(|row| model.classes[model.forest.predict(&context.scale(row))])
            .collect();
        let accuracy = metrics::accuracy(&held_out.labels, &predicted);
        let per_class = metrics::per_class(&model.classes, &held_out.labels, &predicted);

        let cross_validation = match &self.train_partition {
            Some(train) => Some(self.cross_validate(model, context, train)?),
            None => None,
        };

        info!(
            accuracy,
            cv_mean = cross_validation.as_ref().map(|cv| cv.mean),
            cv_spread = cross_validation.as_ref().map(|cv| cv.spread),
            "risk classifier evaluated"
        );
        Ok(ClassifierEvaluation {
            accuracy,
            per_class,
            cross_validation,
        })
    }

    /// k-fold accuracy over the training partition only.
    fn cross_validate(
        &self,
        model: &TrainedClassifier,
        context: &FeatureContext,
        train: &Partition,
    ) -> Result<CrossValidation> {
        let folds = sampling::stratified_folds(&train.labels, self.cv_folds)?;
        let x = context.scale_all(&train.features);
        let y = class_indices(&model.classes, &train.labels);

        let fold_accuracy: Vec<f64> = folds
            .par_iter()
            .enumerate()
            .map(|(k, fold)| {
                let forest = RandomForest::fit(&x, &y, model.classes.len(), &fold.train, &self.params, self.seed);
                let hits = fold
                    .test
                    .iter()
                    .filter(|&&row| forest.predict(&x[row]) == y[row])
                    .count();
                let accuracy = hits as f64 / fold.test.len().max(1) as f64;
                debug!(fold = k, accuracy, "cross-validation fold");
                accuracy
            })
            .collect();

        Ok(CrossValidation {
            mean: mean(&fold_accuracy),
            spread: 2.0 * std_dev(&fold_accuracy),
            fold_accuracy,
        })
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<RiskPrediction> {
        let (model, context) = self.fitted.as_ref().ok_or(EngineError::NotTrained(MODEL_NAME))?;
        let proba = model.forest.predict_proba(&context.scale(features));
        let risk_level = model.classes[argmax(&proba)];
        let probabilities = model.classes.iter().copied().zip(proba).collect();
        Ok(RiskPrediction {
            risk_level,
            probabilities,
        })
    }
}

fn class_indices(classes: &[RiskLevel], labels: &[RiskLevel]) -> Vec<usize> {
    labels
        .iter()
        .map(|label| classes.binary_search(label).unwrap_or(0))
        .collect()
}
