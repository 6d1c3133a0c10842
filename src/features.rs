//! Feature vectors shared by the risk classifier and the mood forecaster.
//!
//! The category encoder and the scaler are fitted once per training run and
//! are read-only afterwards; both models hold the same [`FeatureContext`]
//! so a vector can never be scaled with anything but the fitted scaler.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::TrendObservation;

pub const NUM_FEATURES: usize = 13;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "age",
    "mood_score",
    "anxiety_level",
    "sleep_hours",
    "exercise_minutes",
    "social_interaction",
    "on_medication",
    "therapy_sessions_week",
    "mood_trend",
    "anxiety_trend",
    "weekday",
    "day_of_year",
    "gender_encoded",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; NUM_FEATURES]);

impl FeatureVector {
    pub fn build(obs: &TrendObservation, encoder: &CategoryEncoder) -> Result<Self> {
        let o = &obs.observation;
        let at = Some(o.date);
        let patient = o.patient_id.as_str();

        let age = o
            .age
            .ok_or_else(|| EngineError::missing(patient, at, "age"))?;
        let gender = o
            .gender
            .as_deref()
            .ok_or_else(|| EngineError::missing(patient, at, "gender"))?;
        let gender_encoded = encoder.encode(gender).ok_or_else(|| {
            EngineError::invalid(patient, at, "gender", format!("has unseen category {gender:?}"))
        })?;

        o.validate()?;
        for (field, value) in [
            ("mood_trend", obs.mood_trend),
            ("anxiety_trend", obs.anxiety_trend),
        ] {
            if !value.is_finite() {
                return Err(EngineError::invalid(patient, at, field, "is not a finite number"));
            }
        }
        if !(3.0..=12.0).contains(&o.sleep_hours) {
            debug!(patient_id = patient, date = %o.date, sleep_hours = o.sleep_hours, "sleep outside plausible range");
        }

        Ok(FeatureVector([
            age as f64,
            o.mood_score,
            o.anxiety_level,
            o.sleep_hours,
            o.exercise_minutes as f64,
            o.social_interaction as f64,
            o.on_medication as f64,
            o.therapy_sessions_week as f64,
            obs.mood_trend,
            obs.anxiety_trend,
            o.weekday as f64,
            o.day_of_year as f64,
            gender_encoded as f64,
        ]))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

/// Maps each category to its rank in sorted order, frozen at fit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    classes: Vec<String>,
}

impl CategoryEncoder {
    pub fn fit<'a>(categories: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let classes: BTreeSet<String> = categories.into_iter().map(str::to_string).collect();
        if classes.is_empty() {
            return Err(EngineError::InsufficientData(
                "no categories to fit the encoder on".to_string(),
            ));
        }
        Ok(Self {
            classes: classes.into_iter().collect(),
        })
    }

    pub fn encode(&self, category: &str) -> Option<u32> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(category))
            .ok()
            .map(|idx| idx as u32)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }
}

/// Per-feature standardisation to zero mean and unit variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(rows: &[FeatureVector]) -> Result<Self> {
        if rows.is_empty() {
            return Err(EngineError::InsufficientData(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }
        let n = rows.len() as f64;
        let mut mean = vec![0.0; NUM_FEATURES];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.values()) {
                *m += v / n;
            }
        }
        let mut scale = vec![0.0; NUM_FEATURES];
        for row in rows {
            for ((s, v), m) in scale.iter_mut().zip(row.values()).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scale.iter_mut() {
            // constant columns pass through centred but unscaled
            *s = if *s > 0.0 { s.sqrt() } else { 1.0 };
        }
        Ok(Self { mean, scale })
    }

    pub fn transform(&self, row: &FeatureVector) -> Vec<f64> {
        row.values()
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// The fitted, immutable transforms of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContext {
    pub encoder: CategoryEncoder,
    pub scaler: FeatureScaler,
}

impl FeatureContext {
    pub fn new(encoder: CategoryEncoder, scaler: FeatureScaler) -> Self {
        Self { encoder, scaler }
    }

    pub fn vector(&self, obs: &TrendObservation) -> Result<FeatureVector> {
        FeatureVector::build(obs, &self.encoder)
    }

    pub fn scale(&self, row: &FeatureVector) -> Vec<f64> {
        self.scaler.transform(row)
    }

    pub fn scale_all(&self, rows: &[FeatureVector]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.scaler.transform(row)).collect()
    }
}
