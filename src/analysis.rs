use std::collections::BTreeMap;

use serde::Serialize;

use crate::dataset::PatientSeries;
use crate::models::{Observation, PatientScore, PatientSummary, RiskLevel};

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, Serialize)]
pub struct MoodPatterns {
    pub observations: usize,
    pub mood_mean: f64,
    pub mood_std: f64,
    /// Mean mood per weekday, Monday first; `None` when no day was recorded.
    pub weekday_mood: [Option<f64>; 7],
    pub mood_anxiety_correlation: Option<f64>,
    pub mood_sleep_correlation: Option<f64>,
    pub mood_exercise_correlation: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskShare {
    pub risk_level: RiskLevel,
    pub count: usize,
    pub percent: f64,
}

pub fn summarize_patient(series: &PatientSeries) -> Option<PatientSummary> {
    let days = &series.observations;
    if days.is_empty() {
        return None;
    }
    let moods: Vec<f64> = days.iter().map(|o| o.mood_score).collect();
    let anxieties: Vec<f64> = days.iter().map(|o| o.anxiety_level).collect();

    Some(PatientSummary {
        patient_id: series.patient_id.clone(),
        days: days.len(),
        mood_mean: mean(&moods),
        mood_std: sample_std(&moods),
        mood_min: moods.iter().copied().fold(f64::INFINITY, f64::min),
        anxiety_mean: mean(&anxieties),
        anxiety_max: anxieties.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        sleep_mean: mean_by(days, |o| o.sleep_hours),
        exercise_mean: mean_by(days, |o| o.exercise_minutes as f64),
        social_rate: mean_by(days, |o| o.social_interaction as f64),
    })
}

pub fn mood_patterns(series: &[PatientSeries]) -> MoodPatterns {
    let all: Vec<&Observation> = series.iter().flat_map(|s| s.observations.iter()).collect();
    let moods: Vec<f64> = all.iter().map(|o| o.mood_score).collect();

    let mut by_weekday: [Vec<f64>; 7] = Default::default();
    for obs in &all {
        if let Some(bucket) = by_weekday.get_mut(obs.weekday as usize) {
            bucket.push(obs.mood_score);
        }
    }
    let weekday_mood = by_weekday.map(|moods| (!moods.is_empty()).then(|| mean(&moods)));

    let column = |f: fn(&Observation) -> f64| -> Vec<f64> { all.iter().map(|o| f(o)).collect() };

    MoodPatterns {
        observations: all.len(),
        mood_mean: mean(&moods),
        mood_std: sample_std(&moods),
        weekday_mood,
        mood_anxiety_correlation: pearson(&moods, &column(|o| o.anxiety_level)),
        mood_sleep_correlation: pearson(&moods, &column(|o| o.sleep_hours)),
        mood_exercise_correlation: pearson(&moods, &column(|o| o.exercise_minutes as f64)),
    }
}

pub fn risk_distribution(scores: &[PatientScore]) -> Vec<RiskShare> {
    let mut counts: BTreeMap<RiskLevel, usize> = BTreeMap::new();
    for score in scores {
        *counts.entry(score.risk_level).or_insert(0) += 1;
    }
    let total = scores.len().max(1) as f64;

    counts
        .into_iter()
        .rev()
        .map(|(risk_level, count)| RiskShare {
            risk_level,
            count,
            percent: count as f64 * 100.0 / total,
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn mean_by(days: &[Observation], f: impl Fn(&Observation) -> f64) -> f64 {
    if days.is_empty() {
        return 0.0;
    }
    days.iter().map(f).sum::<f64>() / days.len() as f64
}

/// Standard deviation with Bessel's correction; zero below two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let (mx, my) = (mean(xs), mean(ys));
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}
