use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;

use crate::analysis;
use crate::dataset::PatientSeries;
use crate::models::{LabeledObservation, PatientScore, PatientSummary, RiskLevel, TrendObservation};
use crate::recommend::recommend_for_summary;

/// Recent-average context for the scoring rule.
///
/// Daily records carry trends; per-patient aggregates do not, and use the
/// aggregate cutoffs instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendContext {
    WithTrend { mood_trend: f64, anxiety_trend: f64 },
    WithoutTrend,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskInputs {
    pub mood_score: f64,
    pub anxiety_level: f64,
    pub sleep_hours: f64,
    pub exercise_minutes: f64,
    /// A daily 0/1 flag, or the share of social days for an aggregate.
    pub social_interaction: f64,
    pub trend: TrendContext,
}

struct Cutoffs {
    high: u32,
    medium: u32,
    exercise_below: f64,
    social_below: f64,
}

const DAILY: Cutoffs = Cutoffs {
    high: 6,
    medium: 3,
    exercise_below: 20.0,
    // binary flag: only a day without interaction counts
    social_below: 0.5,
};

const AGGREGATE: Cutoffs = Cutoffs {
    high: 5,
    medium: 3,
    exercise_below: 15.0,
    social_below: 0.3,
};

impl RiskInputs {
    pub fn from_trend(obs: &TrendObservation) -> Self {
        let o = &obs.observation;
        RiskInputs {
            mood_score: o.mood_score,
            anxiety_level: o.anxiety_level,
            sleep_hours: o.sleep_hours,
            exercise_minutes: o.exercise_minutes as f64,
            social_interaction: o.social_interaction as f64,
            trend: TrendContext::WithTrend {
                mood_trend: obs.mood_trend,
                anxiety_trend: obs.anxiety_trend,
            },
        }
    }

    pub fn from_summary(summary: &PatientSummary) -> Self {
        RiskInputs {
            mood_score: summary.mood_mean,
            anxiety_level: summary.anxiety_mean,
            sleep_hours: summary.sleep_mean,
            exercise_minutes: summary.exercise_mean,
            social_interaction: summary.social_rate,
            trend: TrendContext::WithoutTrend,
        }
    }

    fn cutoffs(&self) -> &'static Cutoffs {
        match self.trend {
            TrendContext::WithTrend { .. } => &DAILY,
            TrendContext::WithoutTrend => &AGGREGATE,
        }
    }
}

pub fn risk_score(inputs: &RiskInputs) -> u32 {
    let cutoffs = inputs.cutoffs();
    let mut score = 0;

    score += match inputs.mood_score {
        m if m < 4.0 => 3,
        m if m < 6.0 => 1,
        _ => 0,
    };

    score += match inputs.anxiety_level {
        a if a > 7.0 => 2,
        a if a > 5.0 => 1,
        _ => 0,
    };

    if inputs.sleep_hours < 6.0 || inputs.sleep_hours > 9.0 {
        score += 1;
    }

    if inputs.exercise_minutes < cutoffs.exercise_below {
        score += 1;
    }

    if inputs.social_interaction < cutoffs.social_below {
        score += 1;
    }

    if let TrendContext::WithTrend {
        mood_trend,
        anxiety_trend,
    } = inputs.trend
    {
        if mood_trend < inputs.mood_score - 1.0 {
            score += 1;
        }
        if anxiety_trend > inputs.anxiety_level + 1.0 {
            score += 1;
        }
    }

    score
}

pub fn level_for(score: u32, trend: TrendContext) -> RiskLevel {
    let cutoffs = match trend {
        TrendContext::WithTrend { .. } => &DAILY,
        TrendContext::WithoutTrend => &AGGREGATE,
    };
    if score >= cutoffs.high {
        RiskLevel::High
    } else if score >= cutoffs.medium {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn risk_level(inputs: &RiskInputs) -> RiskLevel {
    level_for(risk_score(inputs), inputs.trend)
}

/// Labels one patient's trend series and attaches the mood recorded exactly
/// `horizon_days` later, when the patient has a record on that date.
pub fn label_series(trends: Vec<TrendObservation>, horizon_days: i64) -> Vec<LabeledObservation> {
    let mood_by_date: HashMap<NaiveDate, f64> = trends
        .iter()
        .map(|t| (t.observation.date, t.observation.mood_score))
        .collect();
    let horizon = Duration::days(horizon_days);

    trends
        .into_iter()
        .map(|trend| {
            let risk_level = risk_level(&RiskInputs::from_trend(&trend));
            let future_mood = mood_by_date.get(&(trend.observation.date + horizon)).copied();
            LabeledObservation {
                trend,
                risk_level,
                future_mood,
            }
        })
        .collect()
}

pub fn label_all(series: Vec<Vec<TrendObservation>>, horizon_days: i64) -> Vec<LabeledObservation> {
    series
        .into_par_iter()
        .map(|trends| label_series(trends, horizon_days))
        .flatten()
        .collect()
}

/// Scores every patient on their aggregate history, highest risk first.
pub fn score_patients(series: &[PatientSeries]) -> Vec<PatientScore> {
    let mut scores: Vec<PatientScore> = series
        .iter()
        .filter_map(analysis::summarize_patient)
        .map(|summary| {
            let inputs = RiskInputs::from_summary(&summary);
            let score = risk_score(&inputs);
            let recommendations = recommend_for_summary(&summary);
            PatientScore {
                patient_id: summary.patient_id,
                score,
                risk_level: level_for(score, inputs.trend),
                days: summary.days,
                mood_mean: summary.mood_mean,
                anxiety_mean: summary.anxiety_mean,
                recommendations,
            }
        })
        .collect();

    scores.sort_by(|a, b| {
        b.score.cmp(&a.score).then_with(|| {
            a.mood_mean
                .partial_cmp(&b.mood_mean)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    scores
}
