use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// One raw input row as it arrives from a CSV file or the database.
///
/// Every column is optional so that a missing value surfaces as a
/// validation error naming the field instead of a generic parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationRow {
    pub patient_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub mood_score: Option<f64>,
    pub anxiety_level: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub exercise_minutes: Option<u32>,
    pub social_interaction: Option<u8>,
    pub on_medication: Option<u8>,
    pub therapy_sessions_week: Option<u32>,
    pub weekday: Option<u32>,
    pub day_of_year: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub patient_id: String,
    pub date: NaiveDate,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub mood_score: f64,
    pub anxiety_level: f64,
    pub sleep_hours: f64,
    pub exercise_minutes: u32,
    pub social_interaction: u8,
    pub on_medication: u8,
    pub therapy_sessions_week: u32,
    pub weekday: u32,
    pub day_of_year: u32,
}

impl Observation {
    /// Monday = 0 .. Sunday = 6.
    pub fn weekday_of(date: NaiveDate) -> u32 {
        date.weekday().num_days_from_monday()
    }

    pub fn day_of_year_of(date: NaiveDate) -> u32 {
        date.ordinal()
    }

    /// Range checks every ingest path applies; one bad day must not reach
    /// the trends or the aggregates.
    pub fn validate(&self) -> Result<()> {
        let patient = self.patient_id.as_str();
        let at = Some(self.date);

        check_range(patient, at, "mood_score", self.mood_score, 1.0, 10.0)?;
        check_range(patient, at, "anxiety_level", self.anxiety_level, 1.0, 10.0)?;
        check_flag(patient, at, "social_interaction", self.social_interaction)?;
        check_flag(patient, at, "on_medication", self.on_medication)?;
        if self.weekday > 6 {
            return Err(EngineError::invalid(patient, at, "weekday", "must be in 0..=6"));
        }
        if !(1..=366).contains(&self.day_of_year) {
            return Err(EngineError::invalid(patient, at, "day_of_year", "must be in 1..=366"));
        }
        if !self.sleep_hours.is_finite() {
            return Err(EngineError::invalid(patient, at, "sleep_hours", "is not a finite number"));
        }
        Ok(())
    }
}

fn check_range(patient: &str, at: Option<NaiveDate>, field: &'static str, value: f64, low: f64, high: f64) -> Result<()> {
    if !(low..=high).contains(&value) {
        return Err(EngineError::invalid(
            patient,
            at,
            field,
            format!("is {value}, expected {low}..={high}"),
        ));
    }
    Ok(())
}

fn check_flag(patient: &str, at: Option<NaiveDate>, field: &'static str, value: u8) -> Result<()> {
    if value > 1 {
        return Err(EngineError::invalid(patient, at, field, format!("is {value}, expected 0 or 1")));
    }
    Ok(())
}

impl TryFrom<ObservationRow> for Observation {
    type Error = EngineError;

    fn try_from(row: ObservationRow) -> Result<Self> {
        let patient_id = match row.patient_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => return Err(EngineError::missing("<unknown>", row.date, "patient_id")),
        };
        let date = row
            .date
            .ok_or_else(|| EngineError::missing(&patient_id, None, "date"))?;
        let require = |value: Option<f64>, field: &'static str| -> Result<f64> {
            let value = value.ok_or_else(|| EngineError::missing(&patient_id, Some(date), field))?;
            if !value.is_finite() {
                return Err(EngineError::invalid(
                    &patient_id,
                    Some(date),
                    field,
                    "is not a finite number",
                ));
            }
            Ok(value)
        };

        let mood_score = require(row.mood_score, "mood_score")?;
        let anxiety_level = require(row.anxiety_level, "anxiety_level")?;
        let sleep_hours = require(row.sleep_hours, "sleep_hours")?;
        let exercise_minutes = row
            .exercise_minutes
            .ok_or_else(|| EngineError::missing(&patient_id, Some(date), "exercise_minutes"))?;
        let social_interaction = row
            .social_interaction
            .ok_or_else(|| EngineError::missing(&patient_id, Some(date), "social_interaction"))?;
        let on_medication = row
            .on_medication
            .ok_or_else(|| EngineError::missing(&patient_id, Some(date), "on_medication"))?;
        let therapy_sessions_week = row.therapy_sessions_week.ok_or_else(|| {
            EngineError::missing(&patient_id, Some(date), "therapy_sessions_week")
        })?;

        let weekday = Observation::weekday_of(date);
        if let Some(given) = row.weekday {
            if given != weekday {
                return Err(EngineError::invalid(
                    &patient_id,
                    Some(date),
                    "weekday",
                    format!("is {given} but {date} falls on weekday {weekday}"),
                ));
            }
        }
        let day_of_year = Observation::day_of_year_of(date);
        if let Some(given) = row.day_of_year {
            if given != day_of_year {
                return Err(EngineError::invalid(
                    &patient_id,
                    Some(date),
                    "day_of_year",
                    format!("is {given} but {date} is day {day_of_year}"),
                ));
            }
        }

        let observation = Observation {
            gender: row
                .gender
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty()),
            patient_id,
            date,
            age: row.age,
            mood_score,
            anxiety_level,
            sleep_hours,
            exercise_minutes,
            social_interaction,
            on_medication,
            therapy_sessions_week,
            weekday,
            day_of_year,
        };
        observation.validate()?;
        Ok(observation)
    }
}

impl From<&Observation> for ObservationRow {
    fn from(obs: &Observation) -> Self {
        ObservationRow {
            patient_id: Some(obs.patient_id.clone()),
            date: Some(obs.date),
            age: obs.age,
            gender: obs.gender.clone(),
            mood_score: Some(obs.mood_score),
            anxiety_level: Some(obs.anxiety_level),
            sleep_hours: Some(obs.sleep_hours),
            exercise_minutes: Some(obs.exercise_minutes),
            social_interaction: Some(obs.social_interaction),
            on_medication: Some(obs.on_medication),
            therapy_sessions_week: Some(obs.therapy_sessions_week),
            weekday: Some(obs.weekday),
            day_of_year: Some(obs.day_of_year),
        }
    }
}

/// An observation annotated with trailing-window means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendObservation {
    pub observation: Observation,
    pub mood_trend: f64,
    pub anxiety_trend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledObservation {
    pub trend: TrendObservation,
    pub risk_level: RiskLevel,
    /// Mood recorded exactly one horizon later, when such a record exists.
    pub future_mood: Option<f64>,
}

impl LabeledObservation {
    pub fn observation(&self) -> &Observation {
        &self.trend.observation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Urgent,
    Therapy,
    Monitoring,
    Activity,
    Anxiety,
    Prevention,
    Sleep,
    Exercise,
    Social,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationKind::Urgent => "urgent",
            RecommendationKind::Therapy => "therapy",
            RecommendationKind::Monitoring => "monitoring",
            RecommendationKind::Activity => "activity",
            RecommendationKind::Anxiety => "anxiety",
            RecommendationKind::Prevention => "prevention",
            RecommendationKind::Sleep => "sleep",
            RecommendationKind::Exercise => "exercise",
            RecommendationKind::Social => "social",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub message: String,
    /// 1 is the most urgent.
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub patient_id: String,
    pub days: usize,
    pub mood_mean: f64,
    pub mood_std: f64,
    pub mood_min: f64,
    pub anxiety_mean: f64,
    pub anxiety_max: f64,
    pub sleep_mean: f64,
    pub exercise_mean: f64,
    pub social_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientScore {
    pub patient_id: String,
    pub score: u32,
    pub risk_level: RiskLevel,
    pub days: usize,
    pub mood_mean: f64,
    pub anxiety_mean: f64,
    pub recommendations: Vec<Recommendation>,
}
