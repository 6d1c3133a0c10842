//! Fixtures shared by the unit tests.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{BoostingParams, EngineConfig, ForestParams};
use crate::models::{Observation, TrendObservation};

/// A Monday.
pub fn day_zero() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

/// A calm, active, social day; tests override what they care about.
pub fn observation(patient_id: &str, day: i64, mood: f64) -> Observation {
    let date = day_zero() + Duration::days(day);
    Observation {
        patient_id: patient_id.to_string(),
        date,
        age: Some(35),
        gender: Some("F".to_string()),
        mood_score: mood,
        anxiety_level: 3.0,
        sleep_hours: 7.5,
        exercise_minutes: 30,
        social_interaction: 1,
        on_medication: 0,
        therapy_sessions_week: 1,
        weekday: Observation::weekday_of(date),
        day_of_year: Observation::day_of_year_of(date),
    }
}

pub fn with_trend(observation: Observation, mood_trend: f64, anxiety_trend: f64) -> TrendObservation {
    TrendObservation {
        observation,
        mood_trend,
        anxiety_trend,
    }
}

/// A deterministic cohort with patient-level tendencies and daily noise.
pub fn cohort(patients: usize, days: i64, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let genders = ["F", "M", "Other"];
    let mut observations = Vec::new();

    for p in 0..patients {
        let patient_id = format!("patient-{p:03}");
        let age = rng.gen_range(18..70);
        let gender = genders[p % genders.len()].to_string();
        let base_mood: f64 = rng.gen_range(3.0..8.5);
        let base_anxiety: f64 = rng.gen_range(2.0..8.0);
        let on_medication = u8::from(rng.gen_bool(0.3));

        for day in 0..days {
            let date = day_zero() + Duration::days(day);
            let mood = (base_mood + rng.gen_range(-1.5..1.5)).clamp(1.0, 10.0);
            let anxiety = (base_anxiety + (7.0 - mood) * 0.3 + rng.gen_range(-1.0..1.0)).clamp(1.0, 10.0);
            observations.push(Observation {
                patient_id: patient_id.clone(),
                date,
                age: Some(age),
                gender: Some(gender.clone()),
                mood_score: (mood * 10.0).round() / 10.0,
                anxiety_level: (anxiety * 10.0).round() / 10.0,
                sleep_hours: (rng.gen_range(4.5..10.0_f64) * 10.0).round() / 10.0,
                exercise_minutes: rng.gen_range(0..50),
                social_interaction: u8::from(rng.gen_bool(0.6)),
                on_medication,
                therapy_sessions_week: rng.gen_range(0..2),
                weekday: Observation::weekday_of(date),
                day_of_year: Observation::day_of_year_of(date),
            });
        }
    }
    observations
}

/// Small ensembles so the model tests stay quick.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        forest: ForestParams {
            n_estimators: 15,
            max_depth: 8,
            ..ForestParams::default()
        },
        boosting: BoostingParams {
            n_estimators: 30,
            max_depth: 3,
            ..BoostingParams::default()
        },
        ..EngineConfig::default()
    }
}
