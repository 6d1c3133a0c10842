use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::dataset;
use crate::models::{Observation, ObservationRow};
use crate::pipeline::{PatientPrediction, MODEL_VERSION};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Upserts every CSV row; a re-imported (patient, date) replaces the stored day.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let observations = dataset::read_csv(csv_path)
        .with_context(|| format!("failed to read observations from {}", csv_path.display()))?;
    let mut written = 0usize;

    for obs in &observations {
        let age = obs.age.map(i32::try_from).transpose().context("age out of range")?;
        let exercise = i32::try_from(obs.exercise_minutes).context("exercise_minutes out of range")?;
        let therapy = i32::try_from(obs.therapy_sessions_week).context("therapy_sessions_week out of range")?;

        let result = sqlx::query(
            r#"
            INSERT INTO wellbeing.observations
            (patient_id, date, age, gender, mood_score, anxiety_level, sleep_hours,
             exercise_minutes, social_interaction, on_medication, therapy_sessions_week)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (patient_id, date) DO UPDATE
            SET age = EXCLUDED.age,
                gender = EXCLUDED.gender,
                mood_score = EXCLUDED.mood_score,
                anxiety_level = EXCLUDED.anxiety_level,
                sleep_hours = EXCLUDED.sleep_hours,
                exercise_minutes = EXCLUDED.exercise_minutes,
                social_interaction = EXCLUDED.social_interaction,
                on_medication = EXCLUDED.on_medication,
                therapy_sessions_week = EXCLUDED.therapy_sessions_week,
                recorded_at = NOW()
            "#,
        )
        .bind(&obs.patient_id)
        .bind(obs.date)
        .bind(age)
        .bind(obs.gender.as_deref())
        .bind(obs.mood_score)
        .bind(obs.anxiety_level)
        .bind(obs.sleep_hours)
        .bind(exercise)
        .bind(i16::from(obs.social_interaction))
        .bind(i16::from(obs.on_medication))
        .bind(therapy)
        .execute(pool)
        .await?;

        written += result.rows_affected() as usize;
    }

    Ok(written)
}

pub async fn fetch_observations(
    pool: &PgPool,
    since_date: Option<NaiveDate>,
    patient_id: Option<&str>,
) -> anyhow::Result<Vec<Observation>> {
    let mut query = String::from(
        "SELECT patient_id, date, age, gender, mood_score, anxiety_level, sleep_hours, \
         exercise_minutes, social_interaction, on_medication, therapy_sessions_week \
         FROM wellbeing.observations \
         WHERE ($1::date IS NULL OR date >= $1)",
    );
    if patient_id.is_some() {
        query.push_str(" AND patient_id = $2");
    }
    query.push_str(" ORDER BY patient_id, date");

    let mut rows = sqlx::query(&query).bind(since_date);
    if let Some(value) = patient_id {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut observations = Vec::with_capacity(records.len());

    for row in records {
        let row = observation_row(&row)?;
        observations.push(Observation::try_from(row)?);
    }

    Ok(observations)
}

fn observation_row(row: &PgRow) -> anyhow::Result<ObservationRow> {
    Ok(ObservationRow {
        patient_id: row.get("patient_id"),
        date: row.get("date"),
        age: unsigned(row.get("age"), "age")?,
        gender: row.get("gender"),
        mood_score: row.get("mood_score"),
        anxiety_level: row.get("anxiety_level"),
        sleep_hours: row.get("sleep_hours"),
        exercise_minutes: unsigned(row.get("exercise_minutes"), "exercise_minutes")?,
        social_interaction: unsigned(row.get::<Option<i16>, _>("social_interaction").map(i32::from), "social_interaction")?,
        on_medication: unsigned(row.get::<Option<i16>, _>("on_medication").map(i32::from), "on_medication")?,
        therapy_sessions_week: unsigned(row.get("therapy_sessions_week"), "therapy_sessions_week")?,
        weekday: None,
        day_of_year: None,
    })
}

fn unsigned<T: TryFrom<i32>>(value: Option<i32>, column: &str) -> anyhow::Result<Option<T>> {
    value
        .map(|v| T::try_from(v).map_err(|_| anyhow::anyhow!("column {column} holds out-of-range value {v}")))
        .transpose()
}

/// Logs one prediction; confidence is the probability of the predicted level.
pub async fn save_prediction(pool: &PgPool, prediction: &PatientPrediction) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO wellbeing.ml_predictions
        (id, patient_id, prediction_type, prediction_result, confidence, model_version)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(&prediction.patient_id)
    .bind("risk_and_mood")
    .bind(Json(prediction))
    .bind(prediction.confidence)
    .bind(MODEL_VERSION)
    .execute(pool)
    .await?;

    Ok(id)
}
