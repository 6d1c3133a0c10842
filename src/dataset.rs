use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Observation, ObservationRow};

/// All observations of one patient, sorted by date with one record per day.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientSeries {
    pub patient_id: String,
    pub observations: Vec<Observation>,
}

impl PatientSeries {
    pub fn latest(&self) -> Option<&Observation> {
        self.observations.last()
    }
}

pub fn read_csv(path: &Path) -> Result<Vec<Observation>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut observations = Vec::new();

    for result in reader.deserialize::<ObservationRow>() {
        let row = result?;
        observations.push(Observation::try_from(row)?);
    }

    debug!(count = observations.len(), path = %path.display(), "read observations");
    Ok(observations)
}

pub fn write_csv(path: &Path, observations: &[Observation]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for obs in observations {
        writer.serialize(ObservationRow::from(obs))?;
    }
    writer.flush()?;
    Ok(())
}

/// Splits a flat collection into independent per-patient series.
///
/// A second record for the same (patient, date) replaces the first.
pub fn group_by_patient(observations: Vec<Observation>) -> Vec<PatientSeries> {
    let mut patients: BTreeMap<String, BTreeMap<NaiveDate, Observation>> = BTreeMap::new();

    for obs in observations {
        let days = patients.entry(obs.patient_id.clone()).or_default();
        if let Some(previous) = days.insert(obs.date, obs) {
            warn!(
                patient_id = %previous.patient_id,
                date = %previous.date,
                "duplicate observation replaced by later record"
            );
        }
    }

    patients
        .into_iter()
        .map(|(patient_id, days)| PatientSeries {
            patient_id,
            observations: days.into_values().collect(),
        })
        .collect()
}

pub fn latest_date(series: &[PatientSeries]) -> Option<NaiveDate> {
    series
        .iter()
        .filter_map(|s| s.latest().map(|obs| obs.date))
        .max()
}

pub fn cutoff_date(latest: NaiveDate, since_days: i64) -> NaiveDate {
    latest - Duration::days(since_days.max(1))
}

/// Keeps only observations on or after `cutoff`, dropping emptied patients.
pub fn since(series: Vec<PatientSeries>, cutoff: NaiveDate) -> Vec<PatientSeries> {
    series
        .into_iter()
        .filter_map(|mut s| {
            s.observations.retain(|obs| obs.date >= cutoff);
            (!s.observations.is_empty()).then_some(s)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testutil::observation;

    #[test]
    fn groups_and_sorts_each_patient() {
        let observations = vec![
            observation("b", 3, 5.0),
            observation("a", 2, 6.0),
            observation("a", 1, 7.0),
            observation("b", 1, 4.0),
        ];
        let series = group_by_patient(observations);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].patient_id, "a");
        let dates: Vec<_> = series[0].observations.iter().map(|o| o.date).collect();
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(series[1].observations.len(), 2);
    }

    #[test]
    fn duplicate_day_keeps_later_record() {
        let series = group_by_patient(vec![observation("a", 1, 3.0), observation("a", 1, 8.0)]);
        assert_eq!(series[0].observations.len(), 1);
        assert_eq!(series[0].observations[0].mood_score, 8.0);
    }

    #[test]
    fn since_drops_old_days_and_empty_patients() {
        let series = group_by_patient(vec![
            observation("a", 1, 5.0),
            observation("a", 20, 5.0),
            observation("b", 2, 5.0),
        ]);
        let latest = latest_date(&series).unwrap();
        let kept = since(series, cutoff_date(latest, 10));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].observations.len(), 1);
    }

    #[test]
    fn csv_round_trip_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.csv");
        let original = vec![observation("a", 1, 5.5), observation("b", 2, 3.0)];
        write_csv(&path, &original).unwrap();
        let read = read_csv(&path).unwrap();
        assert_eq!(read, original);
    }

    #[test]
    fn csv_with_blank_mood_reports_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "patient_id,date,age,gender,mood_score,anxiety_level,sleep_hours,exercise_minutes,social_interaction,on_medication,therapy_sessions_week\n\
             p1,2026-01-05,30,F,,5.0,7.0,20,1,0,1\n",
        )
        .unwrap();
        let err = read_csv(&path).unwrap_err();
        assert!(err.to_string().contains("mood_score"));
    }

    #[test]
    fn csv_with_out_of_range_mood_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "patient_id,date,age,gender,mood_score,anxiety_level,sleep_hours,exercise_minutes,social_interaction,on_medication,therapy_sessions_week\n\
             p1,2026-01-05,30,F,6.0,5.0,7.0,20,1,0,1\n\
             p1,2026-01-06,30,F,55,5.0,7.0,20,1,0,1\n",
        )
        .unwrap();
        match read_csv(&path) {
            Err(EngineError::Validation { field, date, .. }) => {
                assert_eq!(field, "mood_score");
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 1, 6));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
