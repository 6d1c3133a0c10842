use rayon::prelude::*;

use crate::dataset::PatientSeries;
use crate::models::{Observation, TrendObservation};

/// Annotates one patient's date-sorted series with trailing means.
///
/// The window ends at the current record and never looks ahead; it shrinks
/// to the available history near the start of the series.
pub fn annotate_series(series: &PatientSeries, window: usize) -> Vec<TrendObservation> {
    let window = window.max(1);
    let observations = &series.observations;

    observations
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            let start = (i + 1).saturating_sub(window);
            let trailing = &observations[start..=i];
            TrendObservation {
                observation: obs.clone(),
                mood_trend: mean_of(trailing, |o| o.mood_score),
                anxiety_trend: mean_of(trailing, |o| o.anxiety_level),
            }
        })
        .collect()
}

/// Runs [`annotate_series`] for every patient in parallel, preserving order.
pub fn annotate_all(series: &[PatientSeries], window: usize) -> Vec<Vec<TrendObservation>> {
    series
        .par_iter()
        .map(|patient| annotate_series(patient, window))
        .collect()
}

fn mean_of(observations: &[Observation], metric: impl Fn(&Observation) -> f64) -> f64 {
    if observations.is_empty() {
        return 0.0;
    }
    observations.iter().map(metric).sum::<f64>() / observations.len() as f64
}
