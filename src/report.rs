use std::fmt::Write;

use chrono::NaiveDate;

use crate::analysis::{self, MoodPatterns, WEEKDAY_NAMES};
use crate::dataset::{self, PatientSeries};
use crate::models::{RiskLevel, TrendObservation};
use crate::risk::{self, RiskInputs};
use crate::trends;

/// Daily records the rule labels high, most recent first.
pub fn recent_high_risk_days(
    series: &[PatientSeries],
    cutoff: NaiveDate,
    trend_window: usize,
) -> Vec<(TrendObservation, u32)> {
    let mut days: Vec<(TrendObservation, u32)> = trends::annotate_all(series, trend_window)
        .into_iter()
        .flatten()
        .filter(|t| t.observation.date >= cutoff)
        .filter_map(|t| {
            let inputs = RiskInputs::from_trend(&t);
            let score = risk::risk_score(&inputs);
            (risk::level_for(score, inputs.trend) == RiskLevel::High).then_some((t, score))
        })
        .collect();

    days.sort_by(|a, b| {
        b.0.observation
            .date
            .cmp(&a.0.observation.date)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.0.observation.patient_id.cmp(&b.0.observation.patient_id))
    });
    days
}

/// Trends are computed over full history so the window is warm at `cutoff`.
pub fn build_report(series: &[PatientSeries], since_days: i64, cutoff: NaiveDate, trend_window: usize) -> String {
    let recent = dataset::since(series.to_vec(), cutoff);
    let scores = risk::score_patients(&recent);
    let distribution = analysis::risk_distribution(&scores);
    let patterns = analysis::mood_patterns(&recent);
    let high_days = recent_high_risk_days(series, cutoff, trend_window);

    let mut output = String::new();

    let _ = writeln!(output, "# Patient Well-being Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} patients over the last {} days (observations since {})",
        recent.len(),
        since_days,
        cutoff
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if distribution.is_empty() {
        let _ = writeln!(output, "No observations recorded for this window.");
    } else {
        for share in distribution.iter() {
            let _ = writeln!(
                output,
                "- {}: {} patients ({:.1}%)",
                share.risk_level, share.count, share.percent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Patients");

    if scores.is_empty() {
        let _ = writeln!(output, "No patients with observations in this window.");
    } else {
        for score in scores.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) score {} across {} days, mood {:.1}, anxiety {:.1}",
                score.patient_id,
                score.risk_level,
                score.score,
                score.days,
                score.mood_mean,
                score.anxiety_mean
            );
            for rec in &score.recommendations {
                let _ = writeln!(output, "  - {}: {}", rec.kind.as_str(), rec.message);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Mood Patterns");
    write_patterns(&mut output, &patterns);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent High Risk Days");

    if high_days.is_empty() {
        let _ = writeln!(output, "No high risk days in this window.");
    } else {
        for (day, score) in high_days.iter().take(5) {
            let obs = &day.observation;
            let _ = writeln!(
                output,
                "- {} on {}: score {}, mood {:.1} (trend {:.1}), anxiety {:.1}, sleep {:.1}h",
                obs.patient_id, obs.date, score, obs.mood_score, day.mood_trend, obs.anxiety_level, obs.sleep_hours
            );
        }
    }

    output
}

fn write_patterns(output: &mut String, patterns: &MoodPatterns) {
    if patterns.observations == 0 {
        let _ = writeln!(output, "No observations recorded for this window.");
        return;
    }

    let _ = writeln!(
        output,
        "- Mood {:.2} ± {:.2} across {} observations",
        patterns.mood_mean, patterns.mood_std, patterns.observations
    );
    for (name, mood) in WEEKDAY_NAMES.iter().zip(patterns.weekday_mood) {
        if let Some(mood) = mood {
            let _ = writeln!(output, "- {name}: {mood:.2}");
        }
    }

    let correlations = [
        ("anxiety", patterns.mood_anxiety_correlation),
        ("sleep", patterns.mood_sleep_correlation),
        ("exercise", patterns.mood_exercise_correlation),
    ];
    for (label, value) in correlations {
        match value {
            Some(r) => {
                let _ = writeln!(output, "- Correlation with {label}: {r:.2}");
            }
            None => {
                let _ = writeln!(output, "- Correlation with {label}: n/a");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::group_by_patient;
    use crate::testutil::{day_zero, observation};
    use chrono::Duration;

    fn struggling(patient: &str, day: i64) -> crate::models::Observation {
        let mut obs = observation(patient, day, 3.0);
        obs.anxiety_level = 8.5;
        obs.sleep_hours = 5.0;
        obs.exercise_minutes = 5;
        obs.social_interaction = 0;
        obs
    }

    #[test]
    fn report_lists_sections_and_patients() {
        let mut observations: Vec<_> = (0..10).map(|d| observation("steady", d, 7.5)).collect();
        observations.extend((0..10).map(|d| struggling("fragile", d)));
        let series = group_by_patient(observations);

        let cutoff = day_zero() + Duration::days(2);
        let report = build_report(&series, 7, cutoff, 7);

        assert!(report.starts_with("# Patient Well-being Risk Report"));
        assert!(report.contains("## Risk Mix"));
        assert!(report.contains("- high: 1 patients (50.0%)"));
        assert!(report.contains("- low: 1 patients (50.0%)"));

        let ranking = report.split("## Highest Risk Patients").nth(1).unwrap();
        let fragile = ranking.find("fragile").unwrap();
        let steady = ranking.find("steady").unwrap();
        assert!(fragile < steady);

        assert!(report.contains("  - activity: Practice mindfulness and daily meditation"));
        assert!(report.contains("  - anxiety: Practice deep breathing techniques"));
        assert!(report.contains("- Monday:"));
        assert!(report.contains("fragile on 2026-01-14"));
        assert!(!report.contains("steady on"));
    }

    #[test]
    fn high_risk_days_respect_cutoff() {
        let series = group_by_patient((0..6).map(|d| struggling("p", d)).collect());
        let cutoff = day_zero() + Duration::days(4);
        let days = recent_high_risk_days(&series, cutoff, 7);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].0.observation.date, day_zero() + Duration::days(5));
    }

    #[test]
    fn empty_window() {
        let report = build_report(&[], 30, day_zero(), 7);
        assert!(report.contains("No observations recorded for this window."));
        assert!(report.contains("No patients with observations in this window."));
        assert!(report.contains("No high risk days in this window."));
    }
}
