use crate::models::{Observation, PatientSummary, Recommendation, RecommendationKind, RiskLevel};

/// Builds the action list for one patient's latest day, most urgent first.
///
/// Every rule is checked independently. Equal priorities keep the order the
/// rules are listed in below.
pub fn recommend(current: &Observation, risk_level: RiskLevel, forecast_mood: f64) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let mut push = |kind, message: &str, priority| {
        out.push(Recommendation {
            kind,
            message: message.to_string(),
            priority,
        })
    };

    match risk_level {
        RiskLevel::High => {
            push(
                RecommendationKind::Urgent,
                "Contact your clinician as soon as possible",
                1,
            );
            push(
                RecommendationKind::Therapy,
                "Consider increasing the frequency of therapy sessions",
                1,
            );
        }
        RiskLevel::Medium => push(
            RecommendationKind::Monitoring,
            "Keep a daily log of your mood",
            2,
        ),
        RiskLevel::Low => {}
    }

    if current.mood_score < 5.0 {
        push(
            RecommendationKind::Activity,
            "Practice mindfulness and deep breathing exercises",
            2,
        );
    }
    if current.anxiety_level > 7.0 {
        push(
            RecommendationKind::Anxiety,
            "Try progressive muscle relaxation",
            2,
        );
    }
    if forecast_mood < current.mood_score - 1.0 {
        push(
            RecommendationKind::Prevention,
            "A drop in mood is forecast for the coming week; put preventive strategies in place",
            2,
        );
    }

    if current.sleep_hours < 6.0 {
        push(
            RecommendationKind::Sleep,
            "Improve your sleep hygiene and aim for 7-8 hours a night",
            3,
        );
    } else if current.sleep_hours > 9.0 {
        push(
            RecommendationKind::Sleep,
            "Have your sleep quality assessed by a professional",
            3,
        );
    }
    if current.exercise_minutes < 30 {
        push(
            RecommendationKind::Exercise,
            "Build up to 30 minutes of physical activity a day",
            3,
        );
    }
    if current.social_interaction == 0 {
        push(
            RecommendationKind::Social,
            "Look for opportunities for positive social contact",
            3,
        );
    }

    // sort_by_key is stable
    out.sort_by_key(|r| r.priority);
    out
}

/// Builds an action list from a patient's history averages rather than a
/// single day.
pub fn recommend_for_summary(summary: &PatientSummary) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let mut push = |kind, message: &str, priority| {
        out.push(Recommendation {
            kind,
            message: message.to_string(),
            priority,
        })
    };

    if summary.mood_mean < 5.0 {
        push(
            RecommendationKind::Activity,
            "Practice mindfulness and daily meditation",
            2,
        );
        push(
            RecommendationKind::Therapy,
            "Schedule an additional session with your therapist",
            2,
        );
    }

    if summary.sleep_mean < 7.0 {
        push(
            RecommendationKind::Sleep,
            "Improve your sleep hygiene and aim for 7-8 hours a night",
            3,
        );
    } else if summary.sleep_mean > 9.0 {
        push(
            RecommendationKind::Sleep,
            "Have your sleep quality assessed by a professional",
            3,
        );
    }
    if summary.exercise_mean < 30.0 {
        push(
            RecommendationKind::Exercise,
            "Build up to 30 minutes of physical activity a day",
            3,
        );
    }

    if summary.anxiety_mean > 7.0 {
        push(
            RecommendationKind::Anxiety,
            "Practice deep breathing techniques",
            2,
        );
        push(
            RecommendationKind::Therapy,
            "Consider cognitive behavioural therapy for anxiety",
            2,
        );
    }

    out.sort_by_key(|r| r.priority);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::observation;

    fn kinds(recs: &[Recommendation]) -> Vec<RecommendationKind> {
        recs.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn struggling_patient_gets_full_plan() {
        let mut obs = observation("p-1", 0, 3.0);
        obs.anxiety_level = 8.0;
        obs.sleep_hours = 5.0;
        obs.exercise_minutes = 10;
        obs.social_interaction = 0;

        use RecommendationKind::*;
        // a forecast exactly one point down is not yet a drop
        let recs = recommend(&obs, RiskLevel::High, 2.0);
        assert_eq!(
            kinds(&recs),
            vec![Urgent, Therapy, Activity, Anxiety, Sleep, Exercise, Social]
        );

        let recs = recommend(&obs, RiskLevel::High, 1.9);
        assert_eq!(
            kinds(&recs),
            vec![Urgent, Therapy, Activity, Anxiety, Prevention, Sleep, Exercise, Social]
        );
        assert_eq!(recs[0].priority, 1);
        assert_eq!(recs[1].priority, 1);
        assert!(recs[2..].iter().all(|r| r.priority > 1));
        assert!(recs.windows(2).all(|w| w[0].priority <= w[1].priority));
    }

    #[test]
    fn healthy_low_risk_day_needs_nothing() {
        let obs = observation("p-1", 0, 7.0);
        assert!(recommend(&obs, RiskLevel::Low, 7.0).is_empty());
    }

    #[test]
    fn medium_risk_adds_monitoring() {
        let obs = observation("p-1", 0, 7.0);
        let recs = recommend(&obs, RiskLevel::Medium, 7.0);
        assert_eq!(kinds(&recs), vec![RecommendationKind::Monitoring]);
        assert_eq!(recs[0].priority, 2);
    }

    #[test]
    fn oversleeping_gets_its_own_message() {
        let mut obs = observation("p-1", 0, 7.0);
        obs.sleep_hours = 10.0;
        let recs = recommend(&obs, RiskLevel::Low, 7.0);
        assert_eq!(kinds(&recs), vec![RecommendationKind::Sleep]);
        assert!(recs[0].message.contains("quality"));
    }

    #[test]
    fn prevention_fires_only_on_forecast_drop_beyond_one_point() {
        let obs = observation("p-1", 0, 7.0);
        assert!(recommend(&obs, RiskLevel::Low, 6.0).is_empty());
        let recs = recommend(&obs, RiskLevel::Low, 5.9);
        assert_eq!(kinds(&recs), vec![RecommendationKind::Prevention]);
    }

    fn summary(mood: f64, anxiety: f64, sleep: f64, exercise: f64) -> PatientSummary {
        PatientSummary {
            patient_id: "p-1".to_string(),
            days: 30,
            mood_mean: mood,
            mood_std: 1.0,
            mood_min: mood - 1.0,
            anxiety_mean: anxiety,
            anxiety_max: anxiety + 1.0,
            sleep_mean: sleep,
            exercise_mean: exercise,
            social_rate: 0.5,
        }
    }

    #[test]
    fn balanced_history_needs_nothing() {
        assert!(recommend_for_summary(&summary(6.5, 4.0, 7.5, 35.0)).is_empty());
        // thresholds are strict
        assert!(recommend_for_summary(&summary(5.0, 7.0, 7.0, 30.0)).is_empty());
        assert!(recommend_for_summary(&summary(5.0, 7.0, 9.0, 30.0)).is_empty());
    }

    #[test]
    fn low_mean_mood_adds_mindfulness_and_a_session() {
        let recs = recommend_for_summary(&summary(4.9, 4.0, 7.5, 35.0));
        assert_eq!(kinds(&recs), vec![RecommendationKind::Activity, RecommendationKind::Therapy]);
        assert!(recs[1].message.contains("additional session"));
    }

    #[test]
    fn sleep_mean_outside_seven_to_nine_hours() {
        let short = recommend_for_summary(&summary(6.5, 4.0, 6.9, 35.0));
        assert_eq!(kinds(&short), vec![RecommendationKind::Sleep]);
        assert!(short[0].message.contains("7-8 hours"));

        let long = recommend_for_summary(&summary(6.5, 4.0, 9.1, 35.0));
        assert_eq!(kinds(&long), vec![RecommendationKind::Sleep]);
        assert!(long[0].message.contains("quality"));
    }

    #[test]
    fn low_mean_exercise() {
        let recs = recommend_for_summary(&summary(6.5, 4.0, 7.5, 29.5));
        assert_eq!(kinds(&recs), vec![RecommendationKind::Exercise]);
    }

    #[test]
    fn high_mean_anxiety_adds_breathing_and_cbt() {
        let recs = recommend_for_summary(&summary(6.5, 7.1, 7.5, 35.0));
        assert_eq!(kinds(&recs), vec![RecommendationKind::Anxiety, RecommendationKind::Therapy]);
        assert!(recs[1].message.contains("cognitive behavioural"));
    }

    #[test]
    fn summary_plan_puts_priority_two_first() {
        use RecommendationKind::*;
        let recs = recommend_for_summary(&summary(4.0, 8.0, 5.5, 10.0));
        assert_eq!(
            kinds(&recs),
            vec![Activity, Therapy, Anxiety, Therapy, Sleep, Exercise]
        );
    }

    #[test]
    fn serializes_kind_as_type_tag() {
        let obs = observation("p-1", 0, 7.0);
        let recs = recommend(&obs, RiskLevel::Medium, 7.0);
        let json = serde_json::to_value(&recs[0]).unwrap();
        assert_eq!(json["type"], "monitoring");
        assert_eq!(json["priority"], 2);
    }
}
