pub mod recommend;

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forensic::ForensicVerdictEntry;
use crate::model::{FlowWeightSettings, SetTrack, SeverityLevel};
use crate::scoring::{self, AxisScore, TransitionAdvice, TransitionArchetype};

/// Rescue suggestions kept per stress point.
pub const DEFAULT_RESCUE_LIMIT: usize = 3;

#[derive(Error, Debug)]
pub enum DiagnoseError {
    #[error("Rescue recommender failed for transition {from_index}->{to_index}: {message}")]
    Recommender {
        from_index: usize,
        to_index: usize,
        message: String,
    },
}

/// A candidate track proposed to heal a weak transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescueSuggestion {
    pub track_id: String,
    pub display_reasoning: String,
    /// Severity expected once the track is spliced in.
    pub predicted_severity_score: f64,
}

/// One diagnosed transition between consecutive tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStressPoint {
    pub from_index: usize,
    pub to_index: usize,
    pub from_label: String,
    pub to_label: String,
    pub severity_score: f64,
    pub severity_level: SeverityLevel,
    pub primary_problem: String,
    pub archetype: TransitionArchetype,
    pub vocal_safety_score: f64,
    pub warning_message: Option<String>,
    pub axes: [AxisScore; 4],
    pub reasoning: Vec<ForensicVerdictEntry>,
    pub failure_reasoning_text: String,
    /// Best first.
    pub rescue_suggestions: Vec<RescueSuggestion>,
}

impl TransitionStressPoint {
    pub fn has_rescue(&self) -> bool {
        !self.rescue_suggestions.is_empty()
    }
}

/// Immutable snapshot of a whole set's transition health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressDiagnosticReport {
    pub stress_points: Vec<TransitionStressPoint>,
    pub overall_health_score: f64,
    pub quick_summary: String,
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
}

impl StressDiagnosticReport {
    /// A report with no transitions and an explanatory summary.
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            stress_points: Vec::new(),
            overall_health_score: 100.0,
            quick_summary: message.into(),
            healthy: 0,
            warning: 0,
            critical: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stress_points.is_empty()
    }

    /// Worst stress point by severity, first one wins ties.
    pub fn worst(&self) -> Option<&TransitionStressPoint> {
        self.stress_points.iter().fold(None, |worst, point| match worst {
            Some(w) if w.severity_score >= point.severity_score => Some(w),
            _ => Some(point),
        })
    }
}

/// What a recommender gets to look at for one weak transition.
pub struct RescueContext<'a> {
    pub from_index: usize,
    pub to_index: usize,
    pub from: &'a SetTrack,
    pub to: &'a SetTrack,
    pub weights: &'a FlowWeightSettings,
    pub advice: &'a TransitionAdvice,
    pub current_severity: f64,
    /// Ids already in the set.
    pub exclude: &'a HashSet<&'a str>,
}

/// External collaborator proposing rescue tracks for a weak transition.
pub trait RescueRecommender: Send + Sync {
    fn recommend(&self, context: &RescueContext<'_>) -> anyhow::Result<Vec<RescueSuggestion>>;

    /// Name of this recommender (for logging)
    fn name(&self) -> &'static str;
}

/// Runs the scorer over every consecutive pair of a set.
#[derive(Clone)]
pub struct Diagnoser {
    recommender: Option<Arc<dyn RescueRecommender>>,
    rescue_limit: usize,
}

impl Default for Diagnoser {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnoser {
    /// A diagnoser without a recommender: stress points carry no suggestions.
    pub fn new() -> Self {
        Self {
            recommender: None,
            rescue_limit: DEFAULT_RESCUE_LIMIT,
        }
    }

    pub fn with_recommender(recommender: Arc<dyn RescueRecommender>) -> Self {
        Self {
            recommender: Some(recommender),
            rescue_limit: DEFAULT_RESCUE_LIMIT,
        }
    }

    pub fn rescue_limit(mut self, limit: usize) -> Self {
        self.rescue_limit = limit;
        self
    }

    /// Diagnose an ordered set. Always builds a fresh report.
    ///
    /// Fewer than two tracks or unusable weights yield an empty report, not an
    /// error; only a failing recommender is an error.
    pub fn diagnose(
        &self,
        tracks: &[SetTrack],
        weights: &FlowWeightSettings,
    ) -> Result<StressDiagnosticReport, DiagnoseError> {
        if tracks.len() < 2 {
            log::debug!("Set has {} track(s), nothing to diagnose", tracks.len());
            return Ok(StressDiagnosticReport::empty(
                "No transitions yet: add at least two tracks to diagnose the set.",
            ));
        }
        if let Some(reason) = weights.unusable_reason() {
            log::warn!("Flow weights are unusable ({weights:?}), skipping diagnosis");
            return Ok(StressDiagnosticReport::empty(format!(
                "No transitions scored: {reason}."
            )));
        }

        let exclude: HashSet<&str> = tracks.iter().map(|t| t.id.as_str()).collect();

        // Pairs are independent; rayon keeps the output in index order.
        let stress_points = (0..tracks.len() - 1)
            .into_par_iter()
            .map(|i| self.diagnose_pair(tracks, i, weights, &exclude))
            .collect::<Result<Vec<_>, _>>()?;

        let report = summarize(stress_points);
        log::info!(
            "Diagnosed {} transitions: health {:.1} ({})",
            report.stress_points.len(),
            report.overall_health_score,
            report.quick_summary
        );
        Ok(report)
    }

    fn diagnose_pair(
        &self,
        tracks: &[SetTrack],
        i: usize,
        weights: &FlowWeightSettings,
        exclude: &HashSet<&str>,
    ) -> Result<TransitionStressPoint, DiagnoseError> {
        let (from, to) = (&tracks[i], &tracks[i + 1]);
        let advice = scoring::score_transition(
            &from.features,
            &to.features,
            weights,
            to.features.manual_offset_seconds,
        );
        let severity_score = advice.severity_score();
        let severity_level = SeverityLevel::from_score(severity_score);
        log::debug!(
            "Transition {i}->{}: {} => {severity_score:.1} ({})",
            i + 1,
            advice.archetype.label(),
            severity_level.label()
        );

        let rescue_suggestions = match (&self.recommender, severity_level) {
            (Some(recommender), SeverityLevel::Warning | SeverityLevel::Critical)
                if self.rescue_limit > 0 =>
            {
                let context = RescueContext {
                    from_index: i,
                    to_index: i + 1,
                    from,
                    to,
                    weights,
                    advice: &advice,
                    current_severity: severity_score,
                    exclude,
                };
                let candidates = recommender.recommend(&context).map_err(|e| {
                    log::warn!("Recommender {} failed for {i}->{}: {e:#}", recommender.name(), i + 1);
                    DiagnoseError::Recommender {
                        from_index: i,
                        to_index: i + 1,
                        message: format!("{e:#}"),
                    }
                })?;
                rank_suggestions(candidates, severity_score, exclude, self.rescue_limit)
            }
            _ => Vec::new(),
        };

        Ok(TransitionStressPoint {
            from_index: i,
            to_index: i + 1,
            from_label: from.label(),
            to_label: to.label(),
            severity_score,
            severity_level,
            primary_problem: advice.primary_problem(),
            archetype: advice.archetype,
            vocal_safety_score: advice.vocal_safety_score,
            warning_message: advice.warning_message,
            axes: advice.axes,
            failure_reasoning_text: advice.reasoning_text,
            reasoning: advice.reasoning,
            rescue_suggestions,
        })
    }
}

/// Diagnose without a recommender.
pub fn diagnose(tracks: &[SetTrack], weights: &FlowWeightSettings) -> StressDiagnosticReport {
    match Diagnoser::new().diagnose(tracks, weights) {
        Ok(report) => report,
        // Unreachable without a recommender, but never panic on it.
        Err(e) => StressDiagnosticReport::empty(e.to_string()),
    }
}

/// Keep improving, out-of-set candidates, best predicted severity first.
fn rank_suggestions(
    mut candidates: Vec<RescueSuggestion>,
    current_severity: f64,
    exclude: &HashSet<&str>,
    limit: usize,
) -> Vec<RescueSuggestion> {
    candidates.retain(|c| {
        c.predicted_severity_score.is_finite()
            && c.predicted_severity_score < current_severity
            && !exclude.contains(c.track_id.as_str())
    });
    candidates.sort_by(|a, b| {
        a.predicted_severity_score
            .partial_cmp(&b.predicted_severity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.track_id.cmp(&b.track_id))
    });
    candidates.truncate(limit);
    candidates
}

fn summarize(stress_points: Vec<TransitionStressPoint>) -> StressDiagnosticReport {
    let count = |level: SeverityLevel| {
        stress_points
            .iter()
            .filter(|p| p.severity_level == level)
            .count()
    };
    let healthy = count(SeverityLevel::Healthy);
    let warning = count(SeverityLevel::Warning);
    let critical = count(SeverityLevel::Critical);

    let mean_severity =
        stress_points.iter().map(|p| p.severity_score).sum::<f64>() / stress_points.len() as f64;
    let overall_health_score = ((100.0 - mean_severity).clamp(0.0, 100.0) * 10.0).round() / 10.0;

    let quick_summary = format!(
        "{} transition{}: {healthy} healthy, {warning} warning, {critical} critical",
        stress_points.len(),
        if stress_points.len() == 1 { "" } else { "s" }
    );

    StressDiagnosticReport {
        stress_points,
        overall_health_score,
        quick_summary,
        healthy,
        warning,
        critical,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{TrackFeatureVector, VocalType};
    use crate::scoring::camelot::CamelotKey;

    pub(crate) fn track(id: &str, bpm: f64, key: &str, energy: f64, vocal_type: VocalType) -> SetTrack {
        SetTrack {
            id: id.to_string(),
            title: format!("Track {id}"),
            artist: None,
            features: TrackFeatureVector {
                bpm,
                bpm_stability: 1.0,
                camelot_key: CamelotKey::parse(key),
                energy,
                vocal_type,
                manual_offset_seconds: 0.0,
            },
        }
    }

    struct FixedRecommender(Vec<RescueSuggestion>);

    impl RescueRecommender for FixedRecommender {
        fn recommend(&self, _context: &RescueContext<'_>) -> anyhow::Result<Vec<RescueSuggestion>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingRecommender;

    impl RescueRecommender for FailingRecommender {
        fn recommend(&self, _context: &RescueContext<'_>) -> anyhow::Result<Vec<RescueSuggestion>> {
            anyhow::bail!("catalog offline")
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn suggestion(id: &str, predicted: f64) -> RescueSuggestion {
        RescueSuggestion {
            track_id: id.to_string(),
            display_reasoning: format!("bridge via {id}"),
            predicted_severity_score: predicted,
        }
    }

    fn mixed_set() -> Vec<SetTrack> {
        vec![
            track("a", 124.0, "8A", 0.5, VocalType::Instrumental),
            track("b", 125.0, "9A", 0.6, VocalType::SparseVocals),
            track("c", 140.0, "3A", 0.9, VocalType::FullLyrics),
            track("d", 139.0, "3A", 0.85, VocalType::FullLyrics),
            track("e", 126.0, "4B", 0.4, VocalType::Instrumental),
        ]
    }

    #[test]
    fn test_stress_point_count() {
        let weights = FlowWeightSettings::default();
        for n in 0..6 {
            let tracks: Vec<SetTrack> = mixed_set().into_iter().take(n).collect();
            let report = diagnose(&tracks, &weights);
            assert_eq!(report.stress_points.len(), n.saturating_sub(1));
            if n < 2 {
                assert_eq!(report.overall_health_score, 100.0);
                assert!(!report.quick_summary.is_empty());
            }
        }
    }

    #[test]
    fn test_zero_weights_yield_empty_report() {
        let weights = FlowWeightSettings {
            harmonic: 0.0,
            tempo: 0.0,
            energy: 0.0,
            vocal: 0.0,
            ..Default::default()
        };
        let report = diagnose(&mixed_set(), &weights);
        assert!(report.is_empty());
        assert_eq!(report.overall_health_score, 100.0);
        assert!(report.quick_summary.contains("zero"));
    }

    #[test]
    fn test_negative_weights_named_in_summary() {
        let weights = FlowWeightSettings {
            tempo: -1.0,
            ..Default::default()
        };
        let report = diagnose(&mixed_set(), &weights);
        assert!(report.is_empty());
        assert!(report.quick_summary.contains("non-negative"));
        assert!(!report.quick_summary.contains("zero"));
    }

    #[test]
    fn test_healthy_pair() {
        let tracks = vec![
            track("a", 128.0, "8A", 0.7, VocalType::Instrumental),
            track("b", 129.0, "8A", 0.7, VocalType::Instrumental),
        ];
        let report = diagnose(&tracks, &FlowWeightSettings::default());
        assert_eq!(report.stress_points.len(), 1);
        let point = &report.stress_points[0];
        assert_eq!(point.severity_level, SeverityLevel::Healthy);
        assert!(point.severity_score < 10.0);
        assert_eq!(point.archetype, TransitionArchetype::Blend);
        assert_eq!((point.from_index, point.to_index), (0, 1));
        assert_eq!(report.healthy, 1);
    }

    #[test]
    fn test_critical_pair_gets_ranked_rescues() {
        let tracks = vec![
            track("a", 128.0, "8A", 0.7, VocalType::FullLyrics),
            track("b", 140.0, "3A", 0.7, VocalType::FullLyrics),
        ];
        let recommender = FixedRecommender(vec![
            suggestion("x", 50.0),
            suggestion("y", 10.0),
            suggestion("a", 0.0),  // already in the set
            suggestion("z", 99.0), // worse than current
            suggestion("w", 30.0),
            suggestion("v", 40.0),
        ]);
        let diagnoser = Diagnoser::with_recommender(Arc::new(recommender));
        let report = diagnoser.diagnose(&tracks, &FlowWeightSettings::default()).unwrap();

        let point = &report.stress_points[0];
        assert_eq!(point.severity_level, SeverityLevel::Critical);
        let ids: Vec<&str> = point.rescue_suggestions.iter().map(|s| s.track_id.as_str()).collect();
        assert_eq!(ids, vec!["y", "w", "v"]);
        assert_eq!(report.critical, 1);
    }

    #[test]
    fn test_rescue_limit_caps_suggestions() {
        let tracks = vec![
            track("a", 128.0, "8A", 0.7, VocalType::FullLyrics),
            track("b", 140.0, "3A", 0.7, VocalType::FullLyrics),
        ];
        let recommender = FixedRecommender(vec![
            suggestion("x", 50.0),
            suggestion("y", 10.0),
            suggestion("w", 30.0),
        ]);
        let report = Diagnoser::with_recommender(Arc::new(recommender))
            .rescue_limit(1)
            .diagnose(&tracks, &FlowWeightSettings::default())
            .unwrap();
        let ids: Vec<&str> = report.stress_points[0]
            .rescue_suggestions
            .iter()
            .map(|s| s.track_id.as_str())
            .collect();
        assert_eq!(ids, vec!["y"]);
    }

    #[test]
    fn test_zero_rescue_limit_skips_recommender() {
        let tracks = vec![
            track("a", 128.0, "8A", 0.7, VocalType::FullLyrics),
            track("b", 140.0, "3A", 0.7, VocalType::FullLyrics),
        ];
        let report = Diagnoser::with_recommender(Arc::new(FailingRecommender))
            .rescue_limit(0)
            .diagnose(&tracks, &FlowWeightSettings::default())
            .unwrap();
        assert_eq!(report.stress_points[0].severity_level, SeverityLevel::Critical);
        assert!(!report.stress_points[0].has_rescue());
    }

    #[test]
    fn test_healthy_points_skip_recommender() {
        let tracks = vec![
            track("a", 128.0, "8A", 0.7, VocalType::Instrumental),
            track("b", 128.0, "8A", 0.7, VocalType::Instrumental),
        ];
        let diagnoser = Diagnoser::with_recommender(Arc::new(FailingRecommender));
        let report = diagnoser.diagnose(&tracks, &FlowWeightSettings::default()).unwrap();
        assert!(!report.stress_points[0].has_rescue());
    }

    #[test]
    fn test_recommender_failure_is_reported() {
        let tracks = vec![
            track("a", 128.0, "8A", 0.7, VocalType::FullLyrics),
            track("b", 140.0, "3A", 0.7, VocalType::FullLyrics),
        ];
        let diagnoser = Diagnoser::with_recommender(Arc::new(FailingRecommender));
        let err = diagnoser
            .diagnose(&tracks, &FlowWeightSettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("catalog offline"));
    }

    #[test]
    fn test_overall_health_is_mean() {
        let report = diagnose(&mixed_set(), &FlowWeightSettings::default());
        let mean = report.stress_points.iter().map(|p| p.severity_score).sum::<f64>()
            / report.stress_points.len() as f64;
        assert!((report.overall_health_score - (100.0 - mean)).abs() < 0.051);
        assert_eq!(
            report.healthy + report.warning + report.critical,
            report.stress_points.len()
        );
        assert!(report.quick_summary.starts_with("4 transitions"));
    }

    #[test]
    fn test_idempotent() {
        let weights = FlowWeightSettings::default();
        let first = diagnose(&mixed_set(), &weights);
        let second = diagnose(&mixed_set(), &weights);
        let scores = |r: &StressDiagnosticReport| -> Vec<f64> {
            r.stress_points.iter().map(|p| p.severity_score).collect()
        };
        assert_eq!(scores(&first), scores(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_position_independence() {
        let weights = FlowWeightSettings::default();
        let set = mixed_set();
        let original = diagnose(&set, &weights);
        // c->d sits at index 2; move the pair to the front.
        let moved = vec![set[2].clone(), set[3].clone(), set[0].clone(), set[1].clone(), set[4].clone()];
        let shifted = diagnose(&moved, &weights);
        assert_eq!(
            original.stress_points[2].severity_score,
            shifted.stress_points[0].severity_score
        );
        assert_eq!(
            original.stress_points[0].severity_score,
            shifted.stress_points[2].severity_score
        );
    }

    #[test]
    fn test_worst_point() {
        let report = diagnose(&mixed_set(), &FlowWeightSettings::default());
        let worst = report.worst().unwrap();
        assert!(report.stress_points.iter().all(|p| p.severity_score <= worst.severity_score));
        assert!(StressDiagnosticReport::empty("none").worst().is_none());
    }
}
