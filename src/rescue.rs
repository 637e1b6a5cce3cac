//! Applying a rescue: splice the chosen track into the set, re-diagnose, and
//! report what changed.
//!
//! `Idle -> Applying -> {Succeeded, Failed}`. Only one rescue may be applying
//! per workflow; a second call while one is in flight is rejected before the
//! mutation hook runs.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use thiserror::Error;

use crate::diagnosis::{Diagnoser, RescueSuggestion, StressDiagnosticReport, TransitionStressPoint};
use crate::healthbar::DiagnosticSession;
use crate::model::{FlowWeightSettings, SetTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RescueState {
    Idle,
    Applying,
    Succeeded,
    Failed,
}

impl RescueState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Applying,
            2 => Self::Succeeded,
            3 => Self::Failed,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Applying => 1,
            Self::Succeeded => 2,
            Self::Failed => 3,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RescueFailure {
    #[error("No stress point selected")]
    NoStressPoint,
    #[error("Stress point {index} does not exist ({len} transitions)")]
    StressPointOutOfRange { index: usize, len: usize },
    #[error("No rescue suggestion selected")]
    NoSuggestion,
    #[error("Rescue suggestion {index} does not exist ({len} suggestions)")]
    SuggestionOutOfRange { index: usize, len: usize },
    #[error("No mutation hook configured")]
    ApplyUnconfigured,
    #[error("Another rescue is already being applied")]
    Busy,
    #[error("Failed to apply rescue: {0}")]
    MutationFailed(String),
    #[error("Rescue applied, but re-diagnosis failed: {0}")]
    RediagnosisFailed(String),
}

impl RescueFailure {
    /// Whether the set was changed before the failure happened.
    pub fn mutation_applied(&self) -> bool {
        matches!(self, Self::RediagnosisFailed(_))
    }
}

/// What the mutation hook is asked to do: insert `suggestion.track_id` so it
/// lands at `position` in the ordered set.
#[derive(Debug)]
pub struct RescueSplice<'a> {
    pub position: usize,
    pub stress_point: &'a TransitionStressPoint,
    pub suggestion: &'a RescueSuggestion,
}

/// Caller-supplied mutation hook. Applies the splice and returns the updated set.
pub type ApplyFn<'f> = dyn FnMut(&RescueSplice<'_>) -> anyhow::Result<Vec<SetTrack>> + 'f;

#[derive(Debug, Clone, Serialize)]
pub struct ApplyRescueResult {
    pub success: bool,
    pub message: String,
    pub updated_report: Option<StressDiagnosticReport>,
    /// The stress point the rescue targeted, echoed back for visual feedback.
    pub stress_point_index: Option<usize>,
    pub failure: Option<RescueFailure>,
    pub mutation_applied: bool,
    pub severity_before: Option<f64>,
    /// Worse of the transitions now surrounding the inserted track.
    pub severity_after: Option<f64>,
}

impl ApplyRescueResult {
    fn failed(failure: RescueFailure, stress_point_index: Option<usize>) -> Self {
        Self {
            success: false,
            message: failure.to_string(),
            updated_report: None,
            stress_point_index,
            mutation_applied: failure.mutation_applied(),
            failure: Some(failure),
            severity_before: None,
            severity_after: None,
        }
    }
}

struct Applied {
    report: StressDiagnosticReport,
    message: String,
    severity_before: f64,
    severity_after: Option<f64>,
}

/// Holds the workflow state to `Applying` while alive; lands on `Failed`
/// if dropped without `finish` (e.g. the hook panicked).
struct InFlight<'a> {
    state: &'a AtomicU8,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn acquire(state: &'a AtomicU8) -> Option<Self> {
        let applying = RescueState::Applying.as_u8();
        state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != applying).then_some(applying)
            })
            .ok()
            .map(|_| Self {
                state,
                finished: false,
            })
    }

    fn finish(mut self, outcome: RescueState) {
        self.state.store(outcome.as_u8(), Ordering::Release);
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state
                .store(RescueState::Failed.as_u8(), Ordering::Release);
        }
    }
}

pub struct RescueWorkflow {
    diagnoser: Diagnoser,
    state: AtomicU8,
}

impl RescueWorkflow {
    pub fn new(diagnoser: Diagnoser) -> Self {
        Self {
            diagnoser,
            state: AtomicU8::new(RescueState::Idle.as_u8()),
        }
    }

    pub fn state(&self) -> RescueState {
        RescueState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply `suggestion_index` of stress point `stress_point_index` in `report`.
    ///
    /// The hook splices the track in and returns the updated set; success is
    /// only reported once the new set has been re-diagnosed. A failed
    /// re-diagnosis is reported as such and the mutation is left in place.
    pub fn apply_rescue(
        &self,
        report: &StressDiagnosticReport,
        stress_point_index: Option<usize>,
        suggestion_index: Option<usize>,
        weights: &FlowWeightSettings,
        apply_fn: Option<&mut ApplyFn<'_>>,
    ) -> ApplyRescueResult {
        let Some(guard) = InFlight::acquire(&self.state) else {
            log::warn!("Rejected rescue: another rescue is already applying");
            return ApplyRescueResult::failed(RescueFailure::Busy, stress_point_index);
        };

        match self.run(report, stress_point_index, suggestion_index, weights, apply_fn) {
            Ok(applied) => {
                guard.finish(RescueState::Succeeded);
                log::info!("{}", applied.message);
                ApplyRescueResult {
                    success: true,
                    message: applied.message,
                    updated_report: Some(applied.report),
                    stress_point_index,
                    failure: None,
                    mutation_applied: true,
                    severity_before: Some(applied.severity_before),
                    severity_after: applied.severity_after,
                }
            }
            Err(failure) => {
                guard.finish(RescueState::Failed);
                log::warn!("Rescue failed: {failure}");
                ApplyRescueResult::failed(failure, stress_point_index)
            }
        }
    }

    /// Apply the rescue selected in `session`; on success the session's
    /// report is replaced with the re-diagnosed one.
    pub fn apply_session_rescue(
        &self,
        session: &mut DiagnosticSession,
        weights: &FlowWeightSettings,
        apply_fn: Option<&mut ApplyFn<'_>>,
    ) -> ApplyRescueResult {
        let report = session.report();
        let result = self.apply_rescue(
            &report,
            session.selected_index(),
            session.selected_rescue_index(),
            weights,
            apply_fn,
        );
        if let Some(updated) = &result.updated_report {
            session.replace_report(updated.clone());
        }
        result
    }

    fn run(
        &self,
        report: &StressDiagnosticReport,
        stress_point_index: Option<usize>,
        suggestion_index: Option<usize>,
        weights: &FlowWeightSettings,
        apply_fn: Option<&mut ApplyFn<'_>>,
    ) -> Result<Applied, RescueFailure> {
        let index = stress_point_index.ok_or(RescueFailure::NoStressPoint)?;
        let point = report
            .stress_points
            .get(index)
            .ok_or(RescueFailure::StressPointOutOfRange {
                index,
                len: report.stress_points.len(),
            })?;
        let pick = suggestion_index.ok_or(RescueFailure::NoSuggestion)?;
        let suggestion =
            point
                .rescue_suggestions
                .get(pick)
                .ok_or(RescueFailure::SuggestionOutOfRange {
                    index: pick,
                    len: point.rescue_suggestions.len(),
                })?;
        let apply_fn = apply_fn.ok_or(RescueFailure::ApplyUnconfigured)?;

        let splice = RescueSplice {
            position: point.to_index,
            stress_point: point,
            suggestion,
        };
        log::debug!(
            "Splicing {} at position {} ({} → {})",
            suggestion.track_id,
            splice.position,
            point.from_label,
            point.to_label
        );
        let tracks =
            apply_fn(&splice).map_err(|e| RescueFailure::MutationFailed(format!("{e:#}")))?;

        let updated = self
            .diagnoser
            .diagnose(&tracks, weights)
            .map_err(|e| RescueFailure::RediagnosisFailed(e.to_string()))?;

        let grew = updated.stress_points.len() == report.stress_points.len() + 1;
        let severity_after = healed_severity(&updated, index, grew);
        let message = match severity_after {
            Some(after) => format!(
                "Inserted {} between {} and {}: severity {:.0}% → {:.0}%",
                suggestion.track_id, point.from_label, point.to_label, point.severity_score, after
            ),
            None => format!(
                "Inserted {} between {} and {}",
                suggestion.track_id, point.from_label, point.to_label
            ),
        };

        Ok(Applied {
            report: updated,
            message,
            severity_before: point.severity_score,
            severity_after,
        })
    }
}

/// Severity where the rescue landed: after an insertion the old transition is
/// split in two, and the worse half is what the listener hears.
fn healed_severity(report: &StressDiagnosticReport, index: usize, grew: bool) -> Option<f64> {
    let first = report.stress_points.get(index)?.severity_score;
    let second = if grew {
        report.stress_points.get(index + 1).map(|p| p.severity_score)
    } else {
        None
    };
    Some(second.map_or(first, |s| first.max(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use crate::diagnosis::tests::track;
    use crate::diagnosis::{RescueContext, RescueRecommender};
    use crate::library::splice_track;
    use crate::model::{SeverityLevel, VocalType};

    struct Suggests(&'static str);

    impl RescueRecommender for Suggests {
        fn recommend(&self, context: &RescueContext<'_>) -> anyhow::Result<Vec<RescueSuggestion>> {
            Ok(vec![RescueSuggestion {
                track_id: self.0.to_string(),
                display_reasoning: "bridge".into(),
                predicted_severity_score: context.current_severity - 1.0,
            }])
        }

        fn name(&self) -> &'static str {
            "suggests"
        }
    }

    struct Offline;

    impl RescueRecommender for Offline {
        fn recommend(&self, _context: &RescueContext<'_>) -> anyhow::Result<Vec<RescueSuggestion>> {
            anyhow::bail!("recommender offline")
        }

        fn name(&self) -> &'static str {
            "offline"
        }
    }

    fn clashing_set() -> Vec<SetTrack> {
        vec![
            track("a", 128.0, "8A", 0.7, VocalType::FullLyrics),
            track("b", 140.0, "3A", 0.7, VocalType::FullLyrics),
        ]
    }

    fn bridge() -> SetTrack {
        track("bridge", 134.0, "8A", 0.7, VocalType::Instrumental)
    }

    fn diagnoser() -> Diagnoser {
        Diagnoser::with_recommender(Arc::new(Suggests("bridge")))
    }

    fn report() -> StressDiagnosticReport {
        diagnoser()
            .diagnose(&clashing_set(), &FlowWeightSettings::default())
            .unwrap()
    }

    /// Hook that splices the bridge into a copy of `set`.
    fn splicing_hook(set: Vec<SetTrack>) -> impl FnMut(&RescueSplice<'_>) -> anyhow::Result<Vec<SetTrack>> {
        move |splice: &RescueSplice<'_>| {
            let mut ids: Vec<String> = set.iter().map(|t| t.id.clone()).collect();
            splice_track(&mut ids, splice.position, &splice.suggestion.track_id)?;
            let mut tracks = set.clone();
            tracks.insert(splice.position, bridge());
            assert_eq!(tracks.len(), ids.len());
            Ok(tracks)
        }
    }

    #[test]
    fn test_successful_rescue() {
        let workflow = RescueWorkflow::new(diagnoser());
        let report = report();
        assert_eq!(report.stress_points[0].severity_level, SeverityLevel::Critical);

        let mut hook = splicing_hook(clashing_set());
        let result = workflow.apply_rescue(
            &report,
            Some(0),
            Some(0),
            &FlowWeightSettings::default(),
            Some(&mut hook),
        );

        assert!(result.success, "{}", result.message);
        assert_eq!(workflow.state(), RescueState::Succeeded);
        assert_eq!(result.stress_point_index, Some(0));
        assert!(result.mutation_applied);
        let updated = result.updated_report.unwrap();
        assert_eq!(updated.stress_points.len(), 2);
        assert_eq!(updated.stress_points[0].to_label, "Track bridge");
        let before = result.severity_before.unwrap();
        let after = result.severity_after.unwrap();
        assert!(after < before);
        assert!(result.message.contains("bridge"));
        // The input report is a snapshot and stays untouched.
        assert_eq!(report.stress_points.len(), 1);
    }

    #[test]
    fn test_selection_failures() {
        let workflow = RescueWorkflow::new(diagnoser());
        let report = report();
        let weights = FlowWeightSettings::default();
        let mut hook = splicing_hook(clashing_set());

        let cases = [
            (None, Some(0), RescueFailure::NoStressPoint),
            (Some(4), Some(0), RescueFailure::StressPointOutOfRange { index: 4, len: 1 }),
            (Some(0), None, RescueFailure::NoSuggestion),
            (Some(0), Some(3), RescueFailure::SuggestionOutOfRange { index: 3, len: 1 }),
        ];
        for (point, pick, expected) in cases {
            let result = workflow.apply_rescue(&report, point, pick, &weights, Some(&mut hook));
            assert!(!result.success);
            assert!(!result.mutation_applied);
            assert!(result.updated_report.is_none());
            assert_eq!(result.failure, Some(expected));
            assert_eq!(workflow.state(), RescueState::Failed);
        }
    }

    #[test]
    fn test_unconfigured_hook() {
        let workflow = RescueWorkflow::new(diagnoser());
        let result = workflow.apply_rescue(
            &report(),
            Some(0),
            Some(0),
            &FlowWeightSettings::default(),
            None,
        );
        assert_eq!(result.failure, Some(RescueFailure::ApplyUnconfigured));
        assert_eq!(result.message, "No mutation hook configured");
    }

    #[test]
    fn test_mutation_failure() {
        let workflow = RescueWorkflow::new(diagnoser());
        let mut hook = |_splice: &RescueSplice<'_>| -> anyhow::Result<Vec<SetTrack>> {
            anyhow::bail!("set is locked")
        };
        let result = workflow.apply_rescue(
            &report(),
            Some(0),
            Some(0),
            &FlowWeightSettings::default(),
            Some(&mut hook),
        );
        assert!(!result.success);
        assert!(!result.mutation_applied);
        assert!(result.message.contains("set is locked"));
        assert!(matches!(result.failure, Some(RescueFailure::MutationFailed(_))));
    }

    #[test]
    fn test_rediagnosis_failure_is_distinct() {
        let workflow = RescueWorkflow::new(Diagnoser::with_recommender(Arc::new(Offline)));
        // Splice in something that still leaves a weak transition, so the
        // recommender is consulted and fails.
        let mut hook = |_splice: &RescueSplice<'_>| -> anyhow::Result<Vec<SetTrack>> {
            let mut tracks = clashing_set();
            tracks.insert(1, track("bad", 100.0, "1B", 0.1, VocalType::FullLyrics));
            Ok(tracks)
        };
        let result = workflow.apply_rescue(
            &report(),
            Some(0),
            Some(0),
            &FlowWeightSettings::default(),
            Some(&mut hook),
        );
        assert!(!result.success);
        assert!(result.mutation_applied);
        assert!(matches!(result.failure, Some(RescueFailure::RediagnosisFailed(_))));
        assert!(result.message.contains("recommender offline"));
        assert_eq!(workflow.state(), RescueState::Failed);
    }

    #[test]
    fn test_concurrent_rescue_rejected() {
        let workflow = Arc::new(RescueWorkflow::new(diagnoser()));
        let report = Arc::new(report());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let first = {
            let workflow = Arc::clone(&workflow);
            let report = Arc::clone(&report);
            thread::spawn(move || {
                let mut inner = splicing_hook(clashing_set());
                let mut hook = |splice: &RescueSplice<'_>| -> anyhow::Result<Vec<SetTrack>> {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    inner(splice)
                };
                workflow.apply_rescue(
                    &report,
                    Some(0),
                    Some(0),
                    &FlowWeightSettings::default(),
                    Some(&mut hook),
                )
            })
        };

        entered_rx.recv().unwrap();
        assert_eq!(workflow.state(), RescueState::Applying);

        let invoked = Mutex::new(false);
        let mut second = |_splice: &RescueSplice<'_>| -> anyhow::Result<Vec<SetTrack>> {
            *invoked.lock().unwrap() = true;
            Ok(Vec::new())
        };
        let rejected = workflow.apply_rescue(
            &report,
            Some(0),
            Some(0),
            &FlowWeightSettings::default(),
            Some(&mut second),
        );
        assert!(!rejected.success);
        assert_eq!(rejected.failure, Some(RescueFailure::Busy));
        assert!(!*invoked.lock().unwrap());
        assert_eq!(workflow.state(), RescueState::Applying);

        release_tx.send(()).unwrap();
        let result = first.join().unwrap();
        assert!(result.success);
        assert_eq!(workflow.state(), RescueState::Succeeded);
    }

    #[test]
    fn test_panicking_hook_leaves_failed_state() {
        let workflow = RescueWorkflow::new(diagnoser());
        let report = report();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut hook = |_splice: &RescueSplice<'_>| -> anyhow::Result<Vec<SetTrack>> {
                panic!("hook exploded")
            };
            workflow.apply_rescue(
                &report,
                Some(0),
                Some(0),
                &FlowWeightSettings::default(),
                Some(&mut hook),
            )
        }));
        assert!(outcome.is_err());
        assert_eq!(workflow.state(), RescueState::Failed);

        // A later rescue can still run.
        let mut hook = splicing_hook(clashing_set());
        let result = workflow.apply_rescue(
            &report,
            Some(0),
            Some(0),
            &FlowWeightSettings::default(),
            Some(&mut hook),
        );
        assert!(result.success);
    }

    #[test]
    fn test_session_rescue_replaces_report() {
        let workflow = RescueWorkflow::new(diagnoser());
        let mut session = DiagnosticSession::new(report());
        let weights = FlowWeightSettings::default();

        let result = workflow.apply_session_rescue(&mut session, &weights, None);
        assert_eq!(result.failure, Some(RescueFailure::NoStressPoint));

        session.select_segment(0);
        assert!(session.select_rescue(0));
        let mut hook = splicing_hook(clashing_set());
        let result = workflow.apply_session_rescue(&mut session, &weights, Some(&mut hook));
        assert!(result.success);
        assert_eq!(session.segments().len(), 2);
        assert_eq!(session.selected_index(), Some(0));
        assert_eq!(session.selected_rescue_index(), None);
    }
}
