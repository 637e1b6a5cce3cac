//! Health bar projection: one proportional, severity-colored segment per
//! transition, plus the session state that tracks what the user selected.

use std::sync::Arc;

use serde::Serialize;

use crate::diagnosis::{RescueSuggestion, StressDiagnosticReport, TransitionStressPoint};
use crate::model::SeverityLevel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthBarSegment {
    /// Position in the current report only; not stable across reports.
    pub index: usize,
    pub severity_score: f64,
    pub severity_level: SeverityLevel,
    pub primary_problem: String,
    /// Fraction of the bar, 1/n.
    pub width: f64,
    pub color: &'static str,
    pub tooltip: String,
}

/// Project a report onto equal-width segments. Empty report → no segments.
pub fn project(report: &StressDiagnosticReport) -> Vec<HealthBarSegment> {
    let n = report.stress_points.len();
    if n == 0 {
        return Vec::new();
    }
    let width = 1.0 / n as f64;

    report
        .stress_points
        .iter()
        .enumerate()
        .map(|(index, point)| HealthBarSegment {
            index,
            severity_score: point.severity_score,
            severity_level: point.severity_level,
            primary_problem: point.primary_problem.clone(),
            width,
            color: point.severity_level.color(),
            tooltip: tooltip(point),
        })
        .collect()
}

/// Look up the stress point behind a segment index.
pub fn resolve(report: &StressDiagnosticReport, index: usize) -> Option<&TransitionStressPoint> {
    report.stress_points.get(index)
}

fn tooltip(point: &TransitionStressPoint) -> String {
    let mut text = format!(
        "{} → {}\n\n{}\nSeverity: {:.0}%",
        point.from_label, point.to_label, point.primary_problem, point.severity_score
    );
    if point.has_rescue() {
        let n = point.rescue_suggestions.len();
        text.push_str(&format!(
            "\nRescue available ({n} option{})",
            if n == 1 { "" } else { "s" }
        ));
    }
    text
}

/// One independent diagnostic view over a set: the current report, its
/// segments, and what is selected. Reports are replaced whole, never patched.
#[derive(Debug, Clone)]
pub struct DiagnosticSession {
    report: Arc<StressDiagnosticReport>,
    segments: Vec<HealthBarSegment>,
    selected_point: Option<usize>,
    selected_rescue: Option<usize>,
}

impl DiagnosticSession {
    pub fn new(report: StressDiagnosticReport) -> Self {
        let segments = project(&report);
        Self {
            report: Arc::new(report),
            segments,
            selected_point: None,
            selected_rescue: None,
        }
    }

    pub fn report(&self) -> Arc<StressDiagnosticReport> {
        Arc::clone(&self.report)
    }

    pub fn segments(&self) -> &[HealthBarSegment] {
        &self.segments
    }

    /// Swap in a new report and re-project. A selection survives only if its
    /// index is still in range; the rescue selection is always cleared.
    pub fn replace_report(&mut self, report: StressDiagnosticReport) {
        self.segments = project(&report);
        self.report = Arc::new(report);
        self.selected_rescue = None;
        if self
            .selected_point
            .is_some_and(|i| i >= self.report.stress_points.len())
        {
            self.selected_point = None;
        }
    }

    /// Select a segment. Out of range clears the selection and returns None.
    pub fn select_segment(&mut self, index: usize) -> Option<&TransitionStressPoint> {
        self.selected_rescue = None;
        if index < self.report.stress_points.len() {
            self.selected_point = Some(index);
            self.report.stress_points.get(index)
        } else {
            log::debug!("Segment {index} out of range, clearing selection");
            self.selected_point = None;
            None
        }
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected_point
    }

    pub fn selected_point(&self) -> Option<&TransitionStressPoint> {
        self.selected_point.and_then(|i| resolve(&self.report, i))
    }

    /// Select one of the selected stress point's rescues. Returns false (and
    /// clears the rescue selection) when nothing valid is selected.
    pub fn select_rescue(&mut self, index: usize) -> bool {
        let valid = self
            .selected_point()
            .is_some_and(|p| index < p.rescue_suggestions.len());
        self.selected_rescue = valid.then_some(index);
        valid
    }

    pub fn selected_rescue_index(&self) -> Option<usize> {
        self.selected_rescue
    }

    pub fn selected_rescue(&self) -> Option<&RescueSuggestion> {
        let point = self.selected_point()?;
        point.rescue_suggestions.get(self.selected_rescue?)
    }
}
