use std::sync::Arc;

use super::{RescueContext, RescueRecommender, RescueSuggestion};
use crate::library::TrackLibrary;
use crate::model::SetTrack;
use crate::scoring::{TransitionAdvice, score_transition};

/// Proposes library tracks to insert between the two sides of a weak transition.
///
/// Each candidate is scored as a bridge (from → candidate → to); its predicted
/// severity is the worse of the two new transitions.
pub struct LibraryRecommender<L: TrackLibrary> {
    library: Arc<L>,
}

impl<L: TrackLibrary> LibraryRecommender<L> {
    pub fn new(library: Arc<L>) -> Self {
        Self { library }
    }
}

impl<L: TrackLibrary> RescueRecommender for LibraryRecommender<L> {
    fn recommend(&self, context: &RescueContext<'_>) -> anyhow::Result<Vec<RescueSuggestion>> {
        let mut suggestions = Vec::new();

        for candidate in self.library.tracks() {
            if context.exclude.contains(candidate.id.as_str()) {
                continue;
            }

            let into = score_transition(
                &context.from.features,
                &candidate.features,
                context.weights,
                candidate.features.manual_offset_seconds,
            );
            let out_of = score_transition(
                &candidate.features,
                &context.to.features,
                context.weights,
                context.to.features.manual_offset_seconds,
            );
            let predicted = into.severity_score().max(out_of.severity_score());
            if predicted >= context.current_severity {
                continue;
            }

            suggestions.push(RescueSuggestion {
                track_id: candidate.id.clone(),
                display_reasoning: bridge_reasoning(context, candidate, &into, &out_of),
                predicted_severity_score: predicted,
            });
        }

        log::debug!(
            "{} bridge candidates for {}->{}",
            suggestions.len(),
            context.from_index,
            context.to_index
        );
        Ok(suggestions)
    }

    fn name(&self) -> &'static str {
        "library"
    }
}

fn bridge_reasoning(
    context: &RescueContext<'_>,
    candidate: &SetTrack,
    into: &TransitionAdvice,
    out_of: &TransitionAdvice,
) -> String {
    let key = candidate
        .features
        .camelot_key
        .map(|k| k.to_string())
        .unwrap_or_else(|| "?".to_string());
    let head = format!(
        "{} ({:.0} BPM, {key}) bridges {} → {}",
        candidate.label(),
        candidate.features.bpm,
        context.from.label(),
        context.to.label()
    );

    match context.advice.dominant {
        Some(dimension) => format!(
            "{head}: {} / {}",
            into.axis(dimension).label,
            out_of.axis(dimension).label
        ),
        None => format!("{head}: {} / {}", into.primary_problem(), out_of.primary_problem()),
    }
}
