pub mod camelot;

use serde::{Deserialize, Serialize};

use crate::forensic::ForensicVerdictEntry;
use crate::model::{EnergyArc, FlowWeightSettings, SeverityLevel, TrackFeatureVector};
use camelot::CamelotKey;

/// A sub-score below this marks its dimension as a problem.
pub const PROBLEM_THRESHOLD: f64 = 0.5;

/// vocalSafetyScore below this gets a warning message.
pub const VOCAL_CAUTION_THRESHOLD: f64 = 60.0;

/// Length of a typical blend; vocals further apart than this never overlap.
pub const BLEND_WINDOW_SECONDS: f64 = 32.0;

/// Energy deltas beyond this count as a deliberate build or drop.
const ENERGY_DIRECTION_DELTA: f64 = 0.1;

/// Extra cost of riding a half-time or double-time blend.
const HALF_DOUBLE_SURCHARGE: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Harmonic,
    Tempo,
    Energy,
    Vocal,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [Self::Harmonic, Self::Tempo, Self::Energy, Self::Vocal];

    pub fn title(self) -> &'static str {
        match self {
            Self::Harmonic => "HARMONIC",
            Self::Tempo => "TEMPO",
            Self::Energy => "ENERGY",
            Self::Vocal => "VOCAL",
        }
    }

    fn weight(self, weights: &FlowWeightSettings) -> f64 {
        match self {
            Self::Harmonic => weights.harmonic,
            Self::Tempo => weights.tempo,
            Self::Energy => weights.energy,
            Self::Vocal => weights.vocal,
        }
    }
}

/// Categorical label for a transition's dominant style or failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionArchetype {
    Blend,
    Cut,
    EnergyBuild,
    EnergyDrop,
    HarmonicShift,
}

impl TransitionArchetype {
    pub fn label(self) -> &'static str {
        match self {
            Self::Blend => "clean blend",
            Self::Cut => "hard cut",
            Self::EnergyBuild => "energy build",
            Self::EnergyDrop => "energy drop",
            Self::HarmonicShift => "harmonic shift",
        }
    }
}

/// One scored dimension of a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisScore {
    pub dimension: Dimension,
    /// Quality in [0, 1]; 1.0 = no friction.
    pub value: f64,
    pub label: String,
}

/// Result of scoring one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionAdvice {
    pub archetype: TransitionArchetype,
    /// Typed explanation, emitted directly by the scorer.
    pub reasoning: Vec<ForensicVerdictEntry>,
    /// Glyph-text rendering of `reasoning`.
    pub reasoning_text: String,
    pub vocal_safety_score: f64,
    pub warning_message: Option<String>,
    /// Sub-scores in `Dimension::ALL` order.
    pub axes: [AxisScore; 4],
    /// Weighted quality in [0, 1].
    pub quality: f64,
    /// The dimension that fell below the problem threshold, if any.
    pub dominant: Option<Dimension>,
    pub energy_delta: f64,
}

impl TransitionAdvice {
    pub fn axis(&self, dimension: Dimension) -> &AxisScore {
        &self.axes[Dimension::ALL
            .iter()
            .position(|d| *d == dimension)
            .unwrap_or_default()]
    }

    /// 100 × (1 − quality), rounded to one decimal.
    pub fn severity_score(&self) -> f64 {
        severity_from_quality(self.quality)
    }

    /// Short description of what is wrong (or right) with the transition.
    pub fn primary_problem(&self) -> String {
        match self.dominant {
            Some(dimension) => self.axis(dimension).label.clone(),
            None => match self.archetype {
                TransitionArchetype::EnergyBuild => "Smooth energy build".to_string(),
                TransitionArchetype::EnergyDrop => "Controlled energy drop".to_string(),
                _ => "Clean blend".to_string(),
            },
        }
    }
}

pub fn severity_from_quality(quality: f64) -> f64 {
    let raw = (100.0 * (1.0 - quality)).clamp(0.0, 100.0);
    (raw * 10.0).round() / 10.0
}

/// Score the transition from `a` into `b`.
///
/// `manual_offset_seconds` is where the incoming vocal lands relative to the
/// start of the blend; the further out, the less the two vocals overlap.
pub fn score_transition(
    a: &TrackFeatureVector,
    b: &TrackFeatureVector,
    weights: &FlowWeightSettings,
    manual_offset_seconds: f64,
) -> TransitionAdvice {
    let energy_delta = b.energy - a.energy;
    let axes = [
        score_harmonic(a.camelot_key, b.camelot_key),
        score_tempo(a, b),
        score_energy(a.energy, b.energy, weights.arc),
        score_vocal(a, b, manual_offset_seconds),
    ];

    let quality = combined_quality(&axes, weights);

    // Zero-weighted dimensions can't be the dominant problem unless nothing is weighted.
    let considered: Vec<&AxisScore> = if weights.is_usable() {
        axes.iter()
            .filter(|axis| axis.dimension.weight(weights) > 0.0)
            .collect()
    } else {
        axes.iter().collect()
    };
    let worst = considered
        .into_iter()
        .min_by(|x, y| x.value.partial_cmp(&y.value).unwrap_or(std::cmp::Ordering::Equal));

    let (archetype, dominant) = match worst {
        Some(axis) if axis.value < PROBLEM_THRESHOLD => {
            let archetype = match axis.dimension {
                Dimension::Harmonic => TransitionArchetype::HarmonicShift,
                Dimension::Tempo | Dimension::Vocal => TransitionArchetype::Cut,
                Dimension::Energy if energy_delta >= 0.0 => TransitionArchetype::EnergyBuild,
                Dimension::Energy => TransitionArchetype::EnergyDrop,
            };
            (archetype, Some(axis.dimension))
        }
        _ => (direction_archetype(energy_delta), None),
    };

    let vocal_quality = axes[3].value;
    let vocal_safety_score = (vocal_quality * 1000.0).round() / 10.0;
    let warning_message = (vocal_safety_score < VOCAL_CAUTION_THRESHOLD).then(|| {
        format!(
            "Vocal collision: {} over {} within {:.1}s of the blend",
            b.vocal_type.label(),
            a.vocal_type.label(),
            manual_offset_seconds.abs()
        )
    });

    let reasoning = build_reasoning(&axes, weights, quality, worst, warning_message.as_deref());
    let reasoning_text = crate::forensic::render_reasoning(&reasoning);

    TransitionAdvice {
        archetype,
        reasoning,
        reasoning_text,
        vocal_safety_score,
        warning_message,
        axes,
        quality,
        dominant,
        energy_delta,
    }
}

fn direction_archetype(energy_delta: f64) -> TransitionArchetype {
    if energy_delta > ENERGY_DIRECTION_DELTA {
        TransitionArchetype::EnergyBuild
    } else if energy_delta < -ENERGY_DIRECTION_DELTA {
        TransitionArchetype::EnergyDrop
    } else {
        TransitionArchetype::Blend
    }
}

/// Weighted mean of the sub-scores; plain mean when weights are unusable.
fn combined_quality(axes: &[AxisScore; 4], weights: &FlowWeightSettings) -> f64 {
    if !weights.is_usable() {
        return axes.iter().map(|a| a.value).sum::<f64>() / axes.len() as f64;
    }
    let weighted: f64 = axes
        .iter()
        .map(|axis| axis.value * axis.dimension.weight(weights))
        .sum();
    (weighted / weights.total()).clamp(0.0, 1.0)
}

// ── Harmonic ──────────────────────────────────────────────────────────
// Camelot wheel: same slot, one step around, or the relative major/minor
// all mix cleanly. Cost rises with every further step.
fn score_harmonic(from: Option<CamelotKey>, to: Option<CamelotKey>) -> AxisScore {
    let (Some(from), Some(to)) = (from, to) else {
        return AxisScore {
            dimension: Dimension::Harmonic,
            value: 0.5,
            label: "Unknown key".to_string(),
        };
    };

    let steps = from.wheel_distance(to);
    let same_mode = from.is_minor() == to.is_minor();
    let (value, label) = match (steps, same_mode) {
        (0, true) => (1.0, format!("Same key ({from})")),
        (0, false) => (0.85, format!("Relative major/minor ({from} → {to})")),
        (1, true) => (0.9, format!("Adjacent key ({from} → {to})")),
        (2, true) => (0.6, format!("Two steps on the wheel ({from} → {to})")),
        (1, false) => (0.5, format!("Diagonal key move ({from} → {to})")),
        (steps, _) => {
            let value = match steps {
                2 | 3 => 0.3,
                4 => 0.2,
                5 => 0.1,
                _ => 0.05,
            };
            (value, format!("Key clash ({from} → {to}, {steps} steps)"))
        }
    };

    AxisScore {
        dimension: Dimension::Harmonic,
        value,
        label,
    }
}

// ── Tempo ─────────────────────────────────────────────────────────────
// Relative BPM gap: <= 2% is a free pitch ride, 8% and up is unmixable.
// Unsteady grids make any gap harder to hold.
fn score_tempo(a: &TrackFeatureVector, b: &TrackFeatureVector) -> AxisScore {
    let valid = |bpm: f64| bpm.is_finite() && bpm > 0.0;
    if !valid(a.bpm) || !valid(b.bpm) {
        return AxisScore {
            dimension: Dimension::Tempo,
            value: 0.5,
            label: "Unknown tempo".to_string(),
        };
    }

    let direct = tempo_curve(relative_gap(a.bpm, b.bpm));
    let half_double = tempo_curve(
        relative_gap(a.bpm, b.bpm * 2.0).min(relative_gap(a.bpm, b.bpm / 2.0)),
    ) - HALF_DOUBLE_SURCHARGE;

    let stability = a.bpm_stability.min(b.bpm_stability).clamp(0.0, 1.0);
    let stability_factor = 0.6 + 0.4 * stability;

    let gap_pct = relative_gap(a.bpm, b.bpm) * 100.0;
    let (base, label) = if half_double > direct {
        (
            half_double,
            format!("Half/double-time ride ({:.1} → {:.1} BPM)", a.bpm, b.bpm),
        )
    } else if direct >= 1.0 {
        (
            direct,
            format!("Locked tempo ({:.1} → {:.1} BPM)", a.bpm, b.bpm),
        )
    } else if direct >= PROBLEM_THRESHOLD {
        (
            direct,
            format!("Pitch ride needed ({gap_pct:.1}% gap, {:.1} → {:.1} BPM)", a.bpm, b.bpm),
        )
    } else {
        (
            direct,
            format!("Tempo gap too wide ({gap_pct:.1}%, {:.1} → {:.1} BPM)", a.bpm, b.bpm),
        )
    };

    let label = if stability < 0.5 {
        format!("{label}, unsteady grid")
    } else {
        label
    };

    AxisScore {
        dimension: Dimension::Tempo,
        value: (base.max(0.0) * stability_factor).clamp(0.0, 1.0),
        label,
    }
}

fn relative_gap(a: f64, b: f64) -> f64 {
    (a - b).abs() / ((a + b) / 2.0)
}

fn tempo_curve(gap: f64) -> f64 {
    if gap <= 0.02 {
        1.0
    } else if gap >= 0.08 {
        0.0
    } else {
        1.0 - (gap - 0.02) / 0.06
    }
}

// ── Energy ────────────────────────────────────────────────────────────
// Moves that follow the intended arc get more room than moves against it.
fn score_energy(from: f64, to: f64, arc: EnergyArc) -> AxisScore {
    let delta = to - from;
    let (tolerance_up, tolerance_down) = match arc {
        EnergyArc::Free => (0.2, 0.2),
        EnergyArc::Build => (0.25, 0.10),
        EnergyArc::Sustain => (0.10, 0.10),
        EnergyArc::Release => (0.10, 0.25),
    };
    let excess = if delta >= 0.0 {
        delta - tolerance_up
    } else {
        -delta - tolerance_down
    }
    .max(0.0);
    let value = (1.0 - 2.5 * excess).clamp(0.0, 1.0);

    let label = if excess <= 0.0 {
        if delta.abs() <= ENERGY_DIRECTION_DELTA {
            format!("Energy holds ({from:.2} → {to:.2})")
        } else if delta > 0.0 {
            format!("Energy lifts ({from:.2} → {to:.2})")
        } else {
            format!("Energy eases ({from:.2} → {to:.2})")
        }
    } else if delta > 0.0 {
        format!("Energy spike ({from:.2} → {to:.2})")
    } else {
        format!("Energy crash ({from:.2} → {to:.2})")
    };

    AxisScore {
        dimension: Dimension::Energy,
        value,
        label,
    }
}

// ── Vocal ─────────────────────────────────────────────────────────────
// Risk = presence(a) × presence(b) × overlap inside the blend window.
fn score_vocal(a: &TrackFeatureVector, b: &TrackFeatureVector, offset_seconds: f64) -> AxisScore {
    let overlap = if offset_seconds.is_finite() {
        (1.0 - offset_seconds.abs() / BLEND_WINDOW_SECONDS).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let risk = a.vocal_type.presence() * b.vocal_type.presence() * overlap;
    let value = (1.0 - risk).clamp(0.0, 1.0);

    let label = if risk <= 0.0 {
        "No vocal overlap".to_string()
    } else if value >= VOCAL_CAUTION_THRESHOLD / 100.0 {
        format!(
            "Light vocal overlap ({} into {})",
            a.vocal_type.label(),
            b.vocal_type.label()
        )
    } else {
        format!(
            "Vocal collision ({} into {})",
            a.vocal_type.label(),
            b.vocal_type.label()
        )
    };

    AxisScore {
        dimension: Dimension::Vocal,
        value,
        label,
    }
}

fn build_reasoning(
    axes: &[AxisScore; 4],
    weights: &FlowWeightSettings,
    quality: f64,
    worst: Option<&AxisScore>,
    vocal_warning: Option<&str>,
) -> Vec<ForensicVerdictEntry> {
    let mut entries = Vec::with_capacity(axes.len() * 3 + 2);

    for axis in axes {
        entries.push(ForensicVerdictEntry::section(axis.dimension.title()));
        entries.push(if axis.value >= 0.8 {
            ForensicVerdictEntry::success(&axis.label)
        } else if axis.value >= PROBLEM_THRESHOLD {
            ForensicVerdictEntry::bullet(&axis.label)
        } else {
            ForensicVerdictEntry::warning(&axis.label)
        });
        if axis.dimension == Dimension::Vocal {
            if let Some(warning) = vocal_warning {
                entries.push(ForensicVerdictEntry::warning(warning));
            }
        }
        entries.push(ForensicVerdictEntry::detail(format!(
            "score {:.2} × weight {:.1}",
            axis.value,
            axis.dimension.weight(weights)
        )));
    }

    // Blame only a dimension that counted toward the severity.
    let severity = severity_from_quality(quality);
    let verdict = match (SeverityLevel::from_score(severity), worst) {
        (SeverityLevel::Healthy, _) | (_, None) => "STABLE FLOW".to_string(),
        (SeverityLevel::Warning, Some(axis)) => format!("FRAGILE: {}", axis.label),
        (SeverityLevel::Critical, Some(axis)) => format!("LIKELY TO FAIL: {}", axis.label),
    };
    entries.push(ForensicVerdictEntry::section("VERDICT"));
    entries.push(ForensicVerdictEntry::verdict(verdict));

    entries
}
