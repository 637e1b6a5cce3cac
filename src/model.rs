use serde::{Deserialize, Serialize};

use crate::scoring::camelot::CamelotKey;

/// How much vocal material a track carries across its mixable sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VocalType {
    #[default]
    Instrumental,
    SparseVocals,
    HookOnly,
    FullLyrics,
}

impl VocalType {
    /// Relative vocal presence in [0, 1] used by the collision model.
    pub fn presence(self) -> f64 {
        match self {
            Self::Instrumental => 0.0,
            Self::SparseVocals => 0.35,
            Self::HookOnly => 0.6,
            Self::FullLyrics => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Instrumental => "instrumental",
            Self::SparseVocals => "sparse vocals",
            Self::HookOnly => "vocal hook",
            Self::FullLyrics => "full lyrics",
        }
    }
}

/// Normalized per-track attributes consumed by the scorer.
/// Produced upstream by feature extraction; never mutated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeatureVector {
    pub bpm: f64,
    /// Tempo steadiness in [0, 1]; 1.0 = quantized grid.
    #[serde(default = "default_stability")]
    pub bpm_stability: f64,
    #[serde(default, rename = "key")]
    pub camelot_key: Option<CamelotKey>,
    pub energy: f64,
    #[serde(default)]
    pub vocal_type: VocalType,
    /// Where the incoming vocal lands relative to the blend start.
    #[serde(default)]
    pub manual_offset_seconds: f64,
}

fn default_stability() -> f64 {
    1.0
}

/// A track as it appears in a set: identity plus its feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTrack {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(flatten)]
    pub features: TrackFeatureVector,
}

impl SetTrack {
    /// Human-readable label: "Artist - Title", falling back to title, then id.
    pub fn label(&self) -> String {
        match (&self.artist, self.title.is_empty()) {
            (Some(artist), false) => format!("{artist} - {}", self.title),
            (None, false) => self.title.clone(),
            _ => self.id.clone(),
        }
    }
}

/// The energy shape the set is meant to follow through a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnergyArc {
    /// No intended direction; small moves either way are fine.
    #[default]
    Free,
    Build,
    Sustain,
    Release,
}

/// Named weights for each scoring dimension, owned by the set being edited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowWeightSettings {
    pub harmonic: f64,
    pub tempo: f64,
    pub energy: f64,
    pub vocal: f64,
    pub arc: EnergyArc,
}

impl Default for FlowWeightSettings {
    fn default() -> Self {
        Self {
            harmonic: 1.0,
            tempo: 1.0,
            energy: 0.5,
            vocal: 1.0,
            arc: EnergyArc::Free,
        }
    }
}

impl FlowWeightSettings {
    pub fn total(&self) -> f64 {
        self.harmonic + self.tempo + self.energy + self.vocal
    }

    /// Weights usable for a weighted mean: all finite, none negative, sum > 0.
    pub fn is_usable(&self) -> bool {
        self.unusable_reason().is_none()
    }

    /// Why these weights can't drive a weighted mean, if they can't.
    pub fn unusable_reason(&self) -> Option<&'static str> {
        let all = [self.harmonic, self.tempo, self.energy, self.vocal];
        if !all.iter().all(|w| w.is_finite() && *w >= 0.0) {
            Some("flow weights must be finite and non-negative")
        } else if self.total() <= 0.0 {
            Some("all flow weights are zero")
        } else {
            None
        }
    }
}

/// Severity score at or above which a transition is a Warning.
pub const WARNING_THRESHOLD: f64 = 40.0;
/// Severity score at or above which a transition is Critical.
pub const CRITICAL_THRESHOLD: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Healthy,
    Warning,
    Critical,
}

impl SeverityLevel {
    /// Healthy < 40 <= Warning < 75 <= Critical.
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_THRESHOLD {
            Self::Critical
        } else if score >= WARNING_THRESHOLD {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Display color for health bar segments.
    pub fn color(self) -> &'static str {
        match self {
            Self::Healthy => "#2ecc71",
            Self::Warning => "#f39c12",
            Self::Critical => "#e74c3c",
        }
    }
}
