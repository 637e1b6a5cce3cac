//! Track library lookups and the JSON files the CLI reads sets from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FlowWeightSettings, SetTrack};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Duplicate track id \"{0}\" in library")]
    DuplicateId(String),
    #[error("Unknown track id \"{0}\"")]
    UnknownTrack(String),
    #[error("Cannot insert at position {position} in a {len}-track set")]
    BadPosition { position: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// Resolves track ids to their feature vectors.
pub trait TrackLibrary: Send + Sync {
    fn lookup(&self, id: &str) -> Option<&SetTrack>;

    /// Every track, in library order.
    fn tracks(&self) -> &[SetTrack];
}

#[derive(Debug, Default)]
pub struct InMemoryLibrary {
    tracks: Vec<SetTrack>,
    by_id: HashMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct LibraryFile {
    tracks: Vec<SetTrack>,
}

impl InMemoryLibrary {
    pub fn new(tracks: Vec<SetTrack>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            if by_id.insert(track.id.clone(), i).is_some() {
                return Err(LibraryError::DuplicateId(track.id.clone()));
            }
        }
        Ok(Self { tracks, by_id })
    }

    /// Parse a library document: `{ "tracks": [ ... ] }`.
    pub fn from_json_str(json: &str, origin: &Path) -> Result<Self> {
        let file: LibraryFile = serde_json::from_str(json).map_err(|source| LibraryError::Json {
            path: origin.to_path_buf(),
            source,
        })?;
        Self::new(file.tracks)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = read(path)?;
        let library = Self::from_json_str(&json, path)?;
        log::info!("Loaded {} tracks from {}", library.len(), path.display());
        Ok(library)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl TrackLibrary for InMemoryLibrary {
    fn lookup(&self, id: &str) -> Option<&SetTrack> {
        self.by_id.get(id).map(|&i| &self.tracks[i])
    }

    fn tracks(&self) -> &[SetTrack] {
        &self.tracks
    }
}

/// An ordered set of track ids plus the weights it is scored with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetFile {
    pub name: String,
    pub tracks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<FlowWeightSettings>,
}

impl SetFile {
    pub fn from_json_str(json: &str, origin: &Path) -> Result<Self> {
        serde_json::from_str(json).map_err(|source| LibraryError::Json {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&read(path)?, path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| LibraryError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json + "\n").map_err(|source| LibraryError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| LibraryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve a set's ids to tracks, failing on the first unknown id.
pub fn resolve_set<L: TrackLibrary + ?Sized>(library: &L, ids: &[String]) -> Result<Vec<SetTrack>> {
    ids.iter()
        .map(|id| {
            library
                .lookup(id)
                .cloned()
                .ok_or_else(|| LibraryError::UnknownTrack(id.clone()))
        })
        .collect()
}

/// Insert `id` so it ends up at `position`; `position == len` appends.
pub fn splice_track(ids: &mut Vec<String>, position: usize, id: &str) -> Result<()> {
    if position > ids.len() {
        return Err(LibraryError::BadPosition {
            position,
            len: ids.len(),
        });
    }
    ids.insert(position, id.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VocalType;

    const LIBRARY_JSON: &str = r#"{
        "tracks": [
            {"id": "t1", "title": "Opener", "artist": "DJ A", "bpm": 124, "key": "8A", "energy": 0.5},
            {"id": "t2", "title": "Lift", "bpm": 126.5, "bpm_stability": 0.8, "key": "Em",
             "energy": 0.7, "vocal_type": "hook_only", "manual_offset_seconds": 8},
            {"id": "t3", "title": "Keyless", "bpm": 128, "energy": 0.9, "vocal_type": "full_lyrics"}
        ]
    }"#;

    fn library() -> InMemoryLibrary {
        InMemoryLibrary::from_json_str(LIBRARY_JSON, Path::new("library.json")).unwrap()
    }

    #[test]
    fn test_library_parse() {
        let lib = library();
        assert_eq!(lib.len(), 3);

        let t1 = lib.lookup("t1").unwrap();
        assert_eq!(t1.label(), "DJ A - Opener");
        assert_eq!(t1.features.bpm, 124.0);
        assert_eq!(t1.features.bpm_stability, 1.0);
        assert_eq!(t1.features.vocal_type, VocalType::Instrumental);

        let t2 = lib.lookup("t2").unwrap();
        assert_eq!(t2.features.camelot_key.unwrap().to_string(), "9A");
        assert_eq!(t2.features.vocal_type, VocalType::HookOnly);
        assert_eq!(t2.features.manual_offset_seconds, 8.0);

        assert!(lib.lookup("t3").unwrap().features.camelot_key.is_none());
        assert!(lib.lookup("missing").is_none());
    }

    #[test]
    fn test_bad_key_is_a_load_error() {
        let json = r#"{"tracks": [{"id": "x", "bpm": 120, "key": "Q#", "energy": 0.5}]}"#;
        let err = InMemoryLibrary::from_json_str(json, Path::new("lib.json")).unwrap_err();
        assert!(matches!(err, LibraryError::Json { .. }));
        assert!(err.to_string().contains("lib.json"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"{"tracks": [
            {"id": "x", "bpm": 120, "energy": 0.5},
            {"id": "x", "bpm": 122, "energy": 0.6}
        ]}"#;
        let err = InMemoryLibrary::from_json_str(json, Path::new("lib.json")).unwrap_err();
        assert!(matches!(err, LibraryError::DuplicateId(id) if id == "x"));
    }

    #[test]
    fn test_resolve_set() {
        let lib = library();
        let ids = vec!["t2".to_string(), "t1".to_string()];
        let tracks = resolve_set(&lib, &ids).unwrap();
        assert_eq!(tracks[0].id, "t2");
        assert_eq!(tracks[1].id, "t1");

        let bad = vec!["t1".to_string(), "nope".to_string()];
        let err = resolve_set(&lib, &bad).unwrap_err();
        assert!(matches!(err, LibraryError::UnknownTrack(id) if id == "nope"));
    }

    #[test]
    fn test_splice_track() {
        let mut ids = vec!["a".to_string(), "c".to_string()];
        splice_track(&mut ids, 1, "b").unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);
        splice_track(&mut ids, 3, "d").unwrap();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(matches!(
            splice_track(&mut ids, 9, "z"),
            Err(LibraryError::BadPosition { position: 9, len: 4 })
        ));
    }

    #[test]
    fn test_set_file_parse() {
        let json = r#"{"name": "friday", "tracks": ["t1", "t2"], "weights": {"vocal": 2.0}}"#;
        let set = SetFile::from_json_str(json, Path::new("friday.json")).unwrap();
        assert_eq!(set.tracks.len(), 2);
        let weights = set.weights.unwrap();
        assert_eq!(weights.vocal, 2.0);
        assert_eq!(weights.harmonic, 1.0);

        let bare = SetFile::from_json_str(r#"{"name": "x", "tracks": []}"#, Path::new("x.json")).unwrap();
        assert!(bare.weights.is_none());
    }
}
