//! Query result models.
//!
//! `Match` is the typed ranking output of the query service.
//! `SearchOutcome` is the wire shape returned to callers: a status
//! discriminator plus either ranked cases or a structured error.

use crate::error::Error;
use serde::Serialize;

use super::item::{keys, Metadata, DEFAULT_PROVENANCE, UNKNOWN_DIAGNOSIS};

/// Note attached to every returned case.
pub const MATCH_NOTE: &str =
    "Visual match based on tissue architecture and morphological features.";

/// Convert a cosine distance into a similarity percentage.
///
/// Floored at 0, never capped above 100.
#[must_use]
pub fn similarity_from_distance(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).max(0.0)
}

/// One ranked nearest neighbour.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// 1-based rank (ascending distance)
    pub rank: usize,
    pub id: String,
    pub category: String,
    /// Similarity percentage, see [`similarity_from_distance`]
    pub similarity: f32,
    /// Raw cosine distance reported by the store
    pub distance: f32,
    pub metadata: Metadata,
}

impl Match {
    fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Serialized form of a [`Match`].
#[derive(Debug, Clone, Serialize)]
pub struct CaseView {
    pub rank: usize,
    pub diagnosis: String,
    pub similarity_score: String,
    pub distance: String,
    pub image_path: String,
    pub filename: String,
    pub source: String,
    pub note: String,
}

impl From<&Match> for CaseView {
    fn from(m: &Match) -> Self {
        Self {
            rank: m.rank,
            diagnosis: if m.category.is_empty() {
                UNKNOWN_DIAGNOSIS.to_string()
            } else {
                m.category.clone()
            },
            similarity_score: format!("{:.2}%", m.similarity),
            distance: format!("{:.4}", m.distance),
            image_path: m.meta(keys::IMAGE_PATH).unwrap_or_default().to_string(),
            filename: m.meta(keys::FILENAME).unwrap_or_default().to_string(),
            source: m.meta(keys::SOURCE).unwrap_or(DEFAULT_PROVENANCE).to_string(),
            note: MATCH_NOTE.to_string(),
        }
    }
}

/// Result envelope returned by the query entrypoints.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "query_status", rename_all = "lowercase")]
pub enum SearchOutcome {
    Success {
        total_results: usize,
        cases: Vec<CaseView>,
    },
    Error {
        error: String,
        error_kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        input_preview: Option<String>,
    },
}

impl SearchOutcome {
    /// Wrap ranked matches.
    #[must_use]
    pub fn success(matches: &[Match]) -> Self {
        Self::Success {
            total_results: matches.len(),
            cases: matches.iter().map(CaseView::from).collect(),
        }
    }

    /// Wrap a failure; `input_preview` is only attached for probe failures.
    #[must_use]
    pub fn failure(err: &Error, input_preview: Option<String>) -> Self {
        Self::Error {
            error: err.to_string(),
            error_kind: err.error_code().as_str().to_string(),
            stage: err.stage().map(str::to_string),
            hint: err.hint(),
            input_preview,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match(distance: f32) -> Match {
        let mut metadata = Metadata::new();
        metadata.insert("image_path".into(), "/atlas/TUM/a.png".into());
        metadata.insert("filename".into(), "a.png".into());
        metadata.insert("source".into(), "Internal Atlas".into());
        Match {
            rank: 1,
            id: "TUM_a.png".into(),
            category: "TUM".into(),
            similarity: similarity_from_distance(distance),
            distance,
            metadata,
        }
    }

    #[test]
    fn test_similarity_floor_and_monotonicity() {
        assert!((similarity_from_distance(0.0) - 100.0).abs() < 1e-4);
        assert!((similarity_from_distance(0.25) - 75.0).abs() < 1e-4);
        assert_eq!(similarity_from_distance(1.5), 0.0);
        assert_eq!(similarity_from_distance(2.0), 0.0);
        // Degenerate negative distance is allowed to exceed 100
        assert!(similarity_from_distance(-0.1) > 100.0);

        let distances = [0.0_f32, 0.1, 0.4, 0.9, 1.0, 1.3, 2.0];
        for pair in distances.windows(2) {
            let (a, b) = (similarity_from_distance(pair[0]), similarity_from_distance(pair[1]));
            assert!(a >= b);
            assert!(b >= 0.0);
        }
    }

    #[test]
    fn test_case_view_formatting() {
        let view = CaseView::from(&sample_match(0.16884));
        assert_eq!(view.diagnosis, "TUM");
        assert_eq!(view.similarity_score, "83.12%");
        assert_eq!(view.distance, "0.1688");
        assert_eq!(view.filename, "a.png");
        assert_eq!(view.note, MATCH_NOTE);
    }

    #[test]
    fn test_case_view_missing_fields_use_defaults() {
        let mut m = sample_match(0.3);
        m.category = String::new();
        m.metadata.clear();

        let view = CaseView::from(&m);
        assert_eq!(view.diagnosis, UNKNOWN_DIAGNOSIS);
        assert_eq!(view.source, DEFAULT_PROVENANCE);
        assert_eq!(view.filename, "");
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = SearchOutcome::success(&[sample_match(0.2)]);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["query_status"], "success");
        assert_eq!(json["total_results"], 1);
        assert_eq!(json["cases"][0]["rank"], 1);

        let err = SearchOutcome::failure(&Error::EmptyIndex { collection: "c".into() }, None);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["query_status"], "error");
        assert_eq!(json["error_kind"], "EMPTY_INDEX");
        assert_eq!(json["stage"], "index");
        assert!(json.get("input_preview").is_none());
    }
}
