use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recognition::domain::embedding::{min_distance, Embedding};

/// Starting "best distance" for a match scan. A cosine distance of 1.0
/// means orthogonal embeddings, i.e. no similarity at all.
pub const SENTINEL_DISTANCE: f64 = 1.0;

#[derive(Error, Debug, PartialEq)]
pub enum IdentityDatabaseError {
    #[error("identity {label:?} mixes embedding lengths {expected} and {found}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("identity {0:?} appears more than once")]
    DuplicateLabel(String),
}

/// One enrolled person: a label and one embedding per usable reference image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub label: String,
    pub embeddings: Vec<Embedding>,
}

/// Ordered identity → embeddings mapping.
///
/// Enrollment order is kept because it decides ties in [`match_embedding`]:
/// among identities at exactly the same minimum distance, the earliest wins.
///
/// [`match_embedding`]: IdentityDatabase::match_embedding
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityDatabase {
    identities: Vec<IdentityRecord>,
}

impl IdentityDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an identity. An empty embedding list is dropped silently since
    /// identities without usable images are not enrolled.
    pub fn insert(
        &mut self,
        label: impl Into<String>,
        embeddings: Vec<Embedding>,
    ) -> Result<(), IdentityDatabaseError> {
        let label = label.into();
        if embeddings.is_empty() {
            return Ok(());
        }
        if self.get(&label).is_some() {
            return Err(IdentityDatabaseError::DuplicateLabel(label));
        }
        let record = IdentityRecord { label, embeddings };
        check_dimensions(&record)?;
        self.identities.push(record);
        Ok(())
    }

    /// Checks every invariant a freshly deserialized database must satisfy.
    pub fn validate(&self) -> Result<(), IdentityDatabaseError> {
        for (i, record) in self.identities.iter().enumerate() {
            check_dimensions(record)?;
            if self.identities[..i].iter().any(|r| r.label == record.label) {
                return Err(IdentityDatabaseError::DuplicateLabel(record.label.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&IdentityRecord> {
        self.identities.iter().find(|r| r.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.identities.iter()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.identities.iter().map(|r| r.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Identity with the globally smallest per-identity minimum distance
    /// below [`SENTINEL_DISTANCE`], scanning in enrollment order.
    pub fn nearest(&self, query: &[f32]) -> Option<(&str, f64)> {
        let mut best: Option<&str> = None;
        let mut best_distance = SENTINEL_DISTANCE;
        for record in &self.identities {
            let d = min_distance(&record.embeddings, query);
            if d < best_distance {
                best = Some(&record.label);
                best_distance = d;
            }
        }
        best.map(|label| (label, best_distance))
    }

    /// Label of the nearest identity if its distance is strictly below
    /// `threshold`, otherwise `None`.
    pub fn match_embedding(&self, query: &[f32], threshold: f64) -> Option<&str> {
        self.nearest(query)
            .filter(|(_, distance)| *distance < threshold)
            .map(|(label, _)| label)
    }
}

fn check_dimensions(record: &IdentityRecord) -> Result<(), IdentityDatabaseError> {
    let Some(first) = record.embeddings.first() else {
        return Ok(());
    };
    let expected = first.len();
    match record.embeddings.iter().find(|e| e.len() != expected) {
        Some(bad) => Err(IdentityDatabaseError::DimensionMismatch {
            label: record.label.clone(),
            expected,
            found: bad.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn db(entries: &[(&str, Vec<Embedding>)]) -> IdentityDatabase {
        let mut db = IdentityDatabase::new();
        for (label, embeddings) in entries {
            db.insert(*label, embeddings.clone()).unwrap();
        }
        db
    }

    /// Unit vector at cosine similarity `cos` to `[1, 0]`.
    fn at_cos(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_exact_embedding_matches_with_any_positive_threshold() {
        let v = vec![0.6, 0.8, 0.0];
        let db = db(&[("alice", vec![v.clone()])]);
        assert_eq!(db.match_embedding(&v, 1e-9), Some("alice"));
    }

    #[rstest]
    #[case::typical_same_person(0.86, 0.5, Some("alice"))]
    #[case::weak_but_under_loose_threshold(0.45, 0.6, Some("alice"))]
    #[case::just_over_threshold(0.49, 0.5, None)]
    #[case::beyond_threshold(0.3, 0.5, None)]
    fn test_match_depends_on_cosine_similarity(
        #[case] cos: f32,
        #[case] threshold: f64,
        #[case] expected: Option<&str>,
    ) {
        let db = db(&[("alice", vec![vec![1.0, 0.0]])]);
        assert_eq!(db.match_embedding(&at_cos(cos), threshold), expected);
    }

    #[test]
    fn test_nearest_identity_wins_when_both_under_threshold() {
        let db = db(&[
            ("alice", vec![at_cos(1.0), at_cos(0.99)]),
            ("bob", vec![at_cos(0.8), at_cos(0.78)]),
        ]);
        // Query sits between the clusters; both are within the threshold
        assert_eq!(db.match_embedding(&at_cos(0.95), 0.5), Some("alice"));
        assert_eq!(db.match_embedding(&at_cos(0.82), 0.5), Some("bob"));
    }

    #[test]
    fn test_min_over_enrollment_images_is_used() {
        // bob has one outlier image far away but one image very close
        let db = db(&[
            ("alice", vec![at_cos(0.9)]),
            ("bob", vec![vec![0.0, -1.0], at_cos(0.999)]),
        ]);
        assert_eq!(db.nearest(&[1.0, 0.0]).map(|(l, _)| l), Some("bob"));
    }

    #[test]
    fn test_tie_keeps_earliest_identity() {
        let db = db(&[("first", vec![vec![0.9, 0.1]]), ("second", vec![vec![0.9, -0.1]])]);
        assert_eq!(db.match_embedding(&[1.0, 0.0], 0.5), Some("first"));
    }

    #[test]
    fn test_sentinel_caps_distance_regardless_of_threshold() {
        let db = db(&[("alice", vec![vec![1.0, 0.0]])]);
        // Slightly anti-correlated: distance 1.1, past the 1.0 sentinel
        assert_eq!(db.match_embedding(&at_cos(-0.1), 2.0), None);
        assert_eq!(db.match_embedding(&at_cos(0.1), 2.0), Some("alice"));
    }

    #[test]
    fn test_empty_database_matches_nothing() {
        assert_eq!(IdentityDatabase::new().match_embedding(&[0.0], 0.5), None);
    }

    #[test]
    fn test_insert_skips_identity_without_embeddings() {
        let mut db = IdentityDatabase::new();
        db.insert("ghost", vec![]).unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_insert_rejects_mixed_dimensions() {
        let mut db = IdentityDatabase::new();
        let err = db.insert("alice", vec![vec![0.0; 3], vec![0.0; 4]]).unwrap_err();
        assert_eq!(
            err,
            IdentityDatabaseError::DimensionMismatch {
                label: "alice".into(),
                expected: 3,
                found: 4
            }
        );
    }

    #[test]
    fn test_insert_rejects_duplicate_label() {
        let mut db = db(&[("alice", vec![vec![0.0]])]);
        assert!(matches!(
            db.insert("alice", vec![vec![1.0]]),
            Err(IdentityDatabaseError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let original = db(&[("zed", vec![vec![0.5, 0.5]]), ("amy", vec![vec![0.1, 0.2]])]);
        let json = serde_json::to_string(&original).unwrap();
        let restored: IdentityDatabase = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.labels(), vec!["zed", "amy"]);
    }

    #[test]
    fn test_validate_catches_tampered_cache() {
        let json = r#"{"identities":[{"label":"a","embeddings":[[0.0,1.0],[0.0]]}]}"#;
        let restored: IdentityDatabase = serde_json::from_str(json).unwrap();
        assert!(restored.validate().is_err());
    }
}
