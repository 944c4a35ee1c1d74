//! Feature preparation for the shot-quality model.

use crate::codec::Shot;
use std::collections::BTreeMap;

/// Feature key for the shot's distance to goal.
pub const DISTANCE_TO_GOAL: &str = "distance_to_goal";

/// Feature key for the shot's angle to goal.
pub const ANGLE_TO_GOAL: &str = "angle_to_goal";

/// Named numeric features consumed by the scoring model.
///
/// Keys are fixed by [`extract`]; ordering is irrelevant to scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a feature value.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Number of features present.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate features in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

/// Map a decoded shot to the model's feature vector.
///
/// Pure and total over any [`Shot`]. New model inputs are added here as
/// the feature set evolves.
pub fn extract(shot: &Shot) -> FeatureVector {
    let mut features = FeatureVector::new();
    features.insert(DISTANCE_TO_GOAL, shot.distance_to_goal);
    features.insert(ANGLE_TO_GOAL, shot.angle_to_goal);
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_extract_yields_exactly_the_shot_attributes() {
        let shot = Shot {
            distance_to_goal: 5.1,
            angle_to_goal: 1.2,
        };

        let features = extract(&shot);

        assert_eq!(features.len(), 2);
        assert_eq!(features.get(DISTANCE_TO_GOAL), Some(5.1));
        assert_eq!(features.get(ANGLE_TO_GOAL), Some(1.2));
    }

    #[test]
    fn test_decode_then_extract_preserves_values() {
        // {"shot": {"distance_to_goal": 5.1, "angle_to_goal": 1.2}, "shot_id": 123}
        let event = codec::decode(
            "eyJzaG90IjogeyJkaXN0YW5jZV90b19nb2FsIjogNS4xLCAiYW5nbGVfdG9fZ29hbCI6IDEuMn0sICJzaG90X2lkIjogMTIzfQ==",
        )
        .unwrap();

        let features = extract(&event.shot);

        assert_eq!(features.get(DISTANCE_TO_GOAL), Some(5.1));
        assert_eq!(features.get(ANGLE_TO_GOAL), Some(1.2));
    }

    #[test]
    fn test_insert_replaces_existing_value() {
        let mut features = FeatureVector::new();
        features.insert(DISTANCE_TO_GOAL, 1.0);
        features.insert(DISTANCE_TO_GOAL, 2.0);

        assert_eq!(features.len(), 1);
        assert_eq!(features.get(DISTANCE_TO_GOAL), Some(2.0));
    }

    #[test]
    fn test_iter_is_key_ordered() {
        let shot = Shot {
            distance_to_goal: 5.1,
            angle_to_goal: 1.2,
        };

        let features = extract(&shot);
        let keys: Vec<&str> = features.iter().map(|(name, _)| name).collect();

        assert_eq!(keys, vec![ANGLE_TO_GOAL, DISTANCE_TO_GOAL]);
    }
}
