//! Identity matching by Euclidean distance against the gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, Label, MatchResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How to pick among several identities within tolerance of the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// First identity in gallery order whose first in-tolerance vector
    /// clears the confidence floor. Not necessarily the closest.
    #[default]
    FirstMatch,
    /// Globally closest in-tolerance vector across all identities.
    NearestMatch,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" | "first_match" => Ok(MatchPolicy::FirstMatch),
            "nearest" | "nearest_match" => Ok(MatchPolicy::NearestMatch),
            other => Err(format!("unknown match policy: {other} (expected first or nearest)")),
        }
    }
}

/// Strategy for resolving a query embedding against the gallery.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery) -> MatchResult;
}

/// Tolerance-gated Euclidean matcher.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    /// Maximum distance for a reference vector to make its identity a candidate.
    pub tolerance: f32,
    /// Confidence must be strictly greater than this to accept a candidate.
    pub min_confidence: f32,
    pub policy: MatchPolicy,
}

impl DistanceMatcher {
    pub fn new(tolerance: f32, min_confidence: f32, policy: MatchPolicy) -> Self {
        Self {
            tolerance,
            min_confidence,
            policy,
        }
    }

    fn first_match(&self, query: &Embedding, gallery: &Gallery) -> MatchResult {
        for identity in gallery.identities() {
            let Some(distance) = identity
                .vectors
                .iter()
                .filter_map(|v| query.euclidean_distance(v))
                .find(|&d| d <= self.tolerance)
            else {
                continue;
            };

            let confidence = confidence(distance);
            if confidence > self.min_confidence {
                return MatchResult {
                    label: Label::Known(identity.name.clone()),
                    confidence,
                };
            }
        }
        MatchResult::unknown()
    }

    fn nearest_match(&self, query: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best: Option<(&str, f32)> = None;

        for identity in gallery.identities() {
            for v in &identity.vectors {
                let Some(distance) = query.euclidean_distance(v) else {
                    continue;
                };
                if distance > self.tolerance {
                    continue;
                }
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((identity.name.as_str(), distance));
                }
            }
        }

        match best {
            Some((name, distance)) if confidence(distance) > self.min_confidence => MatchResult {
                label: Label::Known(name.to_string()),
                confidence: confidence(distance),
            },
            _ => MatchResult::unknown(),
        }
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery) -> MatchResult {
        match self.policy {
            MatchPolicy::FirstMatch => self.first_match(query, gallery),
            MatchPolicy::NearestMatch => self.nearest_match(query, gallery),
        }
    }
}

fn confidence(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}
