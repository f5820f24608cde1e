use serde::{Deserialize, Serialize};

use crate::registry::RegistryEntry;

/// Face descriptor (embedding) produced by the extraction capability.
///
/// Immutable once produced: the values are only reachable through a slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Dimensionality of the embedding.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Symmetric and non-negative. Smaller = more similar.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values()
            .iter()
            .zip(other.values())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Result of matching a probe descriptor against the registry.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    /// Nearest enrolled entry, `None` when nothing in the registry is matchable.
    pub entry: Option<&'a RegistryEntry>,
    /// Distance to `entry`; `f32::INFINITY` when `entry` is `None`.
    pub distance: f32,
}

impl<'a> MatchResult<'a> {
    pub fn none() -> Self {
        Self {
            entry: None,
            distance: f32::INFINITY,
        }
    }

    /// The matched entry, only if it is strictly closer than `threshold`.
    ///
    /// A distance equal to the threshold is rejected.
    pub fn accepted(&self, threshold: f32) -> Option<&'a RegistryEntry> {
        self.entry.filter(|_| self.distance < threshold)
    }
}

/// Displayed confidence in percent: `round((1 - distance) * 100)`, clamped to 0..=100.
pub fn confidence_percent(distance: f32) -> u8 {
    if !distance.is_finite() {
        return 0;
    }
    ((1.0 - distance) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Strategy for finding the nearest registry entry to a probe descriptor.
pub trait Matcher {
    fn best_match<'a>(&self, probe: &Descriptor, registry: &'a [RegistryEntry]) -> MatchResult<'a>;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Linear scan in registry order; on equal distances the first entry wins.
/// Entries without a descriptor, or with a descriptor of a different
/// dimensionality than the probe, are never candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match<'a>(&self, probe: &Descriptor, registry: &'a [RegistryEntry]) -> MatchResult<'a> {
        let mut best = MatchResult::none();

        for entry in registry {
            let Some(reference) = entry.descriptor.as_ref() else {
                continue;
            };
            if reference.len() != probe.len() {
                tracing::warn!(
                    id = entry.id,
                    expected = probe.len(),
                    actual = reference.len(),
                    "descriptor dimensionality mismatch; entry skipped"
                );
                continue;
            }

            let distance = probe.euclidean_distance(reference);
            if distance < best.distance {
                best = MatchResult {
                    entry: Some(entry),
                    distance,
                };
            }
        }

        best
    }
}
