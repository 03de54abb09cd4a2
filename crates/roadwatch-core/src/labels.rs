//! The fixed label vocabulary and per-frame counts over it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::vision::Detection;

/// Labels counted when no vocabulary is configured.
pub const DEFAULT_LABELS: &[&str] = &["car", "person", "truck", "bus", "motorbike", "ambulance"];

/// Set of class labels of interest, plus optional aliases from detector
/// class names. Class names that match neither are not counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
    aliases: HashMap<String, String>,
}

impl LabelVocabulary {
    /// Build a vocabulary. Duplicate labels are collapsed; aliases whose
    /// target is not a vocabulary label are dropped.
    pub fn new<L, A>(labels: L, aliases: A) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        A: IntoIterator<Item = (String, String)>,
    {
        let mut uniq: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !uniq.contains(&label) {
                uniq.push(label);
            }
        }
        let aliases = aliases
            .into_iter()
            .filter(|(_, target)| uniq.contains(target))
            .collect();
        Self {
            labels: uniq,
            aliases,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Map a detector class name to the vocabulary label it counts toward.
    pub fn resolve(&self, class_name: &str) -> Option<&str> {
        if let Some(label) = self.labels.iter().find(|l| l.as_str() == class_name) {
            return Some(label.as_str());
        }
        self.aliases.get(class_name).map(String::as_str)
    }
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS.iter().copied(), std::iter::empty())
    }
}

/// Per-frame counts. Always holds every vocabulary label as a key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameCounts(BTreeMap<String, u32>);

impl FrameCounts {
    pub fn zeroed(vocab: &LabelVocabulary) -> Self {
        Self(vocab.labels().iter().map(|l| (l.clone(), 0)).collect())
    }

    /// Count the detections of one frame. Labels outside the vocabulary are
    /// ignored.
    pub fn tally(vocab: &LabelVocabulary, detections: &[Detection]) -> Self {
        let mut counts = Self::zeroed(vocab);
        for det in detections {
            if let Some(label) = vocab.resolve(&det.label) {
                if let Some(n) = counts.0.get_mut(label) {
                    *n = n.saturating_add(1);
                }
            }
        }
        counts
    }

    pub fn get(&self, label: &str) -> Option<u32> {
        self.0.get(label).copied()
    }

    pub fn total(&self) -> u64 {
        self.0.values().map(|&n| u64::from(n)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
