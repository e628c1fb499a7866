//! Moderation labels returned by the classification oracle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A detected content category with its confidence (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationLabel {
    pub name: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_category: Option<String>,
}

impl ModerationLabel {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
            parent_category: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_category = Some(parent.into());
        self
    }
}

/// A label observed at a point in a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDetection {
    pub timestamp_ms: i64,
    pub label: ModerationLabel,
}

/// Collapse labels by name, keeping the highest confidence seen for each.
///
/// Output is ordered by confidence (highest first), then by name.
pub fn dedupe_labels<I>(labels: I) -> Vec<ModerationLabel>
where
    I: IntoIterator<Item = ModerationLabel>,
{
    let mut by_name: HashMap<String, ModerationLabel> = HashMap::new();
    for label in labels {
        match by_name.get_mut(&label.name) {
            Some(existing) if existing.confidence >= label.confidence => {}
            Some(existing) => *existing = label,
            None => {
                by_name.insert(label.name.clone(), label);
            }
        }
    }

    let mut deduped: Vec<ModerationLabel> = by_name.into_values().collect();
    deduped.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.name.cmp(&b.name))
    });
    deduped
}

/// Highest confidence across `labels`, or `None` when there are no labels.
pub fn max_confidence<'a, I>(labels: I) -> Option<f32>
where
    I: IntoIterator<Item = &'a ModerationLabel>,
{
    labels
        .into_iter()
        .map(|l| l.confidence)
        .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |m| m.max(c))))
}
