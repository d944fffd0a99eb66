//! Council members and their standing.

use serde::{Deserialize, Serialize};

/// One voting member of a council.
///
/// `reliability` and `accuracy` are standing scores in `0..=1`; their mean
/// becomes the member's vote weight for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilAgent {
    pub id: String,
    pub name: String,
    /// The lens this member argues from, e.g. "privacy advocate".
    #[serde(default)]
    pub perspective: String,
    #[serde(default = "default_score")]
    pub reliability: f64,
    #[serde(default = "default_score")]
    pub accuracy: f64,
}

fn default_score() -> f64 {
    0.5
}

impl CouncilAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            perspective: String::new(),
            reliability: default_score(),
            accuracy: default_score(),
        }
    }

    pub fn with_perspective(mut self, perspective: impl Into<String>) -> Self {
        self.perspective = perspective.into();
        self
    }

    pub fn with_scores(mut self, reliability: f64, accuracy: f64) -> Self {
        self.reliability = reliability;
        self.accuracy = accuracy;
        self
    }

    /// Vote weight: mean of the two standing scores, clamped to `0..=1`.
    /// Non-finite scores count as zero.
    pub fn weight(&self) -> f64 {
        let finite = |x: f64| if x.is_finite() { x } else { 0.0 };
        ((finite(self.reliability) + finite(self.accuracy)) / 2.0).clamp(0.0, 1.0)
    }

    /// `name (perspective)`, or just the name.
    pub fn label(&self) -> String {
        if self.perspective.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.perspective)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_is_clamped_mean() {
        assert!((CouncilAgent::new("a", "A").with_scores(0.9, 0.7).weight() - 0.8).abs() < 1e-9);
        assert_eq!(CouncilAgent::new("a", "A").with_scores(1.5, 2.0).weight(), 1.0);
        assert_eq!(CouncilAgent::new("a", "A").with_scores(f64::NAN, -1.0).weight(), 0.0);
    }

    #[test]
    fn test_deserialize_defaults_scores() {
        let agent: CouncilAgent = serde_json::from_str(r#"{"id":"x","name":"X"}"#).unwrap();
        assert_eq!(agent.weight(), 0.5);
        assert_eq!(agent.label(), "X");
    }
}
