//! Ordered text normalization pipeline

use serde::{Deserialize, Serialize};

/// A named normalization step, configured by its snake_case name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessingStep {
    /// Lowercase everything
    Lowercase,
    /// Replace ASCII punctuation with spaces
    RemovePunctuation,
    /// Replace digits with spaces
    RemoveNumbers,
    /// Drop common English stopwords
    RemoveStopwords,
    /// Drop tokens shorter than three characters
    RemoveShortTokens,
    /// Collapse runs of whitespace and trim
    CollapseWhitespace,
}

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "but", "by", "can", "for", "from", "had", "has", "have", "if", "in", "into", "is",
    "it", "its", "may", "no", "not", "of", "on", "or", "other", "such", "that", "the", "their",
    "then", "there", "these", "this", "those", "to", "under", "upon", "was", "were", "which",
    "who", "will", "with",
];

impl PreprocessingStep {
    fn apply(self, text: &str) -> String {
        match self {
            Self::Lowercase => text.to_lowercase(),
            Self::RemovePunctuation => text
                .chars()
                .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
                .collect(),
            Self::RemoveNumbers => text
                .chars()
                .map(|c| if c.is_ascii_digit() { ' ' } else { c })
                .collect(),
            Self::RemoveStopwords => text
                .split_whitespace()
                .filter(|t| !STOPWORDS.contains(&t.to_lowercase().as_str()))
                .collect::<Vec<_>>()
                .join(" "),
            Self::RemoveShortTokens => text
                .split_whitespace()
                .filter(|t| t.chars().count() >= 3)
                .collect::<Vec<_>>()
                .join(" "),
            Self::CollapseWhitespace => text.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }
}

/// Applies configured steps in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPreprocessor {
    steps: Vec<PreprocessingStep>,
}

impl TextPreprocessor {
    /// Create a pipeline
    #[must_use]
    pub const fn new(steps: Vec<PreprocessingStep>) -> Self {
        Self { steps }
    }

    /// Configured steps
    #[must_use]
    pub fn steps(&self) -> &[PreprocessingStep] {
        &self.steps
    }

    /// Run every step over `text`
    #[must_use]
    pub fn process(&self, text: &str) -> String {
        self.steps
            .iter()
            .fold(text.to_string(), |acc, step| step.apply(&acc))
    }
}
