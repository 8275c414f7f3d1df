use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use tracing::{debug, error};

use crate::orchestrator::CleanupSuggestion;

/// Operator-provided override for suggestions whose path matches `pattern`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GroundTruthRule {
    pub pattern: String,
    #[serde(default)]
    pub safe_to_delete: Option<bool>,
    #[serde(default)]
    pub auto_approve: Option<bool>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Ordered rule set; the first matching rule applies.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    rules: Vec<(Pattern, GroundTruthRule)>,
}

impl GroundTruth {
    pub fn new(rules: &[GroundTruthRule]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|rule| match Pattern::new(&rule.pattern) {
                Ok(pattern) => Some((pattern, rule.clone())),
                Err(e) => {
                    error!("Invalid ground truth pattern '{}': {}", rule.pattern, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, suggestion: &mut CleanupSuggestion) {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let Some((_, rule)) = self
            .rules
            .iter()
            .find(|(pattern, _)| pattern.matches_path_with(&suggestion.file_path, options))
        else {
            return;
        };

        debug!(
            "Ground truth '{}' applies to {}",
            rule.pattern,
            suggestion.file_path.display()
        );
        if let Some(safe) = rule.safe_to_delete {
            suggestion.safe_to_delete = safe;
        }
        if let Some(auto) = rule.auto_approve {
            suggestion.auto_approve = auto;
        }
        if let Some(category) = &rule.category {
            suggestion.category = category.clone();
        }
        if let Some(reason) = &rule.reason {
            suggestion.reason = reason.clone();
        }
        if !suggestion.safe_to_delete {
            suggestion.auto_approve = false;
        }
    }

    pub fn apply_all(&self, suggestions: &mut [CleanupSuggestion]) {
        if self.is_empty() {
            return;
        }
        for suggestion in suggestions.iter_mut() {
            self.apply(suggestion);
        }
    }
}
