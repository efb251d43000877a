//! Service classification.
//!
//! # Responsibilities
//! - Map a request path to the logical upstream service that owns it
//! - Keep the mapping as an ordered rule table (data, not code)
//!
//! # Design Decisions
//! - First match wins, in table order
//! - Substring or prefix matching only; no regex in the hot path
//! - Paths matching no rule resolve to `unknown`
//! - Pure: the same path always yields the same service

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Label of a logical upstream service (e.g. `restaurant-service`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    /// Label used for paths that match no rule.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.as_str() == Self::UNKNOWN
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// How a rule pattern is compared against the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Pattern appears anywhere in the path.
    #[default]
    Contains,
    /// Path starts with the pattern.
    Prefix,
}

/// One row of the classification table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRule {
    /// Text to look for in the path (case-sensitive).
    pub pattern: String,

    /// Comparison mode.
    #[serde(default, rename = "match")]
    pub kind: MatchKind,

    /// Service the path belongs to when this rule matches.
    pub service: String,
}

impl ClassifierRule {
    pub fn contains(pattern: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: MatchKind::Contains,
            service: service.into(),
        }
    }

    pub fn prefix(pattern: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: MatchKind::Prefix,
            service: service.into(),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self.kind {
            MatchKind::Contains => path.contains(&self.pattern),
            MatchKind::Prefix => path.starts_with(&self.pattern),
        }
    }
}

/// Default table, in priority order.
pub fn default_rules() -> Vec<ClassifierRule> {
    vec![
        ClassifierRule::contains("auth", "auth-service"),
        ClassifierRule::contains("restaurants", "restaurant-service"),
        ClassifierRule::contains("preferences", "preference-service"),
        ClassifierRule::contains("reviews", "review-service"),
    ]
}

/// Compiled, immutable classification table.
#[derive(Debug, Clone)]
pub struct ServiceClassifier {
    rules: Vec<(ClassifierRule, ServiceName)>,
    unknown: ServiceName,
}

impl ServiceClassifier {
    pub fn new(rules: Vec<ClassifierRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let service = ServiceName::new(&rule.service);
                (rule, service)
            })
            .collect();

        Self {
            rules,
            unknown: ServiceName::unknown(),
        }
    }

    /// Resolve the service owning `path`.
    pub fn classify(&self, path: &str) -> ServiceName {
        self.rules
            .iter()
            .find(|(rule, _)| rule.matches(path))
            .map(|(_, service)| service.clone())
            .unwrap_or_else(|| self.unknown.clone())
    }

    /// Number of rules in the table.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ServiceClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let classifier = ServiceClassifier::default();

        assert_eq!(classifier.classify("/api/auth/login").as_str(), "auth-service");
        assert_eq!(
            classifier.classify("/api/v1/restaurants/42").as_str(),
            "restaurant-service"
        );
        assert_eq!(
            classifier.classify("/api/v1/preferences").as_str(),
            "preference-service"
        );
        assert_eq!(
            classifier.classify("/api/v1/reviews?restaurant=1").as_str(),
            "review-service"
        );
        assert!(classifier.classify("/api/v1/menus").is_unknown());
        assert!(classifier.classify("/").is_unknown());
    }

    #[test]
    fn test_first_match_wins() {
        // "/api/auth/reviews" contains both "auth" and "reviews"; table order decides.
        let classifier = ServiceClassifier::default();
        assert_eq!(classifier.classify("/api/auth/reviews").as_str(), "auth-service");

        let reordered = ServiceClassifier::new(vec![
            ClassifierRule::contains("reviews", "review-service"),
            ClassifierRule::contains("auth", "auth-service"),
        ]);
        assert_eq!(reordered.classify("/api/auth/reviews").as_str(), "review-service");
    }

    #[test]
    fn test_prefix_rule() {
        let classifier = ServiceClassifier::new(vec![ClassifierRule::prefix(
            "/api/v1/restaurants",
            "restaurant-service",
        )]);

        assert_eq!(
            classifier.classify("/api/v1/restaurants/7").as_str(),
            "restaurant-service"
        );
        // Substring elsewhere in the path does not match a prefix rule.
        assert!(classifier.classify("/legacy/api/v1/restaurants").is_unknown());
    }

    #[test]
    fn test_classification_is_stable() {
        let classifier = ServiceClassifier::default();
        let paths = [
            "/api/v1/restaurants/1/reviews",
            "/api/auth/register",
            "/nothing/here",
            "",
        ];

        for path in paths {
            let first = classifier.classify(path);
            for _ in 0..100 {
                assert_eq!(classifier.classify(path), first);
            }
        }
    }

    #[test]
    fn test_rule_table_deserializes() {
        #[derive(Deserialize)]
        struct Table {
            rules: Vec<ClassifierRule>,
        }

        let table: Table = toml::from_str(
            r#"
            rules = [
                { pattern = "/api/v1/restaurants", match = "prefix", service = "restaurant-service" },
                { pattern = "auth", service = "auth-service" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(table.rules[0].kind, MatchKind::Prefix);
        assert_eq!(table.rules[1].kind, MatchKind::Contains);
    }

    #[test]
    fn test_service_name_serializes_as_string() {
        let name = ServiceName::new("review-service");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"review-service\"");

        let back: ServiceName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
