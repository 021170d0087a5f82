//! Action matching logic.
//!
//! # Responsibilities
//! - Define the closed set of actions the gateway can forward
//! - Match a request path prefix (case-sensitive)
//! - Fall back to the `action` field of the sanitized body
//!
//! # Design Decisions
//! - Path matchers are checked before the body so a caller cannot re-route a
//!   `/translate` call by editing its payload
//! - No regex to guarantee O(n) matching
//! - An unknown body action resolves to `Unknown`, which no key can hold

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// An upstream action a caller can be permitted to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Analyze,
    Translate,
}

impl Action {
    /// Parse the lower-case action name used in config and payloads.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "analyze" => Some(Action::Analyze),
            "translate" => Some(Action::Translate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Analyze => "analyze",
            Action::Translate => "translate",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of matching a request to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A known action.
    Action(Action),
    /// The body named an action the gateway does not know.
    Unknown(String),
}

impl Resolution {
    /// Name used for permission checks and audit records.
    pub fn name(&self) -> &str {
        match self {
            Resolution::Action(action) => action.as_str(),
            Resolution::Unknown(name) => name,
        }
    }
}

/// What a matcher sees of the request.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub path: &'a str,
    pub body: &'a Value,
}

/// Trait for resolving an action from a request.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Returns the resolution if this matcher applies.
    fn resolve(&self, input: MatchInput<'_>) -> Option<Resolution>;
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
    action: Action,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>, action: Action) -> Self {
        Self {
            prefix: prefix.into(),
            action,
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn resolve(&self, input: MatchInput<'_>) -> Option<Resolution> {
        input
            .path
            .starts_with(&self.prefix)
            .then_some(Resolution::Action(self.action))
    }
}

/// Reads the `action` field of the body.
#[derive(Debug, Clone)]
pub struct BodyFieldMatcher {
    field: String,
}

impl BodyFieldMatcher {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

impl Matcher for BodyFieldMatcher {
    fn resolve(&self, input: MatchInput<'_>) -> Option<Resolution> {
        let name = input.body.get(&self.field)?.as_str()?;
        if name.is_empty() {
            return None;
        }
        Some(match Action::parse(name) {
            Some(action) => Resolution::Action(action),
            None => Resolution::Unknown(name.to_string()),
        })
    }
}

/// Always resolves to a fixed action.
#[derive(Debug, Clone)]
pub struct DefaultMatcher {
    action: Action,
}

impl DefaultMatcher {
    pub fn new(action: Action) -> Self {
        Self { action }
    }
}

impl Matcher for DefaultMatcher {
    fn resolve(&self, _input: MatchInput<'_>) -> Option<Resolution> {
        Some(Resolution::Action(self.action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/translate", Action::Translate);
        let body = json!({});

        let hit = matcher.resolve(MatchInput { path: "/translate/v2", body: &body });
        assert_eq!(hit, Some(Resolution::Action(Action::Translate)));

        let miss = matcher.resolve(MatchInput { path: "/analyze", body: &body });
        assert_eq!(miss, None);

        // Case sensitive
        let miss = matcher.resolve(MatchInput { path: "/TRANSLATE", body: &body });
        assert_eq!(miss, None);
    }

    #[test]
    fn test_body_matcher() {
        let matcher = BodyFieldMatcher::new("action");

        let body = json!({ "action": "translate" });
        assert_eq!(
            matcher.resolve(MatchInput { path: "/", body: &body }),
            Some(Resolution::Action(Action::Translate))
        );

        let body = json!({ "action": "delete_everything" });
        assert_eq!(
            matcher.resolve(MatchInput { path: "/", body: &body }),
            Some(Resolution::Unknown("delete_everything".to_string()))
        );

        let body = json!({ "action": 7 });
        assert_eq!(matcher.resolve(MatchInput { path: "/", body: &body }), None);

        let body = json!({ "action": "" });
        assert_eq!(matcher.resolve(MatchInput { path: "/", body: &body }), None);
    }

    #[test]
    fn test_action_names_round_trip() {
        for action in [Action::Analyze, Action::Translate] {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
        assert_eq!(Action::parse("Analyze"), None);
    }
}
