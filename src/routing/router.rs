//! Action lookup and upstream selection.
//!
//! # Responsibilities
//! - Store compiled matchers in evaluation order
//! - Resolve the action for a request
//! - Map an action to its upstream URL
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Order: configured path prefixes, then body field, then default `analyze`
//! - A resolved action without an upstream URL is a configuration error, not a client error

use std::collections::HashMap;

use serde_json::Value;

use crate::config::schema::{RouteConfig, UpstreamConfig};
use crate::routing::matcher::{
    Action, BodyFieldMatcher, DefaultMatcher, MatchInput, Matcher, PathPrefixMatcher, Resolution,
};

/// Resolves requests to actions and actions to upstream URLs.
#[derive(Debug)]
pub struct ActionRouter {
    matchers: Vec<Box<dyn Matcher>>,
    upstreams: HashMap<Action, String>,
}

impl ActionRouter {
    /// Compile routes and upstreams from configuration.
    ///
    /// Routes naming an unknown action are skipped; validation reports them.
    pub fn from_config(routes: &[RouteConfig], upstreams: &UpstreamConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::with_capacity(routes.len() + 2);
        for route in routes {
            match Action::parse(&route.action) {
                Some(action) => {
                    matchers.push(Box::new(PathPrefixMatcher::new(route.path_prefix.clone(), action)))
                }
                None => tracing::warn!(action = %route.action, "Skipping route with unknown action"),
            }
        }
        matchers.push(Box::new(BodyFieldMatcher::new("action")));
        matchers.push(Box::new(DefaultMatcher::new(Action::Analyze)));

        let mut urls = HashMap::new();
        if let Some(url) = &upstreams.analyze_url {
            urls.insert(Action::Analyze, url.clone());
        }
        if let Some(url) = &upstreams.translate_url {
            urls.insert(Action::Translate, url.clone());
        }

        Self {
            matchers,
            upstreams: urls,
        }
    }

    /// Resolve the action for a request path and sanitized body.
    pub fn resolve(&self, path: &str, body: &Value) -> Resolution {
        let input = MatchInput { path, body };
        self.matchers
            .iter()
            .find_map(|m| m.resolve(input))
            .unwrap_or(Resolution::Action(Action::Analyze))
    }

    /// Upstream URL for an action, if configured.
    pub fn upstream_for(&self, action: Action) -> Option<&str> {
        self.upstreams.get(&action).map(String::as_str)
    }
}
