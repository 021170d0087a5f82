//! Payload sanitization.
//!
//! # Responsibilities
//! - Strip script/iframe/object/embed markup, `javascript:` URIs and inline
//!   event handlers from every string in the JSON graph
//! - Truncate known fields to their configured maximum length
//!
//! # Design Decisions
//! - Stripping runs to a fixed point before truncation, so sanitizing the
//!   output again never changes it
//! - Over-long fields are truncated, never rejected
//! - Only a non-object top level fails the request

use std::borrow::Cow;
use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::schema::SecurityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("request body must be a JSON object")]
    NotAnObject,
}

/// Compiled sanitization rules.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    patterns: Vec<Regex>,
    placeholder: String,
    field_limits: BTreeMap<String, usize>,
    page_context_limits: BTreeMap<String, usize>,
}

const DANGEROUS_PATTERNS: &[&str] = &[
    r"(?is)<script\b.*?</script\s*>",
    r"(?is)<iframe\b.*?</iframe\s*>",
    r"(?i)javascript:",
    r"(?i)on\w+\s*=",
    r"(?is)<object\b.*?</object\s*>",
    r"(?i)<embed\b[^>]*>",
];

impl Sanitizer {
    pub fn from_config(config: &SecurityConfig) -> Self {
        let patterns = DANGEROUS_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("built-in sanitizer pattern is valid"))
            .collect();

        Self {
            patterns,
            placeholder: config.placeholder.clone(),
            field_limits: config.field_limits.clone(),
            page_context_limits: config.page_context_limits.clone(),
        }
    }

    /// Return a sanitized deep copy of `input`.
    pub fn sanitize(&self, input: &Value) -> Result<Value, SanitizeError> {
        let object = input.as_object().ok_or(SanitizeError::NotAnObject)?;

        let mut cleaned = match self.deep_clean(&Value::Object(object.clone())) {
            Value::Object(map) => map,
            _ => return Err(SanitizeError::NotAnObject),
        };

        truncate_fields(&mut cleaned, &self.field_limits);
        if let Some(Value::Object(context)) = cleaned.get_mut("pageContext") {
            truncate_fields(context, &self.page_context_limits);
        }

        Ok(Value::Object(cleaned))
    }

    fn deep_clean(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.clean_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.deep_clean(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.deep_clean(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// True when no dangerous pattern matches `text`.
    pub fn is_inert(&self, text: &str) -> bool {
        !self.patterns.iter().any(|p| p.is_match(text))
    }

    /// Apply every pattern until the string stops changing.
    ///
    /// Terminates only for an inert placeholder (checked by config
    /// validation): each replacement then consumes at least two characters
    /// that are not part of a placeholder.
    pub fn clean_string(&self, input: &str) -> String {
        let mut current = input.to_string();
        loop {
            let mut changed = false;
            for pattern in &self.patterns {
                if let Cow::Owned(replaced) = pattern.replace_all(&current, self.placeholder.as_str()) {
                    current = replaced;
                    changed = true;
                }
            }
            if !changed {
                return current;
            }
        }
    }
}

fn truncate_fields(map: &mut Map<String, Value>, limits: &BTreeMap<String, usize>) {
    for (field, limit) in limits {
        if let Some(Value::String(s)) = map.get_mut(field) {
            if let Some((cut, _)) = s.char_indices().nth(*limit) {
                s.truncate(cut);
            }
        }
    }
}
