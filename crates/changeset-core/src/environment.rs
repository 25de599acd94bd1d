//! Deployment profile and property accessor handed to change sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub active_profiles: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Whether `profile` is in effect. With no active profiles, only
    /// `"default"` is.
    pub fn is_active(&self, profile: &str) -> bool {
        if self.active_profiles.is_empty() {
            return profile == DEFAULT_PROFILE;
        }
        self.active_profiles.iter().any(|p| p == profile)
    }

    /// Matches when any expression holds. `"!name"` holds when `name` is not
    /// active. An empty list always matches.
    pub fn accepts_profiles(&self, expressions: &[String]) -> bool {
        if expressions.is_empty() {
            return true;
        }
        expressions.iter().any(|expr| match expr.strip_prefix('!') {
            Some(negated) => !self.is_active(negated),
            None => self.is_active(expr),
        })
    }
}

/// Profile filter applied by discovery: without an environment nothing is
/// filtered out.
pub fn profiles_match(environment: Option<&Environment>, expressions: &[String]) -> bool {
    environment.map_or(true, |env| env.accepts_profiles(expressions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exprs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_expression_list_always_matches() {
        let env = Environment::new().with_profiles(["prod"]);
        assert!(env.accepts_profiles(&[]));
    }

    #[test]
    fn default_profile_applies_when_none_active() {
        let env = Environment::new();
        assert!(env.accepts_profiles(&exprs(&["default"])));
        assert!(!env.accepts_profiles(&exprs(&["prod"])));
    }

    #[test]
    fn negation_and_any_match() {
        let env = Environment::new().with_profiles(["staging"]);
        assert!(env.accepts_profiles(&exprs(&["!prod"])));
        assert!(!env.accepts_profiles(&exprs(&["!staging"])));
        assert!(env.accepts_profiles(&exprs(&["prod", "staging"])));
    }

    #[test]
    fn missing_environment_matches_everything() {
        assert!(profiles_match(None, &exprs(&["prod"])));
        let env = Environment::new().with_profiles(["dev"]);
        assert!(!profiles_match(Some(&env), &exprs(&["prod"])));
    }

    #[test]
    fn properties_lookup() {
        let env = Environment::new().with_property("region", "eu-west-1");
        assert_eq!(env.property("region"), Some("eu-west-1"));
        assert_eq!(env.property("missing"), None);
    }
}
