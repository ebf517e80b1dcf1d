//! Resolved subscription rules

use serde::{Deserialize, Serialize};
use vf_selector::{MatchOptions, SelectorGroups};

/// When a rule's per-scope state starts over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMatch {
    /// On every activity change
    #[default]
    Activity,
    /// Only when the foreground app changes
    App,
    /// Never; the scope lasts until the rule set is reloaded
    Match,
}

/// One rule with group-level defaults already applied
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub group: String,
    /// Identity other rules refer to through `pre_keys`
    pub key: Option<i64>,
    /// Keys of rules that must have triggered before this one may run
    pub pre_keys: Vec<i64>,
    /// `None` for rules from global groups
    pub app_id: Option<String>,
    /// `None` matches every activity
    pub activity_ids: Option<Vec<String>>,
    pub exclude_activity_ids: Vec<String>,
    pub selectors: SelectorGroups,
    pub action_cd_ms: Option<u64>,
    pub action_delay_ms: u64,
    pub match_delay_ms: u64,
    pub match_time_ms: Option<u64>,
    pub forced_time_ms: u64,
    pub action_maximum: Option<u32>,
    pub reset_match: ResetMatch,
    pub fast_query: bool,
}

impl Rule {
    /// Whether the rule is in scope for the given foreground window
    pub fn applies_to(&self, package: &str, activity: &str) -> bool {
        if let Some(app_id) = &self.app_id {
            if app_id != package {
                return false;
            }
        }
        self.activity_matches(activity)
    }

    /// Exclusions win; an absent include list matches everything
    pub fn activity_matches(&self, activity: &str) -> bool {
        if self
            .exclude_activity_ids
            .iter()
            .any(|pattern| activity_pattern_matches(pattern, activity))
        {
            return false;
        }
        match &self.activity_ids {
            None => true,
            Some(ids) => ids
                .iter()
                .any(|pattern| activity_pattern_matches(pattern, activity)),
        }
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            fast_query: self.fast_query,
        }
    }

    /// `group/name`, unique enough for logs and timer keys
    pub fn label(&self) -> String {
        format!("{}/{}", self.group, self.name)
    }
}

fn activity_pattern_matches(pattern: &str, activity: &str) -> bool {
    pattern == "*" || pattern == activity || (!pattern.is_empty() && activity.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> Rule {
        Rule {
            name: "skip".into(),
            group: "Splash".into(),
            key: None,
            pre_keys: Vec::new(),
            app_id: Some("com.example.app".into()),
            activity_ids: None,
            exclude_activity_ids: Vec::new(),
            selectors: SelectorGroups::default(),
            action_cd_ms: None,
            action_delay_ms: 0,
            match_delay_ms: 0,
            match_time_ms: None,
            forced_time_ms: 0,
            action_maximum: None,
            reset_match: ResetMatch::Activity,
            fast_query: false,
        }
    }

    #[test]
    fn test_app_scope() {
        let r = rule();
        assert!(r.applies_to("com.example.app", "SplashActivity"));
        assert!(!r.applies_to("com.other", "SplashActivity"));

        let global = Rule { app_id: None, ..rule() };
        assert!(global.applies_to("com.other", "Anything"));
    }

    #[test]
    fn test_activity_filters() {
        let r = Rule {
            activity_ids: Some(vec![".SplashActivity".into(), "Ad".into()]),
            exclude_activity_ids: vec!["AdSettings".into()],
            ..rule()
        };
        assert!(r.activity_matches("com.example.app.SplashActivity"));
        assert!(r.activity_matches("com.example.app.AdActivity"));
        assert!(!r.activity_matches("com.example.app.AdSettingsActivity"));
        assert!(!r.activity_matches("com.example.app.MainActivity"));

        let wildcard = Rule {
            activity_ids: Some(vec!["*".into()]),
            ..rule()
        };
        assert!(wildcard.activity_matches("whatever"));
    }
}
